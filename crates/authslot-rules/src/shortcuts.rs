use serde::{Deserialize, Serialize};

use authslot_core::AccountSlot;

use crate::{AUTHUSER_PARAM, parse_url, set_query_param};

pub const SHORTCUT_RULE_IDS: [u32; 3] = [10, 11, 12];

/// Static redirect applied by the host ahead of the engine: any top-level
/// URL containing `url_filter` gets `param=value` added or replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortcutRule {
    pub id: u32,
    pub priority: u32,
    pub url_filter: String,
    pub param: String,
    pub value: String,
}

impl ShortcutRule {
    pub fn matches(&self, url: &str) -> bool {
        url.contains(&self.url_filter)
    }

    /// The redirected URL, or `None` when the rule does not match or would
    /// leave the URL unchanged.
    pub fn apply(&self, url: &str) -> Option<String> {
        if !self.matches(url) {
            return None;
        }
        let mut parsed = parse_url(url)?;
        set_query_param(&mut parsed, &self.param, &self.value);
        let out = parsed.to_string();
        if out == url { None } else { Some(out) }
    }
}

pub fn gmail_button_shortcuts(slot: AccountSlot) -> Vec<ShortcutRule> {
    [
        (10, "https://mail.google.com/mail/?tab=rm"),
        (11, "https://mail.google.com/mail/?tab=rm&"),
        (12, "https://mail.google.com/mail/?authuser=0"),
    ]
    .into_iter()
    .map(|(id, filter)| ShortcutRule {
        id,
        priority: 2,
        url_filter: filter.to_string(),
        param: AUTHUSER_PARAM.to_string(),
        value: slot.to_string(),
    })
    .collect()
}

/// The currently installed shortcut rules, highest priority first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortcutSet {
    rules: Vec<ShortcutRule>,
}

impl ShortcutSet {
    pub fn replace(&mut self, remove_ids: &[u32], add: Vec<ShortcutRule>) {
        self.rules.retain(|rule| !remove_ids.contains(&rule.id));
        self.rules.extend(add);
        self.rules
            .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
    }

    pub fn rules(&self) -> &[ShortcutRule] {
        &self.rules
    }

    pub fn apply(&self, url: &str) -> Option<String> {
        self.rules.iter().find_map(|rule| rule.apply(url))
    }
}
