use url::Url;

use authslot_core::AccountSlot;

use crate::{AUTHUSER_PARAM, remove_query_param, set_query_param};

const DOCS_APPS: [&str; 5] = ["document", "spreadsheets", "presentation", "forms", "drawings"];

const GMAIL_CASES: &[SpecialCase] = &[SpecialCase {
    label: "gmail-button",
    rewrite: gmail_button,
}];

const DOCS_CASES: &[SpecialCase] = &[SpecialCase {
    label: "docs-sub-application",
    rewrite: docs_sub_application,
}];

/// How a service embeds the account slot in its URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPlacement {
    /// `{prefix}/u/{slot}/...`; an empty prefix puts the segment at the path root.
    PathSegment { prefix: &'static str },
    /// `?{name}={slot}` alongside the other parameters.
    QueryParam { name: &'static str },
}

impl SlotPlacement {
    pub fn apply(&self, url: &Url, slot: AccountSlot) -> Option<Url> {
        match *self {
            Self::PathSegment { prefix } => rewrite_path_segment(url, prefix, slot),
            Self::QueryParam { name } => {
                let mut out = url.clone();
                set_query_param(&mut out, name, &slot.to_string());
                Some(out)
            }
        }
    }
}

/// A path shape that needs its own handling before the default placement.
/// `rewrite` returns `None` when the shape does not apply.
#[derive(Debug, Clone, Copy)]
pub struct SpecialCase {
    pub label: &'static str,
    pub rewrite: fn(&Url, AccountSlot) -> Option<Url>,
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceRule {
    pub name: &'static str,
    pub host: &'static str,
    pub placement: SlotPlacement,
    pub special_cases: &'static [SpecialCase],
}

impl ServiceRule {
    pub fn matches_host(&self, host: &str) -> bool {
        host.trim_end_matches('.').eq_ignore_ascii_case(self.host)
    }

    /// Rewrites `url` so it lands on `slot`, leaving every other path segment
    /// and query parameter alone. Rewriting an already-correct URL is a no-op.
    pub fn rewrite(&self, url: &Url, slot: AccountSlot) -> Option<Url> {
        if !url.host_str().is_some_and(|h| self.matches_host(h)) {
            return None;
        }
        for case in self.special_cases {
            if let Some(out) = (case.rewrite)(url, slot) {
                return Some(out);
            }
        }
        self.placement.apply(url, slot)
    }

    pub fn special_case_for(&self, url: &Url, slot: AccountSlot) -> Option<&'static str> {
        self.special_cases
            .iter()
            .find(|case| (case.rewrite)(url, slot).is_some())
            .map(|case| case.label)
    }
}

#[derive(Debug, Clone)]
pub struct ServiceRuleTable {
    rules: Vec<ServiceRule>,
}

impl Default for ServiceRuleTable {
    fn default() -> Self {
        Self::google()
    }
}

impl ServiceRuleTable {
    pub fn new(rules: Vec<ServiceRule>) -> Self {
        Self { rules }
    }

    pub fn google() -> Self {
        Self::new(vec![
            ServiceRule {
                name: "gmail",
                host: "mail.google.com",
                placement: SlotPlacement::PathSegment { prefix: "/mail" },
                special_cases: GMAIL_CASES,
            },
            ServiceRule {
                name: "drive",
                host: "drive.google.com",
                placement: SlotPlacement::PathSegment { prefix: "/drive" },
                special_cases: &[],
            },
            ServiceRule {
                name: "docs",
                host: "docs.google.com",
                placement: SlotPlacement::QueryParam {
                    name: AUTHUSER_PARAM,
                },
                special_cases: DOCS_CASES,
            },
            ServiceRule {
                name: "calendar",
                host: "calendar.google.com",
                placement: SlotPlacement::PathSegment {
                    prefix: "/calendar",
                },
                special_cases: &[],
            },
            ServiceRule {
                name: "keep",
                host: "keep.google.com",
                placement: SlotPlacement::PathSegment { prefix: "" },
                special_cases: &[],
            },
            ServiceRule {
                name: "photos",
                host: "photos.google.com",
                placement: SlotPlacement::PathSegment { prefix: "" },
                special_cases: &[],
            },
            ServiceRule {
                name: "meet",
                host: "meet.google.com",
                placement: SlotPlacement::QueryParam {
                    name: AUTHUSER_PARAM,
                },
                special_cases: &[],
            },
        ])
    }

    pub fn rules(&self) -> &[ServiceRule] {
        &self.rules
    }

    pub fn for_host(&self, host: &str) -> Option<&ServiceRule> {
        self.rules.iter().find(|rule| rule.matches_host(host))
    }

    pub fn for_url(&self, url: &Url) -> Option<&ServiceRule> {
        self.for_host(url.host_str()?)
    }

    pub fn by_name(&self, name: &str) -> Option<&ServiceRule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    pub fn rewrite(&self, url: &Url, slot: AccountSlot) -> Option<Url> {
        self.for_url(url)?.rewrite(url, slot)
    }
}

fn rewrite_path_segment(url: &Url, prefix: &str, slot: AccountSlot) -> Option<Url> {
    let path = url.path();
    let rest = if prefix.is_empty() {
        path.strip_prefix('/')?
    } else {
        let after = path.strip_prefix(prefix)?;
        if after.is_empty() {
            after
        } else {
            after.strip_prefix('/')?
        }
    };
    let rest = strip_slot_segment(rest);
    let mut out = url.clone();
    out.set_path(&format!("{}/u/{}/{}", prefix, slot, rest));
    remove_query_param(&mut out, AUTHUSER_PARAM);
    Some(out)
}

/// Drops a leading `u/<digits>` segment, returning what follows it.
fn strip_slot_segment(rest: &str) -> &str {
    let Some(after_u) = rest.strip_prefix("u/") else {
        return rest;
    };
    let digits = after_u.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return rest;
    }
    let tail = &after_u[digits..];
    if tail.is_empty() {
        tail
    } else if let Some(stripped) = tail.strip_prefix('/') {
        stripped
    } else {
        rest
    }
}

/// The browser's Gmail button opens `/mail/?tab=rm...`; the slot goes into
/// `authuser` so the button keeps working when Gmail drops the path segment.
fn gmail_button(url: &Url, slot: AccountSlot) -> Option<Url> {
    if url.path() != "/mail/" {
        return None;
    }
    if !url.query_pairs().any(|(k, v)| k == "tab" && v == "rm") {
        return None;
    }
    let mut out = url.clone();
    set_query_param(&mut out, AUTHUSER_PARAM, &slot.to_string());
    Some(out)
}

fn docs_sub_application(url: &Url, slot: AccountSlot) -> Option<Url> {
    let first = url.path().trim_start_matches('/').split('/').next()?;
    let app = DOCS_APPS.iter().find(|app| **app == first)?;
    rewrite_path_segment(url, &format!("/{}", app), slot)
}
