//! URL classification for the governed provider: which account slot a URL
//! encodes, whether it belongs to an identity surface, and how each service
//! embeds a slot.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use authslot_core::{AccountSlot, TransitionType};

mod service_rules;
mod shortcuts;

pub use service_rules::{ServiceRule, ServiceRuleTable, SlotPlacement, SpecialCase};
pub use shortcuts::{SHORTCUT_RULE_IDS, ShortcutRule, ShortcutSet, gmail_button_shortcuts};

pub const GOVERNED_DOMAIN: &str = "google.com";
pub const AUTHUSER_PARAM: &str = "authuser";

const IDENTITY_HOSTS: [&str; 2] = ["accounts.google.com", "myaccount.google.com"];
const SWITCHER_PATH_MARKERS: [&str; 3] = ["/AccountChooser", "/signin/selectaccount", "/signinchooser"];

static PATH_SLOT_RE: OnceLock<Regex> = OnceLock::new();
static QUERY_SLOT_RE: OnceLock<Regex> = OnceLock::new();

fn path_slot_re() -> &'static Regex {
    PATH_SLOT_RE.get_or_init(|| Regex::new(r"/u/(\d+)/").expect("static path slot pattern"))
}

fn query_slot_re() -> &'static Regex {
    QUERY_SLOT_RE
        .get_or_init(|| Regex::new(r"(?:^|&)authuser=(\d+)").expect("static query slot pattern"))
}

pub fn parse_url(raw: &str) -> Option<Url> {
    let parsed = Url::parse(raw.trim()).ok()?;
    match parsed.scheme() {
        "http" | "https" => Some(parsed),
        _ => None,
    }
}

pub fn is_governed_host(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    host == GOVERNED_DOMAIN || host.ends_with(&format!(".{}", GOVERNED_DOMAIN))
}

pub fn is_identity_host(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    IDENTITY_HOSTS.iter().any(|h| host == *h)
}

/// Account slot carried in a `/u/<n>/` path segment.
pub fn path_slot(url: &Url) -> Option<AccountSlot> {
    let caps = path_slot_re().captures(url.path())?;
    caps.get(1)?.as_str().parse().ok()
}

/// Account slot carried in an `authuser=<n>` query parameter.
pub fn query_slot(url: &Url) -> Option<AccountSlot> {
    let caps = query_slot_re().captures(url.query()?)?;
    caps.get(1)?.as_str().parse().ok()
}

pub fn has_authuser_param(url: &Url) -> bool {
    url.query_pairs().any(|(k, _)| k == AUTHUSER_PARAM)
}

/// The account slot a URL already encodes.
///
/// A `/u/<n>/` path wins over `authuser=<n>`; governed, non-identity hosts
/// without either fall back to the provider's implicit slot 0. An explicit
/// slot too large to represent yields `None`.
pub fn extract_slot_from(url: &Url) -> Option<AccountSlot> {
    if path_slot_re().is_match(url.path()) {
        return path_slot(url);
    }
    if url.query().is_some_and(|q| query_slot_re().is_match(q)) {
        return query_slot(url);
    }
    let host = url.host_str()?;
    if is_governed_host(host) && !is_identity_host(host) {
        return Some(AccountSlot::DEFAULT);
    }
    None
}

pub fn extract_slot(raw: &str) -> Option<AccountSlot> {
    parse_url(raw).as_ref().and_then(extract_slot_from)
}

/// Sign-in, account chooser and account-management pages. Never redirected away from.
pub fn is_identity_surface(url: &Url) -> bool {
    if url.host_str().is_some_and(is_identity_host) {
        return true;
    }
    let query = url.query().unwrap_or("");
    if query.contains("AccountChooser") || query.contains("account_chooser") {
        return true;
    }
    let path = url.path();
    path.contains("ServiceLogin") || path.contains("signin")
}

/// Heuristics for "the user just picked an account with the provider's own switcher".
pub fn is_account_switcher(url: &Url, transition: TransitionType) -> bool {
    let via_link = transition == TransitionType::Link;
    if via_link && has_authuser_param(url) {
        return true;
    }
    let path = url.path();
    if SWITCHER_PATH_MARKERS.iter().any(|m| path.contains(m)) {
        return true;
    }
    let redirect_carries_slot = url
        .query_pairs()
        .any(|(k, v)| k == "redirect_uri" && v.contains("authuser="));
    if redirect_carries_slot {
        return true;
    }
    via_link && path_slot(url).is_some()
}

pub(crate) fn set_query_param(url: &mut Url, name: &str, value: &str) {
    let mut replaced = false;
    let mut pairs: Vec<(String, String)> = Vec::new();
    for (k, v) in url.query_pairs().into_owned() {
        if k == name {
            if !replaced {
                pairs.push((k, value.to_string()));
                replaced = true;
            }
        } else {
            pairs.push((k, v));
        }
    }
    if !replaced {
        pairs.push((name.to_string(), value.to_string()));
    }
    url.query_pairs_mut().clear().extend_pairs(pairs.iter());
}

pub(crate) fn remove_query_param(url: &mut Url, name: &str) {
    if !url.query_pairs().any(|(k, _)| k == name) {
        return;
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .into_owned()
        .filter(|(k, _)| k != name)
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }
}
