//! Account email extraction from rendered provider pages.
//!
//! Strategies run in order of decreasing reliability; every candidate string
//! goes through [`EmailShape::normalize`] and is discarded when it does not
//! reduce to a clean address on one of the provider's email domains.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

const IDENTITY_ATTRIBUTE: &str = "data-email";
const MAX_SHORT_TEXT: usize = 100;

/// Account-switcher containers first, then individual profile widgets.
const PROVIDER_SELECTORS: [&str; 22] = [
    ".OVnw0d", ".NB6Ldc", ".RASpKe", ".hqHn1", ".gb_Tc", ".gb_Ba", ".gb_Ea", ".gb_lb", ".gb_vb",
    ".gb_A", ".gb_Bb", ".gb_Ad", ".gb_C", ".gb_Da", ".gb_1b", ".gb_2b", ".gb_d", ".gb_mb",
    ".gb_kb", ".gb_Fa", ".gb_Jb", ".gb_g .gb_Da",
];

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();

fn email_re() -> &'static Regex {
    EMAIL_RE.get_or_init(|| {
        Regex::new(r"([A-Za-z0-9._%+\-]+)@((?:[A-Za-z0-9\-]+\.)+[A-Za-z]{2,})")
            .expect("static email pattern")
    })
}

/// Address shape restricted to the provider's email domains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailShape {
    domains: Vec<String>,
}

impl Default for EmailShape {
    fn default() -> Self {
        Self::new(["gmail.com"])
    }
}

impl EmailShape {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.as_ref().trim().trim_start_matches('@').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn accepts_domain(&self, domain: &str) -> bool {
        let domain = domain.to_ascii_lowercase();
        self.domains.iter().any(|d| *d == domain)
    }

    /// Narrowest `local@domain` inside `candidate`, lowercased, with any
    /// display name around it dropped.
    pub fn normalize(&self, candidate: &str) -> Option<String> {
        if !candidate.contains('@') {
            return None;
        }
        for caps in email_re().captures_iter(candidate) {
            let (Some(local), Some(domain)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let local = local.as_str().trim_start_matches('.');
            if local.is_empty() || local.ends_with('.') || local.contains("..") {
                continue;
            }
            if !self.accepts_domain(domain.as_str()) {
                continue;
            }
            return Some(format!("{}@{}", local, domain.as_str()).to_ascii_lowercase());
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    IdentityAttribute,
    ProviderSelectors,
    AriaLabel,
    MenuItem,
    ShortText,
}

pub const STRATEGIES: [Strategy; 5] = [
    Strategy::IdentityAttribute,
    Strategy::ProviderSelectors,
    Strategy::AriaLabel,
    Strategy::MenuItem,
    Strategy::ShortText,
];

impl Strategy {
    /// Raw candidate strings in document order.
    pub fn candidates(self, doc: &Html) -> Vec<String> {
        match self {
            Self::IdentityAttribute => select_all(doc, "[data-email]")
                .filter_map(|el| el.value().attr(IDENTITY_ATTRIBUTE).map(str::to_string))
                .collect(),
            Self::ProviderSelectors => {
                let mut out = Vec::new();
                for selector in PROVIDER_SELECTORS {
                    for el in select_all(doc, selector) {
                        out.push(text_content(el));
                        if let Some(label) = el.value().attr("aria-label") {
                            out.push(label.to_string());
                        }
                    }
                }
                out
            }
            Self::AriaLabel => select_all(doc, "[aria-label*=\"@\"]")
                .filter_map(|el| el.value().attr("aria-label").map(str::to_string))
                .collect(),
            Self::MenuItem => select_all(doc, "[role=\"menuitem\"]")
                .map(text_content)
                .collect(),
            Self::ShortText => select_all(doc, "*")
                .map(text_content)
                .filter(|text| text.contains('@') && text.chars().count() < MAX_SHORT_TEXT)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundAccount {
    pub email: String,
    pub observed_order: usize,
    pub strategy: Strategy,
}

/// The single account email the page shows, if any.
pub fn find_email(doc: &Html, shape: &EmailShape) -> Option<String> {
    STRATEGIES.iter().find_map(|strategy| {
        strategy
            .candidates(doc)
            .iter()
            .find_map(|candidate| shape.normalize(candidate))
    })
}

pub fn find_email_in_html(html: &str, shape: &EmailShape) -> Option<String> {
    find_email(&Html::parse_document(html), shape)
}

/// Every distinct account email on an account-switcher style page, in the
/// order observed. Less reliable strategies only run while at most one
/// account has been found.
pub fn collect_accounts(doc: &Html, shape: &EmailShape) -> Vec<FoundAccount> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<FoundAccount> = Vec::new();
    for strategy in STRATEGIES {
        if out.len() > 1 {
            break;
        }
        for candidate in strategy.candidates(doc) {
            let Some(email) = shape.normalize(&candidate) else {
                continue;
            };
            if seen.insert(email.clone()) {
                out.push(FoundAccount {
                    email,
                    observed_order: out.len(),
                    strategy,
                });
            }
        }
    }
    out
}

pub fn collect_accounts_in_html(html: &str, shape: &EmailShape) -> Vec<FoundAccount> {
    collect_accounts(&Html::parse_document(html), shape)
}

fn select_all<'a>(doc: &'a Html, selector: &str) -> std::vec::IntoIter<ElementRef<'a>> {
    let Ok(sel) = Selector::parse(selector) else {
        return Vec::new().into_iter();
    };
    doc.select(&sel).collect::<Vec<_>>().into_iter()
}

fn text_content(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(|chunk| chunk.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}
