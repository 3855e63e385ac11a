use std::path::PathBuf;
use std::time::Duration;

use authslot_engine::{DEFAULT_COOLDOWN, DEFAULT_GRACE, DEFAULT_SCAN_PAGES, DEFAULT_SETTLE};

use super::{AppConfig, load_config_text};

const DEFAULT_OBSERVER_DELAYS_MS: [u64; 3] = [2000, 5000, 10_000];
const DEFAULT_POLL_MS: u64 = 500;

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            cooldown: DEFAULT_COOLDOWN,
            grace: DEFAULT_GRACE,
            scan_settle: DEFAULT_SETTLE,
            scan_pages: DEFAULT_SCAN_PAGES.iter().map(|p| p.to_string()).collect(),
            observer_delays: DEFAULT_OBSERVER_DELAYS_MS
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
            chrome_path: None,
            no_sandbox: false,
            debug_ws_url: None,
            poll: Duration::from_millis(DEFAULT_POLL_MS),
            email_domains: vec!["gmail.com".to_string()],
            load_error: None,
        }
    }
}

pub(crate) fn load_app_config() -> AppConfig {
    parse_app_config(load_config_text().as_deref())
}

pub(crate) fn parse_app_config(content: Option<&str>) -> AppConfig {
    let mut config = AppConfig::default();
    let Some(content) = content else {
        return config;
    };
    let value: toml::Value = match toml::from_str(content) {
        Ok(value) => value,
        Err(_) => {
            config.load_error = Some("Invalid authslot.toml".to_string());
            return config;
        }
    };

    if let Some(store) = value.get("store") {
        config.store_path = store
            .get("path")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
    }
    if let Some(engine) = value.get("engine") {
        if let Some(ms) = engine.get("cooldown_ms").and_then(parse_millis) {
            config.cooldown = ms;
        }
        if let Some(ms) = engine.get("grace_ms").and_then(parse_millis) {
            config.grace = ms;
        }
    }
    if let Some(scan) = value.get("scan") {
        if let Some(ms) = scan.get("settle_ms").and_then(parse_millis) {
            config.scan_settle = ms;
        }
        if let Some(pages) = scan.get("pages").and_then(parse_string_list) {
            config.scan_pages = pages;
        }
    }
    if let Some(observer) = value.get("observer") {
        if let Some(delays) = observer.get("delays_ms").and_then(|v| v.as_array()) {
            config.observer_delays = delays.iter().filter_map(parse_millis).collect();
        }
    }
    if let Some(browser) = value.get("browser") {
        config.chrome_path = browser
            .get("chrome_path")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        config.no_sandbox = browser
            .get("no_sandbox")
            .and_then(parse_bool)
            .unwrap_or(false);
        config.debug_ws_url = browser
            .get("debug_ws_url")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string);
        if let Some(ms) = browser.get("poll_ms").and_then(parse_millis) {
            config.poll = ms.max(Duration::from_millis(50));
        }
    }
    if let Some(provider) = value.get("provider") {
        if let Some(domains) = provider.get("email_domains").and_then(parse_string_list) {
            config.email_domains = domains;
        }
    }
    config
}

fn parse_bool(value: &toml::Value) -> Option<bool> {
    value.as_bool().or_else(|| {
        value
            .as_str()
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
    })
}

fn parse_millis(value: &toml::Value) -> Option<Duration> {
    let ms = match value {
        toml::Value::Integer(n) => u64::try_from(*n).ok()?,
        toml::Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    Some(Duration::from_millis(ms))
}

fn parse_string_list(value: &toml::Value) -> Option<Vec<String>> {
    let items: Vec<String> = value
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() { None } else { Some(items) }
}
