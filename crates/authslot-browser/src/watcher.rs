use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use authslot_core::{NavigationChannel, NavigationEvent, TransitionType};
use authslot_dom::{EmailShape, find_email_in_html};
use authslot_engine::{AuthSlotService, Inbound, SharedShortcuts, TabNavigator};
use authslot_rules::{is_governed_host, is_identity_surface, parse_url};

use crate::{ChromiumHost, ChromiumNavigator, current_transition, find_tab, list_tabs};

pub const DEFAULT_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ObserverSettings {
    /// Offsets from the navigation at which the page is re-read.
    pub delays: Vec<Duration>,
    pub shape: EmailShape,
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            delays: [2000, 5000, 10_000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
            shape: EmailShape::default(),
        }
    }
}

/// Pages worth re-reading for the signed-in account's email.
pub fn should_observe(url: &str) -> bool {
    let Some(parsed) = parse_url(url) else {
        return false;
    };
    parsed.host_str().is_some_and(is_governed_host) && !is_identity_surface(&parsed)
}

/// Transition type of the current entry in a serialized
/// `Page.getNavigationHistory` reply; `Other` when it cannot be told.
pub fn transition_from_history(history: &JsonValue) -> TransitionType {
    let index = history
        .get("currentIndex")
        .and_then(JsonValue::as_u64)
        .and_then(|i| usize::try_from(i).ok());
    index
        .and_then(|i| history.get("entries")?.get(i)?.get("transitionType")?.as_str())
        .map(TransitionType::parse)
        .unwrap_or(TransitionType::Other)
}

pub fn tab_navigation(tab_id: String, url: String, transition: TransitionType) -> NavigationEvent {
    NavigationEvent {
        url,
        tab_id,
        frame_id: 0,
        transition,
        channel: NavigationChannel::TabUpdated,
    }
}

/// Tabs that are new or whose URL changed since `previous`.
pub fn diff_tabs(
    previous: &HashMap<String, String>,
    current: &[(String, String)],
) -> Vec<(String, String)> {
    current
        .iter()
        .filter(|(id, url)| !url.is_empty() && previous.get(id) != Some(url))
        .cloned()
        .collect()
}

/// Polls the browser's tab list and turns URL changes into tab-update
/// navigation events.
pub struct TabWatcher {
    host: ChromiumHost,
    navigator: Arc<ChromiumNavigator>,
    service: AuthSlotService,
    shortcuts: Arc<SharedShortcuts>,
    observer: ObserverSettings,
    poll: Duration,
}

impl TabWatcher {
    pub fn new(
        host: ChromiumHost,
        service: AuthSlotService,
        shortcuts: Arc<SharedShortcuts>,
        observer: ObserverSettings,
    ) -> Self {
        Self {
            navigator: host.navigator(),
            host,
            service,
            shortcuts,
            observer,
            poll: DEFAULT_POLL,
        }
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Runs until cancelled.
    pub async fn run(self) {
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut ticker = tokio::time::interval(self.poll);
        loop {
            ticker.tick().await;
            let tabs = match list_tabs(self.host.browser()) {
                Ok(tabs) => tabs,
                Err(err) => {
                    warn!(error = %err, "failed to list tabs");
                    continue;
                }
            };
            let changed = diff_tabs(&seen, &tabs);
            seen = tabs.into_iter().collect();
            for (tab_id, url) in changed {
                if self.host.is_detached(&tab_id) {
                    continue;
                }
                if let Err(err) = self.on_tab_updated(tab_id, url).await {
                    warn!(error = %err, "dropped tab update");
                }
            }
        }
    }

    async fn on_tab_updated(&self, tab_id: String, url: String) -> Result<()> {
        if let Some(target) = self.shortcuts.apply(&url).await {
            debug!(tab = %tab_id, from = %url, to = %target, "shortcut rule applied");
            if let Err(err) = self.navigator.replace_url(&tab_id, &target).await {
                warn!(tab = %tab_id, error = %err, "shortcut redirect failed");
            }
            return Ok(());
        }
        if should_observe(&url) && !self.observer.delays.is_empty() {
            self.spawn_observer(tab_id.clone());
        }
        let browser = self.host.browser().clone();
        let id = tab_id.clone();
        let transition =
            match tokio::task::spawn_blocking(move || current_transition(&browser, &id)).await? {
                Ok(transition) => transition,
                Err(err) => {
                    debug!(tab = %tab_id, error = %err, "navigation history unavailable");
                    TransitionType::Other
                }
            };
        self.service
            .send(Inbound::Navigation(tab_navigation(tab_id, url, transition)))
    }

    fn spawn_observer(&self, tab_id: String) {
        let browser = self.host.browser().clone();
        let service = self.service.clone();
        let settings = self.observer.clone();
        tokio::spawn(async move {
            let mut elapsed = Duration::ZERO;
            for delay in settings.delays {
                tokio::time::sleep(delay.saturating_sub(elapsed)).await;
                elapsed = elapsed.max(delay);

                let browser = browser.clone();
                let id = tab_id.clone();
                let page = tokio::task::spawn_blocking(move || -> Result<Option<(String, String)>> {
                    let Some(tab) = find_tab(&browser, &id)? else {
                        return Ok(None);
                    };
                    Ok(Some((tab.get_url(), tab.get_content()?)))
                })
                .await;
                let (tab_url, html) = match page {
                    Ok(Ok(Some(page))) => page,
                    Ok(Ok(None)) => return,
                    Ok(Err(err)) => {
                        debug!(tab = %tab_id, error = %err, "observer could not read page");
                        continue;
                    }
                    Err(err) => {
                        warn!(error = %err, "observer task failed");
                        return;
                    }
                };
                if !should_observe(&tab_url) {
                    continue;
                }
                let Some(email) = find_email_in_html(&html, &settings.shape) else {
                    continue;
                };
                if service
                    .send(Inbound::FoundEmail { tab_url, email })
                    .is_err()
                {
                    return;
                }
            }
        });
    }
}
