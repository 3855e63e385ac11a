//! Chromium host adapter: detached surfaces for the scanner, navigation
//! replacement for the redirect engine and a tab watcher feeding both.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab};
use tracing::{debug, info};

use authslot_core::{TransitionType, env_flag};
use authslot_engine::{BrowsingSurface, SurfaceFactory, TabNavigator};

mod watcher;

pub use watcher::{
    ObserverSettings, TabWatcher, diff_tabs, should_observe, tab_navigation,
    transition_from_history,
};

const IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);
const FALLBACK_CHROME: &str = "/usr/bin/chromium";

#[derive(Debug, Clone, Default)]
pub struct ChromiumConfig {
    pub chrome_path: Option<PathBuf>,
    pub no_sandbox: bool,
    pub headless: bool,
    /// Attach to an already running browser instead of launching one.
    pub debug_ws_url: Option<String>,
}

impl ChromiumConfig {
    /// Fills unset fields from `AUTHSLOT_CHROME_PATH`, `CHROME_PATH` and
    /// `AUTHSLOT_CHROME_NO_SANDBOX`.
    pub fn with_env(mut self) -> Self {
        if self.chrome_path.is_none() {
            self.chrome_path = resolve_chrome_path(
                std::env::var("AUTHSLOT_CHROME_PATH").ok(),
                std::env::var("CHROME_PATH").ok(),
            );
        }
        if !self.no_sandbox {
            self.no_sandbox = env_flag("AUTHSLOT_CHROME_NO_SANDBOX");
        }
        self
    }
}

fn resolve_chrome_path(primary: Option<String>, secondary: Option<String>) -> Option<PathBuf> {
    primary
        .filter(|p| !p.trim().is_empty())
        .or_else(|| secondary.filter(|p| !p.trim().is_empty()))
        .map(PathBuf::from)
        .or_else(|| {
            let fallback = PathBuf::from(FALLBACK_CHROME);
            if fallback.exists() {
                Some(fallback)
            } else {
                None
            }
        })
}

type DetachedTabs = Arc<Mutex<HashSet<String>>>;

/// A launched or attached browser. Cheap to clone.
#[derive(Clone)]
pub struct ChromiumHost {
    browser: Browser,
    detached: DetachedTabs,
}

impl ChromiumHost {
    pub async fn start(config: ChromiumConfig) -> Result<Self> {
        let browser = tokio::task::spawn_blocking(move || -> Result<Browser> {
            if let Some(ws_url) = config.debug_ws_url {
                info!(url = %ws_url, "attaching to running browser");
                return Browser::connect_with_timeout(ws_url, IDLE_TIMEOUT);
            }
            let mut builder = LaunchOptionsBuilder::default();
            builder.headless(config.headless);
            builder.idle_browser_timeout(IDLE_TIMEOUT);
            if config.no_sandbox {
                builder.sandbox(false);
            }
            if let Some(path) = config.chrome_path {
                builder.path(Some(path));
            }
            let options = builder.build().map_err(|e| anyhow!(e))?;
            Browser::new(options).map_err(|e| {
                anyhow!(
                    "failed to launch Chromium (try AUTHSLOT_CHROME_PATH=/usr/bin/chromium or AUTHSLOT_CHROME_NO_SANDBOX=1): {}",
                    e
                )
            })
        })
        .await??;
        Ok(Self {
            browser,
            detached: DetachedTabs::default(),
        })
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    pub fn surface_factory(&self) -> Arc<ChromiumSurfaceFactory> {
        Arc::new(ChromiumSurfaceFactory {
            browser: self.browser.clone(),
            detached: self.detached.clone(),
        })
    }

    /// Tabs owned by a scan; the watcher leaves them alone.
    pub fn is_detached(&self, tab_id: &str) -> bool {
        self.detached
            .lock()
            .map(|set| set.contains(tab_id))
            .unwrap_or(false)
    }

    pub fn navigator(&self) -> Arc<ChromiumNavigator> {
        Arc::new(ChromiumNavigator {
            browser: self.browser.clone(),
        })
    }
}

pub(crate) fn find_tab(browser: &Browser, tab_id: &str) -> Result<Option<Arc<Tab>>> {
    let tabs = browser
        .get_tabs()
        .lock()
        .map_err(|_| anyhow!("tab list poisoned"))?;
    Ok(tabs
        .iter()
        .find(|tab| tab.get_target_id().as_str() == tab_id)
        .cloned())
}

/// How the tab arrived at the entry it currently shows.
pub(crate) fn current_transition(browser: &Browser, tab_id: &str) -> Result<TransitionType> {
    let Some(tab) = find_tab(browser, tab_id)? else {
        return Ok(TransitionType::Other);
    };
    let history = tab.call_method(Page::GetNavigationHistory(None))?;
    Ok(transition_from_history(&serde_json::to_value(&history)?))
}

pub(crate) fn list_tabs(browser: &Browser) -> Result<Vec<(String, String)>> {
    let tabs = browser
        .get_tabs()
        .lock()
        .map_err(|_| anyhow!("tab list poisoned"))?;
    Ok(tabs
        .iter()
        .map(|tab| (tab.get_target_id().to_string(), tab.get_url()))
        .collect())
}

pub struct ChromiumSurfaceFactory {
    browser: Browser,
    detached: DetachedTabs,
}

#[async_trait]
impl SurfaceFactory for ChromiumSurfaceFactory {
    async fn open_detached(&self) -> Result<Box<dyn BrowsingSurface>> {
        let browser = self.browser.clone();
        let detached = self.detached.clone();
        let tab = tokio::task::spawn_blocking(move || -> Result<Arc<Tab>> {
            let tab = browser.new_tab()?;
            if let Ok(mut set) = detached.lock() {
                set.insert(tab.get_target_id().to_string());
            }
            Ok(tab)
        })
        .await??;
        debug!(tab = %tab.get_target_id(), "opened detached surface");
        Ok(Box::new(ChromiumSurface {
            tab: Some(tab),
            detached: self.detached.clone(),
        }))
    }
}

pub struct ChromiumSurface {
    tab: Option<Arc<Tab>>,
    detached: DetachedTabs,
}

impl ChromiumSurface {
    fn tab(&self) -> Result<Arc<Tab>> {
        self.tab
            .clone()
            .ok_or_else(|| anyhow!("detached surface already closed"))
    }
}

#[async_trait]
impl BrowsingSurface for ChromiumSurface {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let tab = self.tab()?;
        let url = url.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await?
    }

    async fn dom_snapshot(&mut self) -> Result<String> {
        let tab = self.tab()?;
        tokio::task::spawn_blocking(move || tab.get_content()).await?
    }

    async fn close(&mut self) -> Result<()> {
        let Some(tab) = self.tab.take() else {
            return Ok(());
        };
        let tab_id = tab.get_target_id().to_string();
        let closed = tokio::task::spawn_blocking(move || tab.close(false)).await?;
        if let Ok(mut set) = self.detached.lock() {
            set.remove(&tab_id);
        }
        closed?;
        Ok(())
    }
}

pub struct ChromiumNavigator {
    browser: Browser,
}

#[async_trait]
impl TabNavigator for ChromiumNavigator {
    async fn replace_url(&self, tab_id: &str, url: &str) -> Result<()> {
        let browser = self.browser.clone();
        let tab_id = tab_id.to_string();
        let url = url.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let tab = find_tab(&browser, &tab_id)?
                .ok_or_else(|| anyhow!("tab {} is gone", tab_id))?;
            tab.navigate_to(&url)?;
            Ok(())
        })
        .await?
    }
}
