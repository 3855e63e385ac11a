use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use authslot_core::{DetectedAccountStore, ScanReport};
use authslot_dom::{EmailShape, collect_accounts_in_html};

pub const DEFAULT_SCAN_PAGES: [&str; 3] = [
    "https://accounts.google.com/SignOutOptions",
    "https://myaccount.google.com",
    "https://mail.google.com",
];
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(3000);

/// A browsing context the user never sees.
#[async_trait]
pub trait BrowsingSurface: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;
    /// Serialized DOM of whatever the surface currently shows.
    async fn dom_snapshot(&mut self) -> Result<String>;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait SurfaceFactory: Send + Sync {
    /// A blank surface; the scanner navigates it page by page.
    async fn open_detached(&self) -> Result<Box<dyn BrowsingSurface>>;
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub pages: Vec<String>,
    pub settle: Duration,
    pub shape: EmailShape,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            pages: DEFAULT_SCAN_PAGES.iter().map(|p| p.to_string()).collect(),
            settle: DEFAULT_SETTLE,
            shape: EmailShape::default(),
        }
    }
}

pub struct AccountScanner {
    factory: Arc<dyn SurfaceFactory>,
    detected: Arc<dyn DetectedAccountStore>,
    settings: ScanSettings,
}

impl AccountScanner {
    pub fn new(
        factory: Arc<dyn SurfaceFactory>,
        detected: Arc<dyn DetectedAccountStore>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            factory,
            detected,
            settings,
        }
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Visits the candidate pages in order on one detached surface and
    /// merges whatever accounts turn up. Never fails; the report says how
    /// far it got.
    pub async fn scan(&self) -> ScanReport {
        if self.settings.pages.is_empty() {
            return ScanReport {
                success: true,
                accounts_found: 0,
            };
        }

        let mut surface = match self.factory.open_detached().await {
            Ok(surface) => surface,
            Err(err) => {
                warn!(error = %err, "scan aborted: could not open detached surface");
                return ScanReport {
                    success: false,
                    accounts_found: 0,
                };
            }
        };
        let found = self.visit_pages(surface.as_mut()).await;
        if let Err(err) = surface.close().await {
            warn!(error = %err, "failed to close detached surface");
        }
        if found.is_empty() {
            info!("account scan finished without accounts");
            return ScanReport {
                success: true,
                accounts_found: 0,
            };
        }

        // Loaded after the page loop so slots recorded meanwhile are kept.
        let mut state = match self.detected.load_detected().await {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "scan result dropped: detected accounts unavailable");
                return ScanReport {
                    success: false,
                    accounts_found: found.len(),
                };
            }
        };
        let mut success = true;
        if state.merge_scan(&found) {
            if let Err(err) = self.detected.save_detected(&state).await {
                warn!(error = %err, "failed to store scan result");
                success = false;
            }
        }
        info!(accounts = found.len(), count = state.count, "account scan finished");
        ScanReport {
            success,
            accounts_found: found.len(),
        }
    }

    async fn visit_pages(&self, surface: &mut dyn BrowsingSurface) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for page in &self.settings.pages {
            if let Err(err) = surface.navigate(page).await {
                warn!(page = %page, error = %err, "scan page failed to load");
                continue;
            }
            if !self.settings.settle.is_zero() {
                tokio::time::sleep(self.settings.settle).await;
            }
            let html = match surface.dom_snapshot().await {
                Ok(html) => html,
                Err(err) => {
                    warn!(page = %page, error = %err, "scan page script failed");
                    continue;
                }
            };
            let accounts = collect_accounts_in_html(&html, &self.settings.shape);
            debug!(page = %page, found = accounts.len(), "scanned page");
            for account in accounts {
                if !found.contains(&account.email) {
                    found.push(account.email);
                }
            }
            if found.len() > 1 {
                break;
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;

    use authslot_core::{
        AccountSlot, DetectedAccountState, DetectedAccountStore, MemoryAccountStore,
    };
    use authslot_dom::EmailShape;

    use super::{AccountScanner, BrowsingSurface, ScanSettings, SurfaceFactory};
    use crate::testing::ScriptedBrowser;

    fn settings() -> ScanSettings {
        ScanSettings {
            pages: vec![
                "https://accounts.example/one".to_string(),
                "https://accounts.example/two".to_string(),
                "https://accounts.example/three".to_string(),
            ],
            settle: Duration::ZERO,
            shape: EmailShape::new(["example.com"]),
        }
    }

    fn scanner(
        browser: Arc<ScriptedBrowser>,
        store: Arc<MemoryAccountStore>,
    ) -> AccountScanner {
        AccountScanner::new(browser, store, settings())
    }

    #[tokio::test]
    async fn two_accounts_on_first_page_stop_the_scan() -> Result<()> {
        let store = Arc::new(MemoryAccountStore::in_memory());
        let browser = Arc::new(ScriptedBrowser::new(vec![Ok(r#"<ul>
              <li data-email="a@example.com">A</li>
              <li data-email="b@example.com">B</li>
            </ul>"#
            .to_string())]));

        let report = scanner(browser.clone(), store.clone()).scan().await;
        assert!(report.success);
        assert_eq!(report.accounts_found, 2);
        assert_eq!(browser.visited(), vec!["https://accounts.example/one"]);
        assert_eq!(browser.closed(), 1);

        let state = store.load_detected().await?;
        assert_eq!(state.count, 2);
        assert_eq!(state.email_for(AccountSlot::new(0)), Some("a@example.com"));
        assert_eq!(state.email_for(AccountSlot::new(1)), Some("b@example.com"));
        Ok(())
    }

    #[tokio::test]
    async fn count_never_shrinks_on_scan() -> Result<()> {
        let store = Arc::new(MemoryAccountStore::in_memory());
        store
            .save_detected(&DetectedAccountState {
                count: 4,
                ..Default::default()
            })
            .await?;
        let browser = Arc::new(ScriptedBrowser::new(vec![
            Ok("<div data-email=\"a@example.com\"></div>".to_string()),
            Ok("<div data-email=\"b@example.com\"></div>".to_string()),
        ]));

        let report = scanner(browser.clone(), store.clone()).scan().await;
        assert_eq!(report.accounts_found, 2);
        assert_eq!(browser.visited().len(), 2);
        assert_eq!(store.load_detected().await?.count, 4);
        Ok(())
    }

    #[tokio::test]
    async fn failing_pages_leave_state_untouched_and_close_the_surface() -> Result<()> {
        let store = Arc::new(MemoryAccountStore::in_memory());
        let before = DetectedAccountState {
            count: 2,
            emails: [(AccountSlot::new(1), "old@example.com".to_string())]
                .into_iter()
                .collect(),
        };
        store.save_detected(&before).await?;
        let browser = Arc::new(ScriptedBrowser::new(vec![Err(()), Err(()), Err(())]));

        let report = scanner(browser.clone(), store.clone()).scan().await;
        assert!(report.success);
        assert_eq!(report.accounts_found, 0);
        assert_eq!(browser.visited().len(), 3);
        assert_eq!(browser.closed(), 1);
        assert_eq!(store.load_detected().await?, before);
        Ok(())
    }

    #[tokio::test]
    async fn duplicates_across_pages_count_once() -> Result<()> {
        let store = Arc::new(MemoryAccountStore::in_memory());
        let browser = Arc::new(ScriptedBrowser::new(vec![
            Ok("<p>Signed in as a@example.com</p>".to_string()),
            Err(()),
            Ok("<div aria-label=\"Account: A@example.com\"></div>".to_string()),
        ]));

        let report = scanner(browser, store.clone()).scan().await;
        assert_eq!(report.accounts_found, 1);
        let state = store.load_detected().await?;
        assert_eq!(state.count, 1);
        assert_eq!(state.email_for(AccountSlot::new(0)), Some("a@example.com"));
        Ok(())
    }

    #[tokio::test]
    async fn first_page_timeout_does_not_end_the_scan() -> Result<()> {
        let store = Arc::new(MemoryAccountStore::in_memory());
        let browser = Arc::new(
            ScriptedBrowser::new(vec![
                Ok("<div data-email=\"never@example.com\"></div>".to_string()),
                Ok("<div data-email=\"a@example.com\"></div>".to_string()),
                Ok("<div data-email=\"b@example.com\"></div>".to_string()),
            ])
            .with_failing_load(0),
        );

        let report = scanner(browser.clone(), store.clone()).scan().await;
        assert!(report.success);
        assert_eq!(report.accounts_found, 2);
        assert_eq!(browser.visited().len(), 3);
        assert_eq!(browser.closed(), 1);

        let state = store.load_detected().await?;
        assert_eq!(state.email_for(AccountSlot::new(0)), Some("a@example.com"));
        assert_eq!(state.email_for(AccountSlot::new(1)), Some("b@example.com"));
        Ok(())
    }

    #[tokio::test]
    async fn slots_recorded_during_the_scan_are_kept() -> Result<()> {
        let store = Arc::new(MemoryAccountStore::in_memory());
        let mut during = DetectedAccountState::default();
        during.observe_slot(AccountSlot::new(4), Some("e@example.com"));
        let browser = Arc::new(
            ScriptedBrowser::new(vec![Ok(r#"<ul>
                  <li data-email="a@example.com">A</li>
                  <li data-email="b@example.com">B</li>
                </ul>"#
                .to_string())])
            .with_interleaved_write(store.clone(), during),
        );

        let report = scanner(browser, store.clone()).scan().await;
        assert_eq!(report.accounts_found, 2);

        let state = store.load_detected().await?;
        assert_eq!(state.count, 5);
        assert_eq!(state.email_for(AccountSlot::new(1)), Some("b@example.com"));
        assert_eq!(state.email_for(AccountSlot::new(4)), Some("e@example.com"));
        Ok(())
    }

    struct NoSurfaces;

    #[async_trait]
    impl SurfaceFactory for NoSurfaces {
        async fn open_detached(&self) -> Result<Box<dyn BrowsingSurface>> {
            Err(anyhow!("browser not running"))
        }
    }

    #[tokio::test]
    async fn unavailable_browser_reports_failure() -> Result<()> {
        let store = Arc::new(MemoryAccountStore::in_memory());
        let report = AccountScanner::new(Arc::new(NoSurfaces), store.clone(), settings())
            .scan()
            .await;
        assert!(!report.success);
        assert_eq!(report.accounts_found, 0);
        assert_eq!(store.load_detected().await?, DetectedAccountState::default());
        Ok(())
    }
}
