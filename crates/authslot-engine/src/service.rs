use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use authslot_core::{
    AccountSlot, DetectedAccountStore, NavigationEvent, PreferenceStore, ScanReport,
};
use authslot_dom::EmailShape;
use authslot_rules::{SHORTCUT_RULE_IDS, extract_slot, gmail_button_shortcuts};

use crate::ShortcutSink;
use crate::redirect::RedirectEngine;
use crate::scanner::AccountScanner;

const SERVICE_QUEUE_CAPACITY: usize = 256;

/// Everything the host or the UI layer can ask of the core.
#[derive(Debug)]
pub enum Inbound {
    Navigation(NavigationEvent),
    /// A passive page observer saw `email` on the page at `tab_url`.
    FoundEmail { tab_url: String, email: String },
    ScanForAccounts {
        reply: Option<oneshot::Sender<ScanReport>>,
    },
    PreferenceChanged,
}

/// First-install hook: forget detected accounts and reinstall shortcuts.
pub async fn install_hook(
    prefs: &dyn PreferenceStore,
    detected: &dyn DetectedAccountStore,
    shortcuts: &dyn ShortcutSink,
) -> Result<AccountSlot> {
    shortcuts.update_shortcuts(&SHORTCUT_RULE_IDS, Vec::new()).await?;
    detected.reset_detected().await?;
    let slot = regenerate_shortcuts(prefs, shortcuts).await?;
    info!("install hook completed");
    Ok(slot)
}

pub async fn regenerate_shortcuts(
    prefs: &dyn PreferenceStore,
    shortcuts: &dyn ShortcutSink,
) -> Result<AccountSlot> {
    let slot = prefs.selected_slot().await?;
    shortcuts
        .update_shortcuts(&SHORTCUT_RULE_IDS, gmail_button_shortcuts(slot))
        .await?;
    debug!(slot = %slot, "shortcut rules regenerated");
    Ok(slot)
}

pub struct ServiceCore {
    engine: Arc<RedirectEngine>,
    scanner: Arc<AccountScanner>,
    prefs: Arc<dyn PreferenceStore>,
    detected: Arc<dyn DetectedAccountStore>,
    shortcuts: Arc<dyn ShortcutSink>,
    shape: EmailShape,
}

impl ServiceCore {
    pub fn new(
        engine: Arc<RedirectEngine>,
        scanner: Arc<AccountScanner>,
        prefs: Arc<dyn PreferenceStore>,
        detected: Arc<dyn DetectedAccountStore>,
        shortcuts: Arc<dyn ShortcutSink>,
    ) -> Self {
        let shape = scanner.settings().shape.clone();
        Self {
            engine,
            scanner,
            prefs,
            detected,
            shortcuts,
            shape,
        }
    }

    pub async fn on_installed(&self) -> Result<()> {
        install_hook(
            self.prefs.as_ref(),
            self.detected.as_ref(),
            self.shortcuts.as_ref(),
        )
        .await?;
        Ok(())
    }

    pub async fn on_startup(&self) -> Result<()> {
        self.regenerate_shortcuts().await?;
        Ok(())
    }

    pub async fn regenerate_shortcuts(&self) -> Result<AccountSlot> {
        regenerate_shortcuts(self.prefs.as_ref(), self.shortcuts.as_ref()).await
    }

    /// Records an email sighting against the slot of the reporting page.
    /// Returns whether the stored state changed.
    pub async fn handle_found_email(&self, tab_url: &str, email: &str) -> Result<bool> {
        let Some(email) = self.shape.normalize(email) else {
            debug!(email = %email, "ignoring email outside provider domains");
            return Ok(false);
        };
        let Some(slot) = extract_slot(tab_url) else {
            debug!(url = %tab_url, "email sighting on a page without a slot");
            return Ok(false);
        };
        let raised = self
            .detected
            .raise_detected_count(slot.index().saturating_add(1))
            .await?;
        let recorded = self.detected.record_account_email(slot, &email).await?;
        if recorded {
            info!(slot = %slot, email = %email, "recorded account email");
        }
        Ok(raised || recorded)
    }

    async fn dispatch(self: Arc<Self>, inbound: Inbound) {
        match inbound {
            Inbound::Navigation(event) => {
                tokio::spawn(async move {
                    self.engine.handle_navigation(&event).await;
                });
            }
            Inbound::FoundEmail { tab_url, email } => {
                if let Err(err) = self.handle_found_email(&tab_url, &email).await {
                    warn!(error = %err, "failed to record email sighting");
                }
            }
            Inbound::ScanForAccounts { reply } => {
                tokio::spawn(async move {
                    let report = self.scanner.scan().await;
                    if let Some(reply) = reply {
                        let _ = reply.send(report);
                    }
                });
            }
            Inbound::PreferenceChanged => {
                if let Err(err) = self.regenerate_shortcuts().await {
                    warn!(error = %err, "failed to regenerate shortcut rules");
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct AuthSlotService {
    tx: mpsc::Sender<Inbound>,
}

impl AuthSlotService {
    pub fn start(core: Arc<ServiceCore>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Inbound>(SERVICE_QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(inbound) = rx.recv().await {
                core.clone().dispatch(inbound).await;
            }
            debug!("service loop stopped");
        });
        Self { tx }
    }

    pub fn send(&self, inbound: Inbound) -> Result<()> {
        match self.tx.try_send(inbound) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(inbound)) => {
                debug!(?inbound, "service queue full, dropping");
                Err(anyhow!("service command queue full"))
            }
            Err(TrySendError::Closed(_)) => Err(anyhow!("service command queue closed")),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn scan_for_accounts(&self) -> Result<ScanReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Inbound::ScanForAccounts { reply: Some(reply) })?;
        rx.await.map_err(|_| anyhow!("scan ended without a report"))
    }
}

/// Polls the preferred slot and reports changes to the service.
pub fn spawn_preference_watcher(
    prefs: Arc<dyn PreferenceStore>,
    service: AuthSlotService,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = prefs.selected_slot().await.ok();
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let current = match prefs.selected_slot().await {
                Ok(slot) => Some(slot),
                Err(err) => {
                    warn!(error = %err, "preference watcher read failed");
                    continue;
                }
            };
            if current != last {
                last = current;
                if let Err(err) = service.send(Inbound::PreferenceChanged) {
                    warn!(error = %err, "preference change not delivered");
                    if service.is_closed() {
                        break;
                    }
                }
            }
        }
    })
}
