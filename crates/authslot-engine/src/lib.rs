//! Navigation redirect engine, account discovery scanner and the command
//! dispatcher that ties them to a browser host.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use authslot_rules::{ShortcutRule, ShortcutSet};

mod guard;
mod redirect;
mod scanner;
mod service;

pub use guard::{GuardBlock, GuardPhase, RedirectGuard};
pub use redirect::{Decision, PassReason, RedirectEngine};
pub use scanner::{
    AccountScanner, BrowsingSurface, DEFAULT_SCAN_PAGES, DEFAULT_SETTLE, ScanSettings,
    SurfaceFactory,
};
pub use service::{
    AuthSlotService, Inbound, ServiceCore, install_hook, regenerate_shortcuts,
    spawn_preference_watcher,
};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(3000);
pub const DEFAULT_GRACE: Duration = Duration::from_millis(10_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTiming {
    /// Quiet window after an automatic redirect.
    pub cooldown: Duration,
    /// Quiet window after the user used the provider's account switcher.
    pub grace: Duration,
}

impl Default for EngineTiming {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            grace: DEFAULT_GRACE,
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.base + offset
    }
}

/// Replaces the top-level navigation target of a tab.
#[async_trait]
pub trait TabNavigator: Send + Sync {
    async fn replace_url(&self, tab_id: &str, url: &str) -> Result<()>;
}

/// Where static shortcut rules get installed.
#[async_trait]
pub trait ShortcutSink: Send + Sync {
    async fn update_shortcuts(&self, remove_ids: &[u32], add: Vec<ShortcutRule>) -> Result<()>;
}

/// In-process shortcut table the host consults before handing a
/// navigation to the engine.
#[derive(Debug, Default)]
pub struct SharedShortcuts {
    set: RwLock<ShortcutSet>,
}

impl SharedShortcuts {
    pub async fn apply(&self, url: &str) -> Option<String> {
        self.set.read().await.apply(url)
    }

    pub async fn snapshot(&self) -> Vec<ShortcutRule> {
        self.set.read().await.rules().to_vec()
    }
}

#[async_trait]
impl ShortcutSink for SharedShortcuts {
    async fn update_shortcuts(&self, remove_ids: &[u32], add: Vec<ShortcutRule>) -> Result<()> {
        self.set.write().await.replace(remove_ids, add);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;

    use authslot_core::{DetectedAccountState, DetectedAccountStore};

    use super::{BrowsingSurface, SurfaceFactory, TabNavigator};

    #[derive(Default)]
    pub(crate) struct RecordingNavigator {
        pub(crate) calls: Mutex<Vec<(String, String)>>,
        pub(crate) fail: bool,
    }

    impl RecordingNavigator {
        pub(crate) fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TabNavigator for RecordingNavigator {
        async fn replace_url(&self, tab_id: &str, url: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((tab_id.to_string(), url.to_string()));
            if self.fail {
                return Err(anyhow!("tab is gone"));
            }
            Ok(())
        }
    }

    /// Per page: `Ok(html)` or `Err(())` for a failing page script.
    pub(crate) type ScriptedPage = std::result::Result<String, ()>;

    /// A store write that lands while the first page is being read.
    type Interleaved = (Arc<dyn DetectedAccountStore>, DetectedAccountState);

    #[derive(Default)]
    pub(crate) struct ScriptedBrowser {
        pages: Mutex<VecDeque<ScriptedPage>>,
        failing_loads: Vec<usize>,
        interleaved: Mutex<Option<Interleaved>>,
        visited: Arc<Mutex<Vec<String>>>,
        closed: Arc<Mutex<usize>>,
    }

    impl ScriptedBrowser {
        pub(crate) fn new(pages: Vec<ScriptedPage>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                ..Default::default()
            }
        }

        /// Navigation to the page at `index` times out.
        pub(crate) fn with_failing_load(mut self, index: usize) -> Self {
            self.failing_loads.push(index);
            self
        }

        pub(crate) fn with_interleaved_write(
            self,
            store: Arc<dyn DetectedAccountStore>,
            state: DetectedAccountState,
        ) -> Self {
            *self.interleaved.lock().unwrap() = Some((store, state));
            self
        }

        pub(crate) fn visited(&self) -> Vec<String> {
            self.visited.lock().unwrap().clone()
        }

        pub(crate) fn closed(&self) -> usize {
            *self.closed.lock().unwrap()
        }
    }

    pub(crate) struct ScriptedSurface {
        pages: Vec<ScriptedPage>,
        failing_loads: Vec<usize>,
        interleaved: Option<Interleaved>,
        loads: usize,
        visited: Arc<Mutex<Vec<String>>>,
        closed: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl SurfaceFactory for ScriptedBrowser {
        async fn open_detached(&self) -> Result<Box<dyn BrowsingSurface>> {
            let pages: Vec<ScriptedPage> = self.pages.lock().unwrap().drain(..).collect();
            Ok(Box::new(ScriptedSurface {
                pages,
                failing_loads: self.failing_loads.clone(),
                interleaved: self.interleaved.lock().unwrap().take(),
                loads: 0,
                visited: self.visited.clone(),
                closed: self.closed.clone(),
            }))
        }
    }

    #[async_trait]
    impl BrowsingSurface for ScriptedSurface {
        async fn navigate(&mut self, url: &str) -> Result<()> {
            self.visited.lock().unwrap().push(url.to_string());
            let index = self.loads;
            self.loads += 1;
            if self.failing_loads.contains(&index) {
                return Err(anyhow!("navigation timed out"));
            }
            Ok(())
        }

        async fn dom_snapshot(&mut self) -> Result<String> {
            if let Some((store, state)) = self.interleaved.take() {
                store.save_detected(&state).await?;
            }
            let current = self.loads.checked_sub(1).and_then(|i| self.pages.get(i));
            match current {
                Some(Ok(html)) => Ok(html.clone()),
                Some(Err(())) => Err(anyhow!("script execution failed")),
                None => Ok(String::new()),
            }
        }

        async fn close(&mut self) -> Result<()> {
            *self.closed.lock().unwrap() += 1;
            Ok(())
        }
    }
}
