use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use authslot_core::{AccountSlot, DetectedAccountStore, NavigationEvent, PreferenceStore};
use authslot_rules::{
    ServiceRuleTable, extract_slot_from, has_authuser_param, is_account_switcher,
    is_governed_host, is_identity_surface, parse_url,
};

use crate::guard::{GuardBlock, RedirectGuard};
use crate::{Clock, EngineTiming, TabNavigator};

/// Why a navigation was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    NotTopLevel,
    Unparseable,
    OutsideDomain,
    Guard(GuardBlock),
    ManualMode,
    StoreUnavailable,
    AccountSwitcher,
    GracePeriod,
    AlreadyCorrect,
    ExplicitOverride,
    IdentitySurface,
    NoRule,
    ServiceDisabled,
    Unchanged,
    NavigateFailed,
}

impl PassReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotTopLevel => "not_top_level",
            Self::Unparseable => "unparseable_url",
            Self::OutsideDomain => "outside_domain",
            Self::Guard(block) => block.as_str(),
            Self::ManualMode => "manual_mode",
            Self::StoreUnavailable => "store_unavailable",
            Self::AccountSwitcher => "account_switcher",
            Self::GracePeriod => "grace_period",
            Self::AlreadyCorrect => "already_correct",
            Self::ExplicitOverride => "explicit_override",
            Self::IdentitySurface => "identity_surface",
            Self::NoRule => "no_rule",
            Self::ServiceDisabled => "service_disabled",
            Self::Unchanged => "unchanged",
            Self::NavigateFailed => "navigate_failed",
        }
    }
}

impl fmt::Display for PassReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Pass(PassReason),
    Redirect {
        tab_id: String,
        from: String,
        to: String,
    },
}

impl Decision {
    pub fn is_redirect(&self) -> bool {
        matches!(self, Self::Redirect { .. })
    }
}

pub struct RedirectEngine {
    prefs: Arc<dyn PreferenceStore>,
    detected: Arc<dyn DetectedAccountStore>,
    navigator: Arc<dyn TabNavigator>,
    clock: Arc<dyn Clock>,
    rules: ServiceRuleTable,
    timing: EngineTiming,
    guard: Mutex<RedirectGuard>,
}

impl RedirectEngine {
    pub fn new(
        prefs: Arc<dyn PreferenceStore>,
        detected: Arc<dyn DetectedAccountStore>,
        navigator: Arc<dyn TabNavigator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            prefs,
            detected,
            navigator,
            clock,
            rules: ServiceRuleTable::default(),
            timing: EngineTiming::default(),
            guard: Mutex::new(RedirectGuard::default()),
        }
    }

    pub fn with_timing(mut self, timing: EngineTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn guard_snapshot(&self) -> RedirectGuard {
        self.guard().clone()
    }

    fn guard(&self) -> MutexGuard<'_, RedirectGuard> {
        self.guard.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decides one navigation and, when the decision is a redirect, issues it.
    /// Duplicate deliveries of the same navigation collapse on the guard.
    pub async fn handle_navigation(&self, event: &NavigationEvent) -> Decision {
        let decision = self.decide(event).await;
        match &decision {
            Decision::Redirect { from, to, .. } => {
                info!(tab = %event.tab_id, from = %from, to = %to, "redirected navigation");
            }
            Decision::Pass(reason) => {
                debug!(
                    tab = %event.tab_id,
                    url = %event.url,
                    channel = ?event.channel,
                    reason = %reason,
                    "navigation left alone"
                );
            }
        }
        decision
    }

    async fn decide(&self, event: &NavigationEvent) -> Decision {
        if !event.is_top_level() {
            return Decision::Pass(PassReason::NotTopLevel);
        }
        let Some(url) = parse_url(&event.url) else {
            return Decision::Pass(PassReason::Unparseable);
        };
        if !url.host_str().is_some_and(is_governed_host) {
            return Decision::Pass(PassReason::OutsideDomain);
        }
        if let Some(block) = self
            .guard()
            .check(&event.url, self.clock.now(), self.timing.cooldown)
        {
            return Decision::Pass(PassReason::Guard(block));
        }

        match self.detected.manual_mode().await {
            Ok(true) => return Decision::Pass(PassReason::ManualMode),
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, "manual mode unavailable");
                return Decision::Pass(PassReason::StoreUnavailable);
            }
        }

        let wanted = match self.prefs.selected_slot().await {
            Ok(slot) => slot,
            Err(err) => {
                warn!(error = %err, "account preference unavailable");
                return Decision::Pass(PassReason::StoreUnavailable);
            }
        };

        let now = self.clock.now();
        if is_account_switcher(&url, event.transition) {
            self.guard().record_switcher(now);
            return Decision::Pass(PassReason::AccountSwitcher);
        }
        if self.guard().within_grace(now, self.timing.grace) {
            return Decision::Pass(PassReason::GracePeriod);
        }

        let current = extract_slot_from(&url);
        if let Some(slot) = current {
            self.observe_slot(slot).await;
        }
        if current == Some(wanted) {
            return Decision::Pass(PassReason::AlreadyCorrect);
        }
        if has_authuser_param(&url) {
            return Decision::Pass(PassReason::ExplicitOverride);
        }
        if is_identity_surface(&url) {
            return Decision::Pass(PassReason::IdentitySurface);
        }

        let Some(rule) = self.rules.for_url(&url) else {
            return Decision::Pass(PassReason::NoRule);
        };
        match self.prefs.enabled_services().await {
            Ok(services) => {
                if services.get(rule.name) == Some(&false) {
                    return Decision::Pass(PassReason::ServiceDisabled);
                }
            }
            Err(err) => {
                warn!(error = %err, "service flags unavailable");
                return Decision::Pass(PassReason::StoreUnavailable);
            }
        }
        let Some(target) = rule.rewrite(&url, wanted) else {
            return Decision::Pass(PassReason::NoRule);
        };
        let target = target.to_string();
        if target == event.url || target == url.as_str() {
            return Decision::Pass(PassReason::Unchanged);
        }

        let began = self.guard().try_begin(
            &event.url,
            &target,
            self.clock.now(),
            self.timing.cooldown,
        );
        if let Err(block) = began {
            return Decision::Pass(PassReason::Guard(block));
        }
        match self.navigator.replace_url(&event.tab_id, &target).await {
            Ok(()) => {
                self.guard().complete(self.clock.now(), self.timing.cooldown);
                Decision::Redirect {
                    tab_id: event.tab_id.clone(),
                    from: event.url.clone(),
                    to: target,
                }
            }
            Err(err) => {
                warn!(tab = %event.tab_id, error = %err, "redirect failed");
                self.guard().abort();
                Decision::Pass(PassReason::NavigateFailed)
            }
        }
    }

    async fn observe_slot(&self, slot: AccountSlot) {
        match self
            .detected
            .raise_detected_count(slot.index().saturating_add(1))
            .await
        {
            Ok(true) => debug!(slot = %slot, "recorded account slot"),
            Ok(false) => {}
            Err(err) => warn!(error = %err, "failed to record detected slot"),
        }
    }
}
