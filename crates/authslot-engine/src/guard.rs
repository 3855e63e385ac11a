use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    Idle,
    RedirectInFlight,
}

/// Why the guard refused to let a navigation through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardBlock {
    InFlight,
    Cooldown,
    SameTarget,
}

impl GuardBlock {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InFlight => "redirect_in_flight",
            Self::Cooldown => "cooldown",
            Self::SameTarget => "same_as_last_redirect",
        }
    }
}

/// Process-lifetime redirect bookkeeping. `RedirectInFlight` lapses on its
/// own once the deadline passes, so a lost completion can never wedge it.
#[derive(Debug, Default, Clone)]
pub struct RedirectGuard {
    in_flight_until: Option<Instant>,
    last_redirect_at: Option<Instant>,
    last_redirect_url: Option<String>,
    last_switcher_at: Option<Instant>,
}

impl RedirectGuard {
    pub fn phase(&self, now: Instant) -> GuardPhase {
        match self.in_flight_until {
            Some(until) if now < until => GuardPhase::RedirectInFlight,
            _ => GuardPhase::Idle,
        }
    }

    pub fn check(&self, url: &str, now: Instant, cooldown: Duration) -> Option<GuardBlock> {
        if self.phase(now) == GuardPhase::RedirectInFlight {
            return Some(GuardBlock::InFlight);
        }
        if let Some(at) = self.last_redirect_at {
            if now.saturating_duration_since(at) < cooldown {
                return Some(GuardBlock::Cooldown);
            }
        }
        if self.last_redirect_url.as_deref() == Some(url) {
            return Some(GuardBlock::SameTarget);
        }
        None
    }

    /// Atomically re-checks and enters `RedirectInFlight` toward `target`.
    pub fn try_begin(
        &mut self,
        url: &str,
        target: &str,
        now: Instant,
        cooldown: Duration,
    ) -> Result<(), GuardBlock> {
        if let Some(block) = self.check(url, now, cooldown) {
            return Err(block);
        }
        self.in_flight_until = Some(now + cooldown);
        self.last_redirect_at = Some(now);
        self.last_redirect_url = Some(target.to_string());
        Ok(())
    }

    /// The browser acknowledged the redirect; stay in flight for one more cooldown.
    pub fn complete(&mut self, now: Instant, cooldown: Duration) {
        let until = now + cooldown;
        self.in_flight_until = Some(self.in_flight_until.map_or(until, |u| u.max(until)));
    }

    pub fn abort(&mut self) {
        self.in_flight_until = None;
    }

    pub fn record_switcher(&mut self, now: Instant) {
        self.last_switcher_at = Some(now);
    }

    pub fn within_grace(&self, now: Instant, grace: Duration) -> bool {
        self.last_switcher_at
            .is_some_and(|at| now.saturating_duration_since(at) < grace)
    }
}
