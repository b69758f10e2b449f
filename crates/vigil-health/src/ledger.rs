//! Windowed auto-restart budget.

use std::time::Duration;

use tokio::time::Instant;

/// Counts automatic restarts. The count starts over once more than
/// `window` has passed since the last recorded restart.
#[derive(Debug, Default, Clone)]
pub struct RestartLedger {
    count: u32,
    last_restart: Option<Instant>,
}

impl RestartLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a restart request at `now` and report whether it is within
    /// budget. Denied requests still count.
    pub fn record(&mut self, now: Instant, max_restarts: u32, window: Duration) -> bool {
        if let Some(last) = self.last_restart
            && now.saturating_duration_since(last) > window
        {
            self.count = 0;
        }
        self.count = self.count.saturating_add(1);
        self.last_restart = Some(now);
        self.count <= max_restarts
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn last_restart(&self) -> Option<Instant> {
        self.last_restart
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    #[test]
    fn denies_the_call_after_the_budget() {
        let now = Instant::now();
        let mut ledger = RestartLedger::new();
        for _ in 0..5 {
            assert!(ledger.record(now, 5, DAY));
        }
        assert!(!ledger.record(now, 5, DAY));
        assert_eq!(ledger.count(), 6);
    }

    #[test]
    fn budget_resets_after_window() {
        let start = Instant::now();
        let mut ledger = RestartLedger::new();
        for _ in 0..6 {
            ledger.record(start, 5, DAY);
        }

        // Exactly one window later is still inside it.
        assert!(!ledger.record(start + DAY, 5, DAY));

        let later = start + DAY + DAY + Duration::from_secs(1);
        assert!(ledger.record(later, 5, DAY));
        assert_eq!(ledger.count(), 1);
        assert_eq!(ledger.last_restart(), Some(later));
    }

    #[test]
    fn zero_budget_always_denies() {
        let mut ledger = RestartLedger::new();
        assert!(!ledger.record(Instant::now(), 0, DAY));
    }
}
