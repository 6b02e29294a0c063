use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};

/// Per-symbol exponential backoff for consecutive fetch failures.
///
/// The n-th consecutive failure delays the next attempt by
/// `base * 2^(n-1)`, capped at `max`. Other symbols are unaffected.
#[derive(Debug)]
pub struct SymbolBackoff {
    base: Duration,
    max: Duration,
    state: HashMap<String, BackoffState>,
}

#[derive(Debug, Clone, Copy)]
struct BackoffState {
    failures: u32,
    retry_at: DateTime<Utc>,
}

impl SymbolBackoff {
    pub fn new(base_seconds: u64, max_seconds: u64) -> Self {
        Self {
            base: Duration::seconds(base_seconds as i64),
            max: Duration::seconds(max_seconds.max(base_seconds) as i64),
            state: HashMap::new(),
        }
    }

    pub fn is_blocked(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.state
            .get(symbol)
            .is_some_and(|s| now < s.retry_at)
    }

    /// Drop symbols still waiting out their backoff.
    pub fn filter_ready(&self, symbols: BTreeSet<String>, now: DateTime<Utc>) -> BTreeSet<String> {
        symbols
            .into_iter()
            .filter(|s| !self.is_blocked(s, now))
            .collect()
    }

    pub fn record_failure(&mut self, symbol: &str, now: DateTime<Utc>) -> Duration {
        let entry = self.state.entry(symbol.to_string()).or_insert(BackoffState {
            failures: 0,
            retry_at: now,
        });
        entry.failures = entry.failures.saturating_add(1);

        let shift = (entry.failures - 1).min(20);
        let delay = self
            .base
            .checked_mul(1i32 << shift)
            .map_or(self.max, |d| d.min(self.max));
        entry.retry_at = now + delay;

        if entry.failures > 1 {
            tracing::debug!(
                "Backing off {} for {}s after {} consecutive failures",
                symbol,
                delay.num_seconds(),
                entry.failures
            );
        }
        delay
    }

    pub fn record_success(&mut self, symbol: &str) {
        self.state.remove(symbol);
    }

    /// Forget symbols nothing subscribes to any more.
    pub fn prune(&mut self, live: &BTreeSet<String>) {
        self.state.retain(|symbol, _| live.contains(symbol));
    }

    pub fn failures(&self, symbol: &str) -> u32 {
        self.state.get(symbol).map_or(0, |s| s.failures)
    }
}
