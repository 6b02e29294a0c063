use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{MonitorError, MonitorResult};
use crate::types::ChannelId;
use crate::watchlist::WatchEntry;

/// Engine tuning. Every field has a default; hosts override from env.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    // Scheduler
    pub base_tick_seconds: u64,            // 1
    pub alert_check_interval_seconds: u64, // 60
    pub fetch_concurrency_limit: usize,    // 8
    pub fetch_timeout_seconds: u64,        // 10
    pub dispatch_timeout_seconds: u64,     // 5

    // Per-symbol failure backoff
    pub backoff_base_seconds: u64, // 1
    pub backoff_max_seconds: u64,  // 300

    // Trackers
    pub history_capacity: usize,            // 720 samples
    pub min_tracker_interval_seconds: u64,  // 5
    pub max_tracker_interval_seconds: u64,  // 3600

    pub event_channel_capacity: usize,     // 64
    pub metrics_log_interval_ticks: u64,   // 300

    // Threshold watchlist, checked with the alerts
    #[serde(default)]
    pub watchlist: Vec<WatchEntry>,
    #[serde(default)]
    pub watchlist_channel: Option<ChannelId>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_tick_seconds: 1,
            alert_check_interval_seconds: 60,
            fetch_concurrency_limit: 8,
            fetch_timeout_seconds: 10,
            dispatch_timeout_seconds: 5,
            backoff_base_seconds: 1,
            backoff_max_seconds: 300,
            history_capacity: 720,
            min_tracker_interval_seconds: 5,
            max_tracker_interval_seconds: 3600,
            event_channel_capacity: 64,
            metrics_log_interval_ticks: 300,
            watchlist: Vec::new(),
            watchlist_channel: None,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> MonitorResult<()> {
        let positive = [
            ("base_tick_seconds", self.base_tick_seconds),
            ("alert_check_interval_seconds", self.alert_check_interval_seconds),
            ("fetch_timeout_seconds", self.fetch_timeout_seconds),
            ("dispatch_timeout_seconds", self.dispatch_timeout_seconds),
            ("min_tracker_interval_seconds", self.min_tracker_interval_seconds),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(MonitorError::Validation(format!("{} must be > 0", name)));
            }
        }

        if self.fetch_concurrency_limit == 0 || self.event_channel_capacity == 0 {
            return Err(MonitorError::Validation(
                "fetch_concurrency_limit and event_channel_capacity must be > 0".to_string(),
            ));
        }
        if self.history_capacity < 2 {
            return Err(MonitorError::Validation(
                "history_capacity must hold at least 2 samples".to_string(),
            ));
        }
        if self.min_tracker_interval_seconds > self.max_tracker_interval_seconds {
            return Err(MonitorError::Validation(format!(
                "tracker interval bounds inverted: {} > {}",
                self.min_tracker_interval_seconds, self.max_tracker_interval_seconds
            )));
        }
        if self.backoff_base_seconds > self.backoff_max_seconds {
            return Err(MonitorError::Validation(format!(
                "backoff bounds inverted: {} > {}",
                self.backoff_base_seconds, self.backoff_max_seconds
            )));
        }
        if !self.watchlist.is_empty() && self.watchlist_channel.is_none() {
            return Err(MonitorError::Validation(
                "a watchlist needs a channel to post breaches to".to_string(),
            ));
        }
        Ok(())
    }

    /// Watchlist entries that are actually checked.
    pub fn active_watchlist(&self) -> &[WatchEntry] {
        if self.watchlist_channel.is_some() {
            &self.watchlist
        } else {
            &[]
        }
    }

    pub fn base_tick(&self) -> Duration {
        Duration::from_secs(self.base_tick_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_seconds)
    }

    /// Clamp a requested tracker interval into the configured bounds.
    pub fn clamp_tracker_interval(&self, seconds: u64) -> u64 {
        seconds.clamp(
            self.min_tracker_interval_seconds,
            self.max_tracker_interval_seconds,
        )
    }
}
