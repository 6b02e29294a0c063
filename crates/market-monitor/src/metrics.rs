use std::time::Instant;

/// Counters for the monitoring loop, logged periodically through tracing.
#[derive(Debug, Clone, Default)]
pub struct SchedulerMetrics {
    pub ticks_run: u64,
    pub batches_issued: u64,
    pub batches_failed: u64,
    pub symbols_fetched: u64,
    pub symbols_failed: u64,
    pub alerts_triggered: u64,
    pub threshold_breaches: u64,
    pub tracker_updates: u64,
    pub trackers_dropped: u64,
    pub dispatch_failures: u64,
    pub control_events: u64,

    pub last_tick_duration_ms: u64,
    log_interval_ticks: u64,
}

impl SchedulerMetrics {
    pub fn new(log_interval_ticks: u64) -> Self {
        Self {
            log_interval_ticks,
            ..Default::default()
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn finish_tick(&mut self, tick_start: Instant) {
        self.last_tick_duration_ms = tick_start.elapsed().as_millis() as u64;
        self.ticks_run += 1;

        if self.log_interval_ticks > 0 && self.ticks_run % self.log_interval_ticks == 0 {
            self.log_metrics();
        }
    }

    /// Share of requested symbols that came back (0-100%).
    pub fn fetch_success_rate(&self) -> f64 {
        let total = self.symbols_fetched + self.symbols_failed;
        if total == 0 {
            return 100.0;
        }
        (self.symbols_fetched as f64 / total as f64) * 100.0
    }

    pub fn log_metrics(&self) {
        tracing::info!(
            ticks = self.ticks_run,
            batches = self.batches_issued,
            batches_failed = self.batches_failed,
            symbols_fetched = self.symbols_fetched,
            symbols_failed = self.symbols_failed,
            fetch_success_rate = format!("{:.1}%", self.fetch_success_rate()),
            alerts_triggered = self.alerts_triggered,
            threshold_breaches = self.threshold_breaches,
            tracker_updates = self.tracker_updates,
            trackers_dropped = self.trackers_dropped,
            dispatch_failures = self.dispatch_failures,
            control_events = self.control_events,
            last_tick_ms = self.last_tick_duration_ms,
            "Monitor metrics summary"
        );
    }
}
