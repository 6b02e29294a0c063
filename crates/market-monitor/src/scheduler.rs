//! Monitoring loop
//!
//! One tick: collect due subscriptions under a read lock, issue a single
//! batched fetch for their symbols, apply results under a write lock, then
//! dispatch notifications concurrently with no lock held. Interactive
//! controls arrive on a bounded channel and are handled between ticks.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap, HashSet};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::backoff::SymbolBackoff;
use crate::error::{DispatchError, MonitorError};
use crate::evaluator::{self, Trigger};
use crate::metrics::SchedulerMetrics;
use crate::service::{with_timeout, MonitorService};
use crate::stats::{self, TrackerDetails};
use crate::types::{ChannelId, MessageRef, PriceSnapshot, Tracker};
use crate::watchlist::{Breach, WatchState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Stop,
    ShowDetails,
}

/// A user interaction with a live tracker (e.g. a reaction on its message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    pub action: ControlAction,
    pub symbol: String,
    pub channel: ChannelId,
    /// Id of the user who triggered the event.
    pub actor: u64,
}

pub fn control_channel(capacity: usize) -> (mpsc::Sender<ControlEvent>, mpsc::Receiver<ControlEvent>) {
    mpsc::channel(capacity.max(1))
}

/// What a single tick did. Mostly useful to tests and debug logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub requested: usize,
    pub fetched: usize,
    pub failed: usize,
    pub alerts_triggered: usize,
    pub thresholds_breached: usize,
    pub trackers_updated: usize,
    pub trackers_dropped: usize,
}

struct TrackerUpdate {
    handle: MessageRef,
    tracker: Tracker,
    details: TrackerDetails,
}

pub struct Scheduler {
    service: MonitorService,
    events: mpsc::Receiver<ControlEvent>,
    backoff: SymbolBackoff,
    metrics: SchedulerMetrics,
    last_alert_check: Option<DateTime<Utc>>,
    /// Alert symbols whose last evaluation was missed; retried every tick.
    alert_retry: BTreeSet<String>,
    watch_state: WatchState,
}

impl Scheduler {
    pub fn new(service: MonitorService, events: mpsc::Receiver<ControlEvent>) -> Self {
        let config = service.config();
        let backoff = SymbolBackoff::new(config.backoff_base_seconds, config.backoff_max_seconds);
        let metrics = SchedulerMetrics::new(config.metrics_log_interval_ticks);
        Self {
            service,
            events,
            backoff,
            metrics,
            last_alert_check: None,
            alert_retry: BTreeSet::new(),
            watch_state: WatchState::new(),
        }
    }

    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }

    /// Run until `shutdown` flips to true (or its sender is dropped), then
    /// save alerts one last time.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.service.config().base_tick());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Monitor loop started (tick {}s, alert check {}s, source {})",
            self.service.config().base_tick_seconds,
            self.service.config().alert_check_interval_seconds,
            self.service.source().name()
        );

        let stopped = *shutdown.borrow();
        if !stopped {
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.tick_at(Utc::now()).await;
                    }
                    Some(event) = self.events.recv() => {
                        self.handle_event(event).await;
                    }
                    changed = shutdown.changed() => {
                        let stop = changed.is_err() || *shutdown.borrow();
                        if stop {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("Monitor loop stopping, saving alerts");
        self.service.persist_alerts().await;
        self.metrics.log_metrics();
    }

    pub async fn handle_event(&mut self, event: ControlEvent) {
        self.metrics.control_events += 1;
        let result = match event.action {
            ControlAction::Stop => self
                .service
                .stop_tracking(event.channel, &event.symbol)
                .await
                .map(|_| ()),
            ControlAction::ShowDetails => self
                .service
                .show_details(event.channel, &event.symbol)
                .await
                .map(|_| ()),
        };

        match result {
            Ok(()) => tracing::debug!(
                "Handled {:?} for {} from user {}",
                event.action,
                event.symbol,
                event.actor
            ),
            Err(MonitorError::NotFound(_)) => tracing::debug!(
                "Ignoring {:?} for inactive tracker {}",
                event.action,
                event.symbol
            ),
            Err(e) => tracing::warn!("Control event for {} failed: {}", event.symbol, e),
        }
    }

    /// Run exactly one tick as of `now`.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> TickReport {
        let tick_start = SchedulerMetrics::start_timer();
        let report = self.run_tick(now).await;
        self.metrics.finish_tick(tick_start);
        report
    }

    async fn run_tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        let config = self.service.config().clone();

        let alerts_due = self.last_alert_check.map_or(true, |last| {
            now - last >= Duration::seconds(config.alert_check_interval_seconds as i64)
        });

        let watchlist = config.active_watchlist();

        // Phase 1: what is due
        let (mut due, due_trackers) = {
            let registry = self.service.registry().read().await;
            let mut due = registry.due_symbols(now, alerts_due);
            if alerts_due {
                due.alert_symbols
                    .extend(watchlist.iter().map(|w| w.ticker.clone()));
            }

            let mut live_alert_symbols = registry.alert_symbols();
            live_alert_symbols.extend(watchlist.iter().map(|w| w.ticker.clone()));
            self.alert_retry.retain(|s| live_alert_symbols.contains(s));
            due.alert_symbols.extend(self.alert_retry.iter().cloned());

            let mut live = live_alert_symbols;
            live.extend(registry.tracker_symbols());
            self.backoff.prune(&live);

            (due, registry.due_trackers(now))
        };
        if alerts_due {
            self.last_alert_check = Some(now);
        }

        let requested = self.backoff.filter_ready(due.union(), now);
        report.requested = requested.len();
        if requested.is_empty() {
            self.alert_retry = std::mem::take(&mut due.alert_symbols);
            return report;
        }

        // Phase 2: one batched fetch
        self.metrics.batches_issued += 1;
        let prices: HashMap<String, PriceSnapshot> = match tokio::time::timeout(
            config.fetch_timeout(),
            self.service.source().batch_fetch(&requested),
        )
        .await
        {
            Ok(Ok(prices)) => prices
                .into_iter()
                .map(|(symbol, snapshot)| (symbol.to_uppercase(), snapshot))
                .collect(),
            Ok(Err(e)) => {
                self.metrics.batches_failed += 1;
                tracing::warn!("Batch fetch of {} symbols failed: {}", requested.len(), e);
                HashMap::new()
            }
            Err(_) => {
                self.metrics.batches_failed += 1;
                tracing::warn!(
                    "Batch fetch of {} symbols timed out after {}s",
                    requested.len(),
                    config.fetch_timeout_seconds
                );
                HashMap::new()
            }
        };

        for symbol in &requested {
            if prices.contains_key(symbol) {
                self.backoff.record_success(symbol);
                report.fetched += 1;
            } else {
                self.backoff.record_failure(symbol, now);
                report.failed += 1;
            }
        }
        self.metrics.symbols_fetched += report.fetched as u64;
        self.metrics.symbols_failed += report.failed as u64;

        self.alert_retry = due
            .alert_symbols
            .iter()
            .filter(|s| !prices.contains_key(*s))
            .cloned()
            .collect();

        // Phase 3: evaluate and mutate under the write lock
        let evaluated: BTreeSet<String> = due
            .alert_symbols
            .iter()
            .filter(|s| prices.contains_key(*s))
            .cloned()
            .collect();

        let (triggers, updates) = {
            let mut registry = self.service.registry().write().await;

            let candidates: Vec<Trigger> = registry
                .alerts_for(&evaluated)
                .iter()
                .filter_map(|alert| {
                    prices
                        .get(&alert.ticker)
                        .and_then(|snapshot| evaluator::evaluate(alert, snapshot))
                })
                .collect();

            // Only the removal that succeeds may notify.
            let triggers: Vec<Trigger> = candidates
                .into_iter()
                .filter(|t| {
                    registry
                        .remove_alert_by_id(t.alert.channel_id, t.alert.id)
                        .is_some()
                })
                .collect();

            let mut updates = Vec::new();
            for (symbol, channel, id) in &due_trackers {
                let Some(snapshot) = prices.get(symbol) else {
                    continue;
                };
                // Stopped or replaced since phase 1: discard.
                let Some(tracker) = registry.tracker_mut_by_id(symbol, *channel, *id) else {
                    continue;
                };
                tracker.apply(snapshot.clone(), now);
                report.trackers_updated += 1;
                if let Some(handle) = tracker.message_ref {
                    updates.push(TrackerUpdate {
                        handle,
                        details: stats::details(tracker),
                        tracker: tracker.clone(),
                    });
                }
            }

            (triggers, updates)
        };

        // Watchlist state is owned by the loop; no lock needed.
        let breaches: Vec<Breach> = watchlist
            .iter()
            .filter(|w| evaluated.contains(&w.ticker))
            .filter_map(|w| {
                prices
                    .get(&w.ticker)
                    .and_then(|snapshot| self.watch_state.check(w, snapshot))
            })
            .collect();

        report.alerts_triggered = triggers.len();
        report.thresholds_breached = breaches.len();
        self.metrics.alerts_triggered += triggers.len() as u64;
        self.metrics.threshold_breaches += breaches.len() as u64;
        for b in &breaches {
            tracing::info!(
                "{} {:?} watchlist threshold: {:.2} vs {:.2}",
                b.entry.ticker,
                b.side,
                b.snapshot.price,
                b.threshold()
            );
        }
        self.metrics.tracker_updates += report.trackers_updated as u64;

        if !triggers.is_empty() {
            for t in &triggers {
                tracing::info!(
                    "Alert triggered: {} {} {} at {:.2} ({:+.2}%) in channel {}",
                    t.alert.ticker,
                    t.alert.kind,
                    t.alert.target,
                    t.snapshot.price,
                    t.change_percent,
                    t.alert.channel_id
                );
            }
            self.service.persist_alerts().await;
        }

        // Phase 4: notify without holding the lock
        let dispatcher = self.service.dispatcher().clone();
        let limit = config.dispatch_timeout();

        let alert_sends = join_all(triggers.iter().map(|t| {
            let dispatcher = dispatcher.clone();
            async move { with_timeout(limit, dispatcher.render_triggered_alert(t)).await }
        }));
        let tracker_sends = join_all(updates.iter().map(|u| {
            let dispatcher = dispatcher.clone();
            async move {
                with_timeout(limit, dispatcher.update_tracker(&u.handle, &u.tracker, &u.details))
                    .await
            }
        }));
        let breach_sends = join_all(breaches.iter().filter_map(|b| {
            let channel = config.watchlist_channel?;
            let dispatcher = dispatcher.clone();
            Some(async move { with_timeout(limit, dispatcher.render_breach(channel, b)).await })
        }));
        let (alert_results, tracker_results, breach_results) =
            tokio::join!(alert_sends, tracker_sends, breach_sends);

        for result in breach_results {
            if let Err(e) = result {
                self.metrics.dispatch_failures += 1;
                tracing::warn!("Failed to send watchlist breach: {}", e);
            }
        }

        let mut gone_channels = HashSet::new();
        for (trigger, result) in triggers.iter().zip(alert_results) {
            match result {
                Ok(()) => {}
                Err(DispatchError::Gone) => {
                    gone_channels.insert(trigger.alert.channel_id);
                }
                Err(e) => {
                    self.metrics.dispatch_failures += 1;
                    tracing::warn!("Failed to send {} alert: {}", trigger.alert.ticker, e);
                }
            }
        }
        for channel in gone_channels {
            self.service.purge_channel(channel).await;
        }

        let mut gone_trackers = Vec::new();
        for (update, result) in updates.iter().zip(tracker_results) {
            match result {
                Ok(()) => tracing::debug!(
                    "Updated {} tracker: {:.4}",
                    update.tracker.symbol,
                    update.tracker.current_price()
                ),
                Err(DispatchError::Gone) => gone_trackers.push(update),
                Err(e) => {
                    self.metrics.dispatch_failures += 1;
                    tracing::warn!("Failed to update {} tracker: {}", update.tracker.symbol, e);
                }
            }
        }

        if !gone_trackers.is_empty() {
            let mut registry = self.service.registry().write().await;
            for update in gone_trackers {
                let t = &update.tracker;
                if registry
                    .remove_tracker_by_id(&t.symbol, t.channel_id, t.id)
                    .is_some()
                {
                    report.trackers_dropped += 1;
                    tracing::info!(
                        "Tracker message for {} in channel {} is gone, stopping",
                        t.symbol,
                        t.channel_id
                    );
                }
            }
        }
        self.metrics.trackers_dropped += report.trackers_dropped as u64;

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::testing::{harness, harness_with, Harness};
    use crate::types::{Alert, AlertKind, PriceSnapshot};
    use crate::watchlist::WatchEntry;
    use chrono::TimeZone;
    use std::sync::atomic::Ordering;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 30, 0).unwrap()
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(seconds)
    }

    fn scheduler(h: &Harness) -> (Scheduler, mpsc::Sender<ControlEvent>) {
        let (tx, rx) = control_channel(8);
        (Scheduler::new(h.service.clone(), rx), tx)
    }

    async fn add_tracker(h: &Harness, symbol: &str, channel: u64, interval: u64, message_id: u64) -> u64 {
        let mut tracker = Tracker::new(
            ChannelId(channel),
            interval,
            PriceSnapshot::new(symbol, 100.0, t0()),
            720,
            t0(),
        );
        tracker.message_ref = Some(MessageRef {
            channel_id: ChannelId(channel),
            message_id,
        });
        h.service.registry().write().await.add_tracker(tracker).0
    }

    async fn add_alert(h: &Harness, channel: u64, ticker: &str, kind: AlertKind, target: f64, reference: f64) {
        h.service
            .registry()
            .write()
            .await
            .add_alert(Alert::new(ChannelId(channel), ticker, kind, target, reference));
    }

    #[tokio::test]
    async fn test_tracker_updates_only_when_interval_elapsed() {
        let h = harness();
        h.source.set_price("BTC-USDT", 50_100.0);
        add_tracker(&h, "BTC-USDT", 1, 30, 10).await;
        let (mut s, _tx) = scheduler(&h);

        for secs in [10, 20] {
            let report = s.tick_at(at(secs)).await;
            assert_eq!(report.trackers_updated, 0, "t={secs}");
        }
        assert_eq!(s.tick_at(at(30)).await.trackers_updated, 1);
        assert_eq!(s.tick_at(at(40)).await.trackers_updated, 0);

        assert_eq!(h.dispatcher.events(), vec!["update:BTC-USDT:10".to_string()]);
        let registry = h.service.registry().read().await;
        let tracker = registry.tracker("BTC-USDT", ChannelId(1)).unwrap();
        assert_eq!(tracker.last_update, at(30));
        assert_eq!(tracker.stats.sample_count(), 2);
    }

    #[tokio::test]
    async fn test_alert_triggers_exactly_once() {
        let h = harness();
        add_alert(&h, 1, "AAPL", AlertKind::Percent, 5.0, 100.0).await;
        let (mut s, _tx) = scheduler(&h);

        h.source.set_price("AAPL", 101.0);
        assert_eq!(s.tick_at(at(0)).await.alerts_triggered, 0);

        h.source.set_price("AAPL", 104.0);
        assert_eq!(s.tick_at(at(60)).await.alerts_triggered, 0);

        h.source.set_price("AAPL", 106.0);
        assert_eq!(s.tick_at(at(120)).await.alerts_triggered, 1);
        assert!(h.service.list_alerts(ChannelId(1)).await.is_empty());
        assert_eq!(h.store.saved_count(), 0);

        // No further evaluation once removed
        h.source.set_price("AAPL", 120.0);
        let report = s.tick_at(at(180)).await;
        assert_eq!(report.requested, 0);
        assert_eq!(h.dispatcher.count("alert:AAPL"), 1);
    }

    #[tokio::test]
    async fn test_alerts_checked_on_their_own_cadence() {
        let h = harness();
        h.source.set_price("AAPL", 100.0);
        add_alert(&h, 1, "AAPL", AlertKind::Price, 150.0, 100.0).await;
        let (mut s, _tx) = scheduler(&h);

        assert_eq!(s.tick_at(at(0)).await.requested, 1);
        assert_eq!(s.tick_at(at(1)).await.requested, 0);
        assert_eq!(s.tick_at(at(59)).await.requested, 0);
        assert_eq!(s.tick_at(at(60)).await.requested, 1);
    }

    #[tokio::test]
    async fn test_one_batch_for_shared_symbols() {
        let h = harness();
        h.source.set_price("AAPL", 100.0);
        h.source.set_price("BTC-USDT", 60_000.0);
        add_alert(&h, 1, "AAPL", AlertKind::Price, 150.0, 100.0).await;
        add_alert(&h, 2, "AAPL", AlertKind::Price, 50.0, 100.0).await;
        add_tracker(&h, "AAPL", 3, 5, 1).await;
        add_tracker(&h, "BTC-USDT", 3, 5, 2).await;
        let (mut s, _tx) = scheduler(&h);

        let report = s.tick_at(at(5)).await;
        assert_eq!(h.source.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.source.last_request(), vec!["AAPL".to_string(), "BTC-USDT".to_string()]);
        assert_eq!(report.trackers_updated, 2);
    }

    #[tokio::test]
    async fn test_partial_failure_skips_only_failed_symbols() {
        let h = harness();
        for (i, symbol) in ["AAPL", "MSFT", "NVDA"].iter().enumerate() {
            h.source.set_price(symbol, 100.0);
            add_tracker(&h, symbol, 1, 30, i as u64 + 1).await;
        }
        h.source.fail("MSFT");
        let (mut s, _tx) = scheduler(&h);

        let report = s.tick_at(at(30)).await;
        assert_eq!(report.fetched, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.trackers_updated, 2);

        {
            let registry = h.service.registry().read().await;
            assert_eq!(registry.tracker("AAPL", ChannelId(1)).unwrap().last_update, at(30));
            assert_eq!(registry.tracker("MSFT", ChannelId(1)).unwrap().last_update, t0());
        }

        // Failed symbol is retried on the next tick
        h.source.recover("MSFT");
        let report = s.tick_at(at(31)).await;
        assert_eq!(report.requested, 1);
        assert_eq!(report.trackers_updated, 1);
    }

    #[tokio::test]
    async fn test_total_failure_keeps_loop_alive() {
        let h = harness();
        h.source.set_price("AAPL", 200.0);
        add_alert(&h, 1, "AAPL", AlertKind::Price, 150.0, 100.0).await;
        add_tracker(&h, "AAPL", 2, 30, 1).await;
        let (mut s, _tx) = scheduler(&h);

        h.source.set_down(true);
        let report = s.tick_at(at(30)).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.alerts_triggered, 0);
        assert_eq!(report.trackers_updated, 0);
        assert_eq!(s.metrics().batches_failed, 1);

        // Alert is retried before its next scheduled check
        h.source.set_down(false);
        let report = s.tick_at(at(31)).await;
        assert_eq!(report.alerts_triggered, 1);
        assert_eq!(report.trackers_updated, 1);
    }

    #[tokio::test]
    async fn test_failing_symbol_backs_off() {
        let h = harness_with(MonitorConfig {
            backoff_base_seconds: 1,
            backoff_max_seconds: 300,
            ..Default::default()
        });
        h.source.set_price("AAPL", 100.0);
        add_tracker(&h, "AAPL", 1, 5, 1).await;
        add_tracker(&h, "TSLA", 1, 5, 2).await;
        h.source.fail("TSLA");
        let (mut s, _tx) = scheduler(&h);

        s.tick_at(at(5)).await; // TSLA fails once: retry at 6
        s.tick_at(at(6)).await; // fails twice: retry at 8
        let report = s.tick_at(at(7)).await;
        assert_eq!(h.source.last_request(), vec!["TSLA".to_string()]);
        assert_eq!(report.requested, 0);

        let report = s.tick_at(at(8)).await;
        assert_eq!(report.requested, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_gone_display_stops_tracker() {
        let h = harness();
        h.source.set_price("ETH-USDT", 3_000.0);
        add_tracker(&h, "ETH-USDT", 1, 30, 42).await;
        add_tracker(&h, "ETH-USDT", 2, 30, 43).await;
        h.dispatcher.delete_message(42);
        let (mut s, _tx) = scheduler(&h);

        let report = s.tick_at(at(30)).await;
        assert_eq!(report.trackers_dropped, 1);

        let registry = h.service.registry().read().await;
        assert!(registry.tracker("ETH-USDT", ChannelId(1)).is_none());
        assert!(registry.tracker("ETH-USDT", ChannelId(2)).is_some());
    }

    #[tokio::test]
    async fn test_gone_channel_purges_alerts() {
        let h = harness();
        h.source.set_price("AAPL", 200.0);
        add_alert(&h, 7, "AAPL", AlertKind::Price, 150.0, 100.0).await;
        add_alert(&h, 7, "MSFT", AlertKind::Price, 500.0, 400.0).await;
        h.source.set_price("MSFT", 410.0);
        h.dispatcher.delete_channel(ChannelId(7));
        let (mut s, _tx) = scheduler(&h);

        assert_eq!(s.tick_at(at(0)).await.alerts_triggered, 1);
        assert!(h.service.list_alerts(ChannelId(7)).await.is_empty());
        assert_eq!(h.store.saved_count(), 0);
    }

    #[tokio::test]
    async fn test_control_events() {
        let h = harness();
        h.source.set_price("SOL-USDT", 150.0);
        add_tracker(&h, "SOL-USDT", 4, 30, 9).await;
        let (mut s, _tx) = scheduler(&h);

        s.handle_event(ControlEvent {
            action: ControlAction::ShowDetails,
            symbol: "SOL-USDT".to_string(),
            channel: ChannelId(4),
            actor: 1,
        })
        .await;
        s.handle_event(ControlEvent {
            action: ControlAction::Stop,
            symbol: "SOL-USDT".to_string(),
            channel: ChannelId(4),
            actor: 1,
        })
        .await;
        // Stopping twice is harmless
        s.handle_event(ControlEvent {
            action: ControlAction::Stop,
            symbol: "SOL-USDT".to_string(),
            channel: ChannelId(4),
            actor: 1,
        })
        .await;

        assert_eq!(
            h.dispatcher.events(),
            vec!["details:SOL-USDT".to_string(), "stopped:SOL-USDT:9".to_string()]
        );
        assert_eq!(s.metrics().control_events, 3);
        assert_eq!(s.tick_at(at(30)).await.trackers_updated, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_saves() {
        let h = harness();
        h.source.set_price("AAPL", 100.0);
        add_alert(&h, 1, "AAPL", AlertKind::Price, 150.0, 100.0).await;
        let (s, tx) = scheduler(&h);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(s.run(shutdown_rx));
        tx.send(ControlEvent {
            action: ControlAction::Stop,
            symbol: "NONE".to_string(),
            channel: ChannelId(1),
            actor: 1,
        })
        .await
        .unwrap();
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.store.saved_count(), 1);
    }

    #[tokio::test]
    async fn test_watchlist_breach_posts_once_per_excursion() {
        let h = harness_with(MonitorConfig {
            watchlist: vec![WatchEntry::new("AAPL", 242.0, 245.0).unwrap()],
            watchlist_channel: Some(ChannelId(9)),
            ..Default::default()
        });
        let (mut s, _tx) = scheduler(&h);

        h.source.set_price("AAPL", 246.0);
        let report = s.tick_at(at(0)).await;
        assert_eq!(h.source.last_request(), vec!["AAPL".to_string()]);
        assert_eq!(report.thresholds_breached, 1);

        h.source.set_price("AAPL", 247.0);
        assert_eq!(s.tick_at(at(60)).await.thresholds_breached, 0);

        h.source.set_price("AAPL", 243.0);
        assert_eq!(s.tick_at(at(120)).await.thresholds_breached, 0);

        h.source.set_price("AAPL", 241.5);
        assert_eq!(s.tick_at(at(180)).await.thresholds_breached, 1);

        assert_eq!(
            h.dispatcher.events(),
            vec![
                "breach:AAPL:Above:246".to_string(),
                "breach:AAPL:Below:241.5".to_string(),
            ]
        );
        assert_eq!(s.metrics().threshold_breaches, 2);
    }

    #[tokio::test]
    async fn test_unsubscribed_during_fetch_discards_result() {
        let h = harness();
        h.source.set_price("AAPL", 200.0);
        add_tracker(&h, "AAPL", 1, 30, 1).await;
        add_alert(&h, 2, "AAPL", AlertKind::Price, 150.0, 100.0).await;
        let (mut s, _tx) = scheduler(&h);

        let gate = h.source.hold_batches();
        let tick = tokio::spawn(async move { s.tick_at(at(30)).await });
        while h.source.batch_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // Fetch is in flight: stop the tracker and remove the alert.
        h.service.stop_tracking(ChannelId(1), "AAPL").await.unwrap();
        h.service.remove_alert(ChannelId(2), 0).await.unwrap();
        gate.notify_one();

        let report = tick.await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.trackers_updated, 0);
        assert_eq!(report.alerts_triggered, 0);
        assert_eq!(h.dispatcher.count("update:"), 0);
        assert_eq!(h.dispatcher.count("alert:"), 0);
        assert_eq!(h.dispatcher.events(), vec!["stopped:AAPL:1".to_string()]);
    }

    #[tokio::test]
    async fn test_backoff_forgotten_after_unsubscribe() {
        let h = harness();
        add_tracker(&h, "TSLA", 1, 5, 1).await;
        h.source.fail("TSLA");
        let (mut s, _tx) = scheduler(&h);

        s.tick_at(at(5)).await;
        assert_eq!(s.backoff.failures("TSLA"), 1);

        h.service.stop_tracking(ChannelId(1), "TSLA").await.unwrap();
        let report = s.tick_at(at(6)).await;
        assert_eq!(report.requested, 0);
        assert_eq!(s.backoff.failures("TSLA"), 0);
    }
}
