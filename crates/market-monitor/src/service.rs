//! Command surface consumed by the host (slash commands, reactions).
//!
//! `MonitorService` is cheap to clone; every clone shares the same registry,
//! collaborators and persistence lock. The registry lock is only ever held
//! for in-memory work, never across a fetch, a dispatch or a save.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::config::MonitorConfig;
use crate::error::{DispatchError, FetchError, MonitorError, MonitorResult};
use crate::registry::Registry;
use crate::stats::{self, TrackerDetails};
use crate::traits::{AlertStore, Dispatcher, PriceSource};
use crate::types::{Alert, AlertKind, ChannelId, MessageRef, PriceSnapshot, Tracker};

pub const MAX_TICKER_LEN: usize = 20;

#[derive(Clone)]
pub struct MonitorService {
    registry: Arc<RwLock<Registry>>,
    source: Arc<dyn PriceSource>,
    dispatcher: Arc<dyn Dispatcher>,
    store: Arc<dyn AlertStore>,
    persist_lock: Arc<Mutex<()>>,
    start_lock: Arc<Mutex<()>>,
    config: Arc<MonitorConfig>,
}

impl MonitorService {
    pub fn new(
        config: MonitorConfig,
        source: Arc<dyn PriceSource>,
        dispatcher: Arc<dyn Dispatcher>,
        store: Arc<dyn AlertStore>,
    ) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::new())),
            source,
            dispatcher,
            store,
            persist_lock: Arc::new(Mutex::new(())),
            start_lock: Arc::new(Mutex::new(())),
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &Arc<RwLock<Registry>> {
        &self.registry
    }

    pub fn source(&self) -> &Arc<dyn PriceSource> {
        &self.source
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    // ===== Alerts =====

    /// Create an alert with the live price as its reference.
    pub async fn add_alert(
        &self,
        channel: ChannelId,
        ticker: &str,
        kind: AlertKind,
        value: f64,
    ) -> MonitorResult<Alert> {
        let ticker = normalize_symbol(ticker)?;
        if !value.is_finite() || value <= 0.0 {
            return Err(MonitorError::Validation(format!(
                "alert value must be a positive number, got {}",
                value
            )));
        }

        let snapshot = self.fetch_one(&ticker).await?;
        let alert = Alert::new(channel, &ticker, kind, value, snapshot.price);

        let stored = {
            let mut registry = self.registry.write().await;
            let index = registry.add_alert(alert);
            registry.list_alerts(channel).swap_remove(index)
        };
        tracing::info!(
            "Added {} alert for {} at {} (reference {:.2}) in channel {}",
            stored.kind,
            stored.ticker,
            stored.target,
            stored.reference_price,
            channel
        );

        self.persist_alerts().await;
        Ok(stored)
    }

    /// Remove the alert at `index` (0-based) in the channel's current list.
    pub async fn remove_alert(&self, channel: ChannelId, index: usize) -> MonitorResult<Alert> {
        let removed = self
            .registry
            .write()
            .await
            .remove_alert(channel, index)
            .ok_or_else(|| {
                MonitorError::NotFound(format!("no alert #{} in this channel", index + 1))
            })?;
        tracing::info!("Removed {} alert for {} in channel {}", removed.kind, removed.ticker, channel);

        self.persist_alerts().await;
        Ok(removed)
    }

    pub async fn list_alerts(&self, channel: ChannelId) -> Vec<Alert> {
        self.registry.read().await.list_alerts(channel)
    }

    /// Drop every alert of a channel that no longer exists.
    pub async fn purge_channel(&self, channel: ChannelId) -> usize {
        let removed = self.registry.write().await.clear_channel_alerts(channel);
        if !removed.is_empty() {
            tracing::warn!(
                "Channel {} is gone, removed {} alerts",
                channel,
                removed.len()
            );
            self.persist_alerts().await;
        }
        removed.len()
    }

    // ===== Trackers =====

    /// Start a live tracker, replacing any existing one for the same symbol
    /// and channel. The replaced display is rendered stopped first.
    pub async fn start_tracking(
        &self,
        channel: ChannelId,
        symbol: &str,
        interval_seconds: i64,
    ) -> MonitorResult<Tracker> {
        self.start_tracking_at(channel, symbol, interval_seconds, Utc::now())
            .await
    }

    pub async fn start_tracking_at(
        &self,
        channel: ChannelId,
        symbol: &str,
        interval_seconds: i64,
        now: DateTime<Utc>,
    ) -> MonitorResult<Tracker> {
        let symbol = normalize_symbol(symbol)?;
        if interval_seconds <= 0 {
            return Err(MonitorError::Validation(format!(
                "interval must be positive, got {}",
                interval_seconds
            )));
        }
        let interval = self.config.clamp_tracker_interval(interval_seconds as u64);

        let snapshot = self.fetch_one(&symbol).await?;
        let tracker = Tracker::new(
            channel,
            interval,
            snapshot,
            self.config.history_capacity,
            now,
        );

        // Held from insert until the handle is stored, so an overlapping start
        // for the same pair always finds the handle it has to stop.
        let _start_guard = self.start_lock.lock().await;

        let (id, replaced) = self.registry.write().await.add_tracker(tracker);
        if let Some(old) = replaced {
            tracing::info!("Replacing existing {} tracker in channel {}", old.symbol, channel);
            self.render_stopped(&old).await;
        }

        // Render from the stored instance so the id is the registry's.
        let (tracker, details) = {
            let registry = self.registry.read().await;
            match registry.tracker(&symbol, channel).filter(|t| t.id == id) {
                Some(t) => (t.clone(), stats::details(t)),
                None => {
                    return Err(MonitorError::NotFound(format!(
                        "{} tracker was stopped while starting",
                        symbol
                    )))
                }
            }
        };

        let handle = match self.render_new_tracker(&tracker, &details).await {
            Ok(handle) => handle,
            Err(e) => {
                self.registry
                    .write()
                    .await
                    .remove_tracker_by_id(&symbol, channel, id);
                tracing::warn!("Could not render {} tracker: {}", symbol, e);
                return Err(e.into());
            }
        };

        let started = self
            .registry
            .write()
            .await
            .tracker_mut_by_id(&symbol, channel, id)
            .map(|t| {
                t.message_ref = Some(handle);
                t.clone()
            });
        let Some(started) = started else {
            // Stopped while the message was being posted.
            let mut orphan = tracker;
            orphan.message_ref = Some(handle);
            self.render_stopped(&orphan).await;
            return Err(MonitorError::NotFound(format!(
                "{} tracker was stopped while starting",
                symbol
            )));
        };

        tracing::info!(
            "Started tracking {} every {}s in channel {}",
            started.symbol,
            started.interval_seconds,
            channel
        );
        Ok(started)
    }

    /// Stop a tracker and turn its display into the stopped view.
    pub async fn stop_tracking(&self, channel: ChannelId, symbol: &str) -> MonitorResult<Tracker> {
        let removed = self
            .registry
            .write()
            .await
            .remove_tracker(symbol, channel)
            .ok_or_else(|| {
                MonitorError::NotFound(format!("no active tracker for {}", symbol.to_uppercase()))
            })?;

        self.render_stopped(&removed).await;
        tracing::info!("Stopped tracking {} in channel {}", removed.symbol, channel);
        Ok(removed)
    }

    pub async fn tracker_details(
        &self,
        channel: ChannelId,
        symbol: &str,
    ) -> MonitorResult<TrackerDetails> {
        self.registry
            .read()
            .await
            .tracker(symbol, channel)
            .map(stats::details)
            .ok_or_else(|| {
                MonitorError::NotFound(format!("no active tracker for {}", symbol.to_uppercase()))
            })
    }

    /// Post the detail view for an active tracker.
    pub async fn show_details(&self, channel: ChannelId, symbol: &str) -> MonitorResult<TrackerDetails> {
        let details = self.tracker_details(channel, symbol).await?;
        with_timeout(
            self.config.dispatch_timeout(),
            self.dispatcher.render_details(channel, &details),
        )
        .await?;
        Ok(details)
    }

    pub async fn list_trackers(&self, channel: ChannelId) -> Vec<Tracker> {
        self.registry.read().await.list_trackers(channel)
    }

    /// Map a rendered tracker message back to its (symbol, channel).
    pub async fn resolve_tracker_message(&self, message: MessageRef) -> Option<(String, ChannelId)> {
        self.registry
            .read()
            .await
            .tracker_by_message(message)
            .map(|t| (t.symbol.clone(), t.channel_id))
    }

    /// Post a tracker's first message. A post that lands after the dispatch
    /// timeout is turned into the stopped view when it arrives.
    async fn render_new_tracker(
        &self,
        tracker: &Tracker,
        details: &TrackerDetails,
    ) -> Result<MessageRef, DispatchError> {
        let dispatcher = self.dispatcher.clone();
        let (posted, posted_details) = (tracker.clone(), details.clone());
        let mut render =
            tokio::spawn(async move { dispatcher.render_tracker(&posted, &posted_details).await });

        let limit = self.config.dispatch_timeout();
        match tokio::time::timeout(limit, &mut render).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(DispatchError::Failed(format!("render task failed: {}", e))),
            Err(_) => {
                let service = self.clone();
                let mut late = tracker.clone();
                tokio::spawn(async move {
                    if let Ok(Ok(handle)) = render.await {
                        tracing::info!("Late {} tracker message landed, marking it stopped", late.symbol);
                        late.message_ref = Some(handle);
                        service.render_stopped(&late).await;
                    }
                });
                Err(DispatchError::Failed(format!(
                    "timed out after {}s",
                    limit.as_secs()
                )))
            }
        }
    }

    async fn render_stopped(&self, tracker: &Tracker) {
        let Some(handle) = tracker.message_ref else {
            return;
        };
        let details = stats::details(tracker);
        match with_timeout(
            self.config.dispatch_timeout(),
            self.dispatcher.render_stopped(&handle, tracker, &details),
        )
        .await
        {
            Ok(()) | Err(DispatchError::Gone) => {}
            Err(e) => tracing::warn!("Failed to render stopped {} tracker: {}", tracker.symbol, e),
        }
    }

    // ===== Persistence =====

    /// Replace in-memory alerts with the stored set. Called once at startup.
    pub async fn load_alerts(&self) -> MonitorResult<usize> {
        let loaded = self.store.load().await?;
        let count = self.registry.write().await.load_alerts(loaded);
        Ok(count)
    }

    /// Best-effort save of the full alert set. Failures are logged only.
    pub async fn persist_alerts(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.registry.read().await.all_alerts();
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::warn!("Failed to save alerts: {}", e);
        }
    }

    async fn fetch_one(&self, symbol: &str) -> Result<PriceSnapshot, FetchError> {
        match tokio::time::timeout(self.config.fetch_timeout(), self.source.fetch(symbol)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }
}

/// Bound a dispatcher call. An elapsed timeout counts as a failed dispatch.
pub(crate) async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, DispatchError>
where
    F: Future<Output = Result<T, DispatchError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError::Failed(format!(
            "timed out after {}s",
            limit.as_secs()
        ))),
    }
}

/// Upper-case and validate a user-supplied ticker or pair.
pub fn normalize_symbol(raw: &str) -> MonitorResult<String> {
    let symbol = raw.trim().trim_start_matches('$').to_uppercase();
    if symbol.is_empty() {
        return Err(MonitorError::Validation("ticker is required".to_string()));
    }
    if symbol.len() > MAX_TICKER_LEN {
        return Err(MonitorError::Validation(format!(
            "ticker longer than {} characters",
            MAX_TICKER_LEN
        )));
    }
    if !symbol
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_' | '^'))
    {
        return Err(MonitorError::Validation(format!("invalid ticker: {}", raw.trim())));
    }
    Ok(symbol)
}
