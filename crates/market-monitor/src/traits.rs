use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{DispatchError, FetchError, PersistenceError};
use crate::evaluator::Trigger;
use crate::stats::TrackerDetails;
use crate::types::{Alert, ChannelId, MessageRef, PriceSnapshot, Tracker};
use crate::watchlist::Breach;

/// Upstream price provider.
///
/// Implementations are stateless per call and safe to invoke concurrently.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch(&self, symbol: &str) -> Result<PriceSnapshot, FetchError>;

    /// Fetch many symbols at once. Failed symbols are omitted from the map;
    /// an error is returned only when nothing could be fetched at all.
    ///
    /// The default fans out to [`PriceSource::fetch`], at most
    /// [`PriceSource::concurrency_limit`] calls in flight.
    async fn batch_fetch(
        &self,
        symbols: &BTreeSet<String>,
    ) -> Result<HashMap<String, PriceSnapshot>, FetchError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let results: Vec<(String, Result<PriceSnapshot, FetchError>)> =
            stream::iter(symbols.iter().cloned())
                .map(|symbol| async move {
                    let res = self.fetch(&symbol).await;
                    (symbol, res)
                })
                .buffer_unordered(self.concurrency_limit().max(1))
                .collect()
                .await;

        let mut prices = HashMap::with_capacity(results.len());
        let mut last_err = None;
        for (symbol, res) in results {
            match res {
                Ok(snapshot) => {
                    prices.insert(symbol, snapshot);
                }
                Err(e) => {
                    tracing::debug!("{} fetch failed for {}: {}", self.name(), symbol, e);
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if prices.is_empty() => Err(e),
            _ => Ok(prices),
        }
    }

    fn concurrency_limit(&self) -> usize {
        4
    }

    fn name(&self) -> &str;
}

/// Display surface for alerts and trackers.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Create the live view for a new tracker.
    async fn render_tracker(
        &self,
        tracker: &Tracker,
        details: &TrackerDetails,
    ) -> Result<MessageRef, DispatchError>;

    /// Refresh a live view. `DispatchError::Gone` stops the tracker.
    async fn update_tracker(
        &self,
        handle: &MessageRef,
        tracker: &Tracker,
        details: &TrackerDetails,
    ) -> Result<(), DispatchError>;

    async fn render_triggered_alert(&self, trigger: &Trigger) -> Result<(), DispatchError>;

    /// Post a watchlist band breach.
    async fn render_breach(&self, channel: ChannelId, breach: &Breach) -> Result<(), DispatchError>;

    /// Turn a live view into its terminal "stopped" form.
    async fn render_stopped(
        &self,
        handle: &MessageRef,
        tracker: &Tracker,
        details: &TrackerDetails,
    ) -> Result<(), DispatchError>;

    /// Post the detailed statistics view into a channel.
    async fn render_details(
        &self,
        channel: ChannelId,
        details: &TrackerDetails,
    ) -> Result<(), DispatchError>;
}

/// Durable storage for alerts. Trackers are never persisted.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn load(&self) -> Result<BTreeMap<ChannelId, Vec<Alert>>, PersistenceError>;

    /// Overwrite the whole collection atomically.
    async fn save(&self, alerts: &BTreeMap<ChannelId, Vec<Alert>>) -> Result<(), PersistenceError>;
}
