//! In-memory collaborators shared by the service and scheduler tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::MonitorConfig;
use crate::error::{DispatchError, FetchError, PersistenceError};
use crate::evaluator::Trigger;
use crate::service::MonitorService;
use crate::stats::TrackerDetails;
use crate::traits::{AlertStore, Dispatcher, PriceSource};
use crate::types::{Alert, ChannelId, MessageRef, PriceSnapshot, Tracker};
use crate::watchlist::Breach;

#[derive(Default)]
pub struct FakeSource {
    prices: Mutex<HashMap<String, f64>>,
    failing: Mutex<HashSet<String>>,
    down: Mutex<bool>,
    pub batch_calls: AtomicUsize,
    pub requested: Mutex<Vec<Vec<String>>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeSource {
    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub fn fail(&self, symbol: &str) {
        self.failing.lock().unwrap().insert(symbol.to_string());
    }

    pub fn recover(&self, symbol: &str) {
        self.failing.lock().unwrap().remove(symbol);
    }

    pub fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }

    /// Make batch fetches wait until the returned gate is notified.
    pub fn hold_batches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn last_request(&self) -> Vec<String> {
        self.requested.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl PriceSource for FakeSource {
    async fn fetch(&self, symbol: &str) -> Result<PriceSnapshot, FetchError> {
        if *self.down.lock().unwrap() {
            return Err(FetchError::Unavailable("provider down".to_string()));
        }
        if self.failing.lock().unwrap().contains(symbol) {
            return Err(FetchError::Timeout);
        }
        let price = self
            .prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| FetchError::UnknownSymbol(symbol.to_string()))?;
        Ok(PriceSnapshot::new(symbol, price, Utc::now()))
    }

    async fn batch_fetch(
        &self,
        symbols: &std::collections::BTreeSet<String>,
    ) -> Result<HashMap<String, PriceSnapshot>, FetchError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.requested
            .lock()
            .unwrap()
            .push(symbols.iter().cloned().collect());

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut out = HashMap::new();
        let mut last_err = None;
        for symbol in symbols {
            match self.fetch(symbol).await {
                Ok(s) => {
                    out.insert(symbol.clone(), s);
                }
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) if out.is_empty() => Err(e),
            _ => Ok(out),
        }
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Records every call as a short string, e.g. `render:BTC-USDT:1`.
#[derive(Default)]
pub struct FakeDispatcher {
    pub events: Mutex<Vec<String>>,
    gone_messages: Mutex<HashSet<u64>>,
    gone_channels: Mutex<HashSet<ChannelId>>,
    next_message: AtomicU64,
    render_delay: Mutex<Option<Duration>>,
}

impl FakeDispatcher {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// Delay the next `render_tracker` call once.
    pub fn delay_next_render(&self, delay: Duration) {
        *self.render_delay.lock().unwrap() = Some(delay);
    }

    pub fn delete_message(&self, message_id: u64) {
        self.gone_messages.lock().unwrap().insert(message_id);
    }

    pub fn delete_channel(&self, channel: ChannelId) {
        self.gone_channels.lock().unwrap().insert(channel);
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Dispatcher for FakeDispatcher {
    async fn render_tracker(
        &self,
        tracker: &Tracker,
        _details: &TrackerDetails,
    ) -> Result<MessageRef, DispatchError> {
        let delay = self.render_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.gone_channels.lock().unwrap().contains(&tracker.channel_id) {
            return Err(DispatchError::Gone);
        }
        let message_id = self.next_message.fetch_add(1, Ordering::SeqCst) + 1;
        self.push(format!("render:{}:{}", tracker.symbol, message_id));
        Ok(MessageRef {
            channel_id: tracker.channel_id,
            message_id,
        })
    }

    async fn update_tracker(
        &self,
        handle: &MessageRef,
        tracker: &Tracker,
        _details: &TrackerDetails,
    ) -> Result<(), DispatchError> {
        if self.gone_messages.lock().unwrap().contains(&handle.message_id) {
            return Err(DispatchError::Gone);
        }
        self.push(format!("update:{}:{}", tracker.symbol, handle.message_id));
        Ok(())
    }

    async fn render_triggered_alert(&self, trigger: &Trigger) -> Result<(), DispatchError> {
        if self
            .gone_channels
            .lock()
            .unwrap()
            .contains(&trigger.alert.channel_id)
        {
            return Err(DispatchError::Gone);
        }
        self.push(format!("alert:{}:{}", trigger.alert.ticker, trigger.snapshot.price));
        Ok(())
    }

    async fn render_breach(&self, _channel: ChannelId, breach: &Breach) -> Result<(), DispatchError> {
        self.push(format!(
            "breach:{}:{:?}:{}",
            breach.entry.ticker, breach.side, breach.snapshot.price
        ));
        Ok(())
    }

    async fn render_stopped(
        &self,
        handle: &MessageRef,
        tracker: &Tracker,
        _details: &TrackerDetails,
    ) -> Result<(), DispatchError> {
        self.push(format!("stopped:{}:{}", tracker.symbol, handle.message_id));
        Ok(())
    }

    async fn render_details(
        &self,
        _channel: ChannelId,
        details: &TrackerDetails,
    ) -> Result<(), DispatchError> {
        self.push(format!("details:{}", details.symbol));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub saved: Mutex<Option<BTreeMap<ChannelId, Vec<Alert>>>>,
    pub saves: AtomicUsize,
    pub initial: Mutex<BTreeMap<ChannelId, Vec<Alert>>>,
    pub fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn saved_count(&self) -> usize {
        self.saved
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |m| m.values().map(Vec::len).sum())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn load(&self) -> Result<BTreeMap<ChannelId, Vec<Alert>>, PersistenceError> {
        Ok(self.initial.lock().unwrap().clone())
    }

    async fn save(&self, alerts: &BTreeMap<ChannelId, Vec<Alert>>) -> Result<(), PersistenceError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io(std::io::Error::other("disk full")));
        }
        *self.saved.lock().unwrap() = Some(alerts.clone());
        Ok(())
    }
}

pub struct Harness {
    pub service: MonitorService,
    pub source: Arc<FakeSource>,
    pub dispatcher: Arc<FakeDispatcher>,
    pub store: Arc<MemoryStore>,
}

pub fn harness() -> Harness {
    harness_with(MonitorConfig::default())
}

pub fn harness_with(config: MonitorConfig) -> Harness {
    let source = Arc::new(FakeSource::default());
    let dispatcher = Arc::new(FakeDispatcher::default());
    let store = Arc::new(MemoryStore::default());
    let service = MonitorService::new(
        config,
        source.clone(),
        dispatcher.clone(),
        store.clone(),
    );
    Harness {
        service,
        source,
        dispatcher,
        store,
    }
}
