//! Subscription registry
//!
//! Single owner of all alerts and trackers. Not synchronised itself; callers
//! share it as `Arc<RwLock<Registry>>` so reads run concurrently and every
//! mutation is exclusive.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::types::{Alert, ChannelId, MessageRef, Tracker};

/// Symbols needed by the subscriptions due on a tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueSymbols {
    pub alert_symbols: BTreeSet<String>,
    pub tracker_symbols: BTreeSet<String>,
}

impl DueSymbols {
    /// Deduplicated union of both sets.
    pub fn union(&self) -> BTreeSet<String> {
        self.alert_symbols
            .union(&self.tracker_symbols)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.alert_symbols.is_empty() && self.tracker_symbols.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    alerts: BTreeMap<ChannelId, Vec<Alert>>,
    trackers: HashMap<(ChannelId, String), Tracker>,
    next_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn assign_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // ===== Alerts =====

    /// Append an alert to its channel list and return its position.
    pub fn add_alert(&mut self, mut alert: Alert) -> usize {
        alert.id = self.assign_id();
        alert.ticker = alert.ticker.to_uppercase();
        let list = self.alerts.entry(alert.channel_id).or_default();
        list.push(alert);
        list.len() - 1
    }

    /// Remove by position. Later positions shift down by one.
    pub fn remove_alert(&mut self, channel: ChannelId, index: usize) -> Option<Alert> {
        let list = self.alerts.get_mut(&channel)?;
        if index >= list.len() {
            return None;
        }
        let removed = list.remove(index);
        if list.is_empty() {
            self.alerts.remove(&channel);
        }
        Some(removed)
    }

    /// Remove by session identity. Returns `None` if it is already gone, so a
    /// second removal of the same alert is a no-op.
    pub fn remove_alert_by_id(&mut self, channel: ChannelId, id: u64) -> Option<Alert> {
        let list = self.alerts.get_mut(&channel)?;
        let pos = list.iter().position(|a| a.id == id)?;
        let removed = list.remove(pos);
        if list.is_empty() {
            self.alerts.remove(&channel);
        }
        Some(removed)
    }

    /// Drop every alert for a channel that no longer exists.
    pub fn clear_channel_alerts(&mut self, channel: ChannelId) -> Vec<Alert> {
        self.alerts.remove(&channel).unwrap_or_default()
    }

    pub fn list_alerts(&self, channel: ChannelId) -> Vec<Alert> {
        self.alerts.get(&channel).cloned().unwrap_or_default()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.values().map(Vec::len).sum()
    }

    /// Every alert, cloned, in the persisted per-channel shape.
    pub fn all_alerts(&self) -> BTreeMap<ChannelId, Vec<Alert>> {
        self.alerts.clone()
    }

    /// Alerts for the given tickers, cloned for evaluation outside the lock.
    pub fn alerts_for(&self, tickers: &BTreeSet<String>) -> Vec<Alert> {
        self.alerts
            .values()
            .flatten()
            .filter(|a| tickers.contains(&a.ticker))
            .cloned()
            .collect()
    }

    /// Replace the alert set with a loaded snapshot, assigning fresh ids.
    pub fn load_alerts(&mut self, loaded: BTreeMap<ChannelId, Vec<Alert>>) -> usize {
        self.alerts.clear();
        let mut count = 0;
        for (channel, alerts) in loaded {
            for mut alert in alerts {
                // The channel key is authoritative over the embedded field.
                alert.channel_id = channel;
                self.add_alert(alert);
                count += 1;
            }
        }
        count
    }

    // ===== Trackers =====

    /// Insert a tracker, returning the one it replaced for the same
    /// (symbol, channel) so the caller can stop its display.
    pub fn add_tracker(&mut self, mut tracker: Tracker) -> (u64, Option<Tracker>) {
        tracker.id = self.assign_id();
        tracker.symbol = tracker.symbol.to_uppercase();
        let id = tracker.id;
        let key = (tracker.channel_id, tracker.symbol.clone());
        (id, self.trackers.insert(key, tracker))
    }

    pub fn remove_tracker(&mut self, symbol: &str, channel: ChannelId) -> Option<Tracker> {
        self.trackers.remove(&(channel, symbol.to_uppercase()))
    }

    /// Remove only if the stored tracker is still the same instance.
    pub fn remove_tracker_by_id(
        &mut self,
        symbol: &str,
        channel: ChannelId,
        id: u64,
    ) -> Option<Tracker> {
        let key = (channel, symbol.to_uppercase());
        match self.trackers.get(&key) {
            Some(t) if t.id == id => self.trackers.remove(&key),
            _ => None,
        }
    }

    pub fn tracker(&self, symbol: &str, channel: ChannelId) -> Option<&Tracker> {
        self.trackers.get(&(channel, symbol.to_uppercase()))
    }

    pub fn tracker_mut_by_id(
        &mut self,
        symbol: &str,
        channel: ChannelId,
        id: u64,
    ) -> Option<&mut Tracker> {
        self.trackers
            .get_mut(&(channel, symbol.to_uppercase()))
            .filter(|t| t.id == id)
    }

    pub fn tracker_by_message(&self, message: MessageRef) -> Option<&Tracker> {
        self.trackers
            .values()
            .find(|t| t.message_ref == Some(message))
    }

    pub fn list_trackers(&self, channel: ChannelId) -> Vec<Tracker> {
        let mut list: Vec<Tracker> = self
            .trackers
            .values()
            .filter(|t| t.channel_id == channel)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        list
    }

    pub fn tracker_count(&self) -> usize {
        self.trackers.len()
    }

    /// Trackers whose interval has elapsed at `now`, as (symbol, channel, id).
    pub fn due_trackers(&self, now: DateTime<Utc>) -> Vec<(String, ChannelId, u64)> {
        self.trackers
            .values()
            .filter(|t| t.is_due(now))
            .map(|t| (t.symbol.clone(), t.channel_id, t.id))
            .collect()
    }

    /// Symbols needed this tick. Alert symbols are included only when the
    /// alert check is due.
    pub fn due_symbols(&self, now: DateTime<Utc>, alerts_due: bool) -> DueSymbols {
        let alert_symbols = if alerts_due {
            self.alerts
                .values()
                .flatten()
                .map(|a| a.ticker.clone())
                .collect()
        } else {
            BTreeSet::new()
        };

        let tracker_symbols = self
            .trackers
            .values()
            .filter(|t| t.is_due(now))
            .map(|t| t.symbol.clone())
            .collect();

        DueSymbols {
            alert_symbols,
            tracker_symbols,
        }
    }

    /// Every tracked symbol, regardless of schedule.
    pub fn tracker_symbols(&self) -> BTreeSet<String> {
        self.trackers.values().map(|t| t.symbol.clone()).collect()
    }

    /// Every alert ticker, regardless of schedule.
    pub fn alert_symbols(&self) -> BTreeSet<String> {
        self.alerts
            .values()
            .flatten()
            .map(|a| a.ticker.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertKind, PriceSnapshot};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn tracker(symbol: &str, channel: u64, interval: u64) -> Tracker {
        Tracker::new(
            ChannelId(channel),
            interval,
            PriceSnapshot::new(symbol, 100.0, t0()),
            100,
            t0(),
        )
    }

    #[test]
    fn test_positional_removal_shifts_indices() {
        let mut reg = Registry::new();
        let ch = ChannelId(1);
        for ticker in ["AAPL", "MSFT", "NVDA"] {
            reg.add_alert(Alert::new(ch, ticker, AlertKind::Price, 1.0, 2.0));
        }

        let removed = reg.remove_alert(ch, 0).unwrap();
        assert_eq!(removed.ticker, "AAPL");

        let remaining = reg.list_alerts(ch);
        assert_eq!(remaining[0].ticker, "MSFT");
        assert_eq!(remaining[1].ticker, "NVDA");
        assert!(reg.remove_alert(ch, 2).is_none());
    }

    #[test]
    fn test_removal_by_id_is_idempotent() {
        let mut reg = Registry::new();
        let ch = ChannelId(1);
        reg.add_alert(Alert::new(ch, "AAPL", AlertKind::Percent, 5.0, 100.0));
        let id = reg.list_alerts(ch)[0].id;

        assert!(reg.remove_alert_by_id(ch, id).is_some());
        assert!(reg.remove_alert_by_id(ch, id).is_none());
        assert_eq!(reg.alert_count(), 0);
    }

    #[test]
    fn test_empty_channel_list_is_dropped() {
        let mut reg = Registry::new();
        let ch = ChannelId(9);
        reg.add_alert(Alert::new(ch, "AAPL", AlertKind::Price, 1.0, 2.0));
        reg.remove_alert(ch, 0);
        assert!(reg.all_alerts().is_empty());
    }

    #[test]
    fn test_add_tracker_replaces_same_symbol_and_channel() {
        let mut reg = Registry::new();
        let (first_id, replaced) = reg.add_tracker(tracker("btc-usdt", 1, 30));
        assert!(replaced.is_none());

        let (second_id, replaced) = reg.add_tracker(tracker("BTC-USDT", 1, 60));
        assert_eq!(replaced.unwrap().id, first_id);
        assert_ne!(first_id, second_id);
        assert_eq!(reg.tracker_count(), 1);

        // Different channel is a separate tracker
        reg.add_tracker(tracker("BTC-USDT", 2, 60));
        assert_eq!(reg.tracker_count(), 2);
    }

    #[test]
    fn test_remove_tracker_by_id_ignores_replaced_instance() {
        let mut reg = Registry::new();
        let (old_id, _) = reg.add_tracker(tracker("ETH-USDT", 1, 30));
        reg.add_tracker(tracker("ETH-USDT", 1, 30));

        assert!(reg
            .remove_tracker_by_id("ETH-USDT", ChannelId(1), old_id)
            .is_none());
        assert_eq!(reg.tracker_count(), 1);
    }

    #[test]
    fn test_due_symbols() {
        let mut reg = Registry::new();
        reg.add_alert(Alert::new(ChannelId(1), "AAPL", AlertKind::Price, 1.0, 2.0));
        reg.add_alert(Alert::new(ChannelId(2), "AAPL", AlertKind::Price, 1.0, 2.0));
        reg.add_tracker(tracker("BTC-USDT", 1, 30));
        reg.add_tracker(tracker("AAPL", 3, 60));

        let at_30 = t0() + chrono::Duration::seconds(30);
        let due = reg.due_symbols(at_30, true);
        assert_eq!(due.alert_symbols.len(), 1);
        assert_eq!(due.tracker_symbols, BTreeSet::from(["BTC-USDT".to_string()]));
        assert_eq!(due.union().len(), 2);

        let due = reg.due_symbols(at_30, false);
        assert!(due.alert_symbols.is_empty());
    }

    #[test]
    fn test_tracker_by_message() {
        let mut reg = Registry::new();
        let mut t = tracker("SOL-USDT", 5, 30);
        let msg = MessageRef {
            channel_id: ChannelId(5),
            message_id: 77,
        };
        t.message_ref = Some(msg);
        reg.add_tracker(t);

        assert_eq!(reg.tracker_by_message(msg).unwrap().symbol, "SOL-USDT");
        assert!(reg
            .tracker_by_message(MessageRef {
                channel_id: ChannelId(5),
                message_id: 78
            })
            .is_none());
    }

    #[test]
    fn test_load_alerts_uses_channel_key() {
        let mut reg = Registry::new();
        let mut loaded = BTreeMap::new();
        loaded.insert(
            ChannelId(10),
            vec![Alert::new(ChannelId(999), "AAPL", AlertKind::Price, 1.0, 2.0)],
        );

        assert_eq!(reg.load_alerts(loaded), 1);
        assert_eq!(reg.list_alerts(ChannelId(10))[0].channel_id, ChannelId(10));
    }
}
