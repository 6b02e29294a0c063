//! Configured threshold watchlist.
//!
//! Each entry is a ticker with a `low`/`high` band. A price at or below `low`
//! or at or above `high` is a breach. Breaches are edge-triggered: a ticker
//! notifies once when it leaves the band and re-arms when it comes back.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{MonitorError, MonitorResult};
use crate::types::PriceSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub ticker: String,
    pub low: f64,
    pub high: f64,
}

impl WatchEntry {
    pub fn new(ticker: impl Into<String>, low: f64, high: f64) -> MonitorResult<Self> {
        let ticker: String = ticker.into();
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(MonitorError::Validation("watchlist ticker is required".to_string()));
        }
        if !(low.is_finite() && high.is_finite()) || low <= 0.0 || low >= high {
            return Err(MonitorError::Validation(format!(
                "watchlist band for {} must satisfy 0 < low < high, got {}..{}",
                ticker, low, high
            )));
        }
        Ok(Self { ticker, low, high })
    }

    pub fn side(&self, price: f64) -> Option<Side> {
        if price <= self.low {
            Some(Side::Below)
        } else if price >= self.high {
            Some(Side::Above)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Below,
    Above,
}

/// A watchlist ticker that just left its band.
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub entry: WatchEntry,
    pub snapshot: PriceSnapshot,
    pub side: Side,
}

impl Breach {
    /// The band edge that was crossed.
    pub fn threshold(&self) -> f64 {
        match self.side {
            Side::Below => self.entry.low,
            Side::Above => self.entry.high,
        }
    }
}

/// Parse `AAPL:242:245,NVDA:130:135`.
pub fn parse_watchlist(raw: &str) -> MonitorResult<Vec<WatchEntry>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let parts: Vec<&str> = item.split(':').map(str::trim).collect();
            let [ticker, low, high] = parts.as_slice() else {
                return Err(MonitorError::Validation(format!(
                    "watchlist entry must be TICKER:LOW:HIGH, got {:?}",
                    item
                )));
            };
            let number = |v: &str| {
                v.parse::<f64>().map_err(|_| {
                    MonitorError::Validation(format!("invalid watchlist price {:?} in {:?}", v, item))
                })
            };
            WatchEntry::new(*ticker, number(*low)?, number(*high)?)
        })
        .collect()
}

/// Remembers which side each ticker was last reported on.
#[derive(Debug, Default)]
pub struct WatchState {
    reported: HashMap<String, Side>,
}

impl WatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one entry. Returns a breach only on a new excursion.
    pub fn check(&mut self, entry: &WatchEntry, snapshot: &PriceSnapshot) -> Option<Breach> {
        if !snapshot.price.is_finite() {
            return None;
        }
        match entry.side(snapshot.price) {
            None => {
                self.reported.remove(&entry.ticker);
                None
            }
            Some(side) if self.reported.get(&entry.ticker) == Some(&side) => None,
            Some(side) => {
                self.reported.insert(entry.ticker.clone(), side);
                Some(Breach {
                    entry: entry.clone(),
                    snapshot: snapshot.clone(),
                    side,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snap(price: f64) -> PriceSnapshot {
        PriceSnapshot::new("AAPL", price, Utc::now())
    }

    #[test]
    fn test_parse_watchlist() {
        let entries = parse_watchlist("aapl:242:245, NVDA:130:135,").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], WatchEntry::new("AAPL", 242.0, 245.0).unwrap());
        assert_eq!(entries[1].ticker, "NVDA");

        assert!(parse_watchlist("").unwrap().is_empty());
        assert!(parse_watchlist("AAPL:242").is_err());
        assert!(parse_watchlist("AAPL:low:245").is_err());
        assert!(parse_watchlist("AAPL:245:242").is_err());
    }

    #[test]
    fn test_band_edges_are_inclusive() {
        let entry = WatchEntry::new("AAPL", 242.0, 245.0).unwrap();
        assert_eq!(entry.side(242.0), Some(Side::Below));
        assert_eq!(entry.side(243.5), None);
        assert_eq!(entry.side(245.0), Some(Side::Above));
    }

    #[test]
    fn test_breach_fires_once_per_excursion() {
        let entry = WatchEntry::new("AAPL", 242.0, 245.0).unwrap();
        let mut state = WatchState::new();

        let first = state.check(&entry, &snap(246.0)).unwrap();
        assert_eq!(first.side, Side::Above);
        assert_eq!(first.threshold(), 245.0);
        assert!(state.check(&entry, &snap(247.0)).is_none());

        // Crossing straight to the other side is a new excursion.
        assert_eq!(state.check(&entry, &snap(240.0)).unwrap().side, Side::Below);

        // Back inside re-arms.
        assert!(state.check(&entry, &snap(243.0)).is_none());
        assert!(state.check(&entry, &snap(241.0)).is_some());
    }
}
