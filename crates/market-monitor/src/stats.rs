//! Tracker statistics
//!
//! Keeps a bounded window of recent samples and session-wide running
//! aggregates. The starting price is held outside the window so
//! `change_since_start` survives eviction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::types::{PricePoint, Tracker};

/// Number of trailing samples exposed in the detail view.
pub const RECENT_POINTS: usize = 10;

#[derive(Debug, Clone)]
pub struct TrackerStats {
    history: VecDeque<PricePoint>,
    capacity: usize,
    start: Option<PricePoint>,
    count: u64,
    high: f64,
    low: f64,
    // Welford accumulators
    mean: f64,
    m2: f64,
    up_moves: u64,
    down_moves: u64,
}

impl TrackerStats {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(2),
            start: None,
            count: 0,
            high: f64::NEG_INFINITY,
            low: f64::INFINITY,
            mean: 0.0,
            m2: 0.0,
            up_moves: 0,
            down_moves: 0,
        }
    }

    /// Append a sample and fold it into the running aggregates.
    pub fn record(&mut self, point: PricePoint) {
        if let Some(prev) = self.history.back() {
            if point.price > prev.price {
                self.up_moves += 1;
            } else if point.price < prev.price {
                self.down_moves += 1;
            }
        }
        if self.start.is_none() {
            self.start = Some(point);
        }

        self.count += 1;
        self.high = self.high.max(point.price);
        self.low = self.low.min(point.price);
        let delta = point.price - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (point.price - self.mean);

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(point);
    }

    pub fn history(&self) -> &VecDeque<PricePoint> {
        &self.history
    }

    pub fn sample_count(&self) -> u64 {
        self.count
    }

    pub fn start_price(&self) -> Option<f64> {
        self.start.map(|p| p.price)
    }

    pub fn current_price(&self) -> Option<f64> {
        self.history.back().map(|p| p.price)
    }

    /// Sample standard deviation over every recorded price.
    pub fn volatility(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }

    pub fn change_since_start(&self) -> f64 {
        match (self.start_price(), self.current_price()) {
            (Some(start), Some(current)) => pct_change(start, current),
            _ => 0.0,
        }
    }

    /// Percent change against the sample `lookback` positions before the latest.
    pub fn change_over(&self, lookback: usize) -> Option<f64> {
        let len = self.history.len();
        if lookback == 0 || len <= lookback {
            return None;
        }
        let current = self.history[len - 1].price;
        let past = self.history[len - 1 - lookback].price;
        Some(pct_change(past, current))
    }

    pub fn summary(&self) -> StatsSummary {
        let current = self.current_price().unwrap_or(0.0);
        let (high, low) = if self.count == 0 {
            (0.0, 0.0)
        } else {
            (self.high, self.low)
        };

        StatsSummary {
            current,
            start_price: self.start_price().unwrap_or(0.0),
            high,
            low,
            average: self.mean,
            range: high - low,
            volatility: self.volatility(),
            change_since_start: self.change_since_start(),
            change_last: self.change_over(1),
            change_5: self.change_over(5),
            pct_from_high: pct_change(high, current),
            pct_from_low: pct_change(low, current),
            up_moves: self.up_moves,
            down_moves: self.down_moves,
            samples: self.count,
            recent: self
                .history
                .iter()
                .skip(self.history.len().saturating_sub(RECENT_POINTS))
                .copied()
                .collect(),
        }
    }
}

/// Read-only projection of a tracker's statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub current: f64,
    pub start_price: f64,
    pub high: f64,
    pub low: f64,
    pub average: f64,
    pub range: f64,
    pub volatility: f64,
    pub change_since_start: f64,
    /// Change against the previous sample.
    pub change_last: Option<f64>,
    /// Change against the sample five updates back.
    pub change_5: Option<f64>,
    pub pct_from_high: f64,
    pub pct_from_low: f64,
    pub up_moves: u64,
    pub down_moves: u64,
    pub samples: u64,
    pub recent: Vec<PricePoint>,
}

/// Detail view payload: statistics plus tracker identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerDetails {
    pub symbol: String,
    pub interval_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub stats: StatsSummary,
}

/// Read-only statistics for a tracker. Never mutates history.
pub fn details(tracker: &Tracker) -> TrackerDetails {
    TrackerDetails {
        symbol: tracker.symbol.clone(),
        interval_seconds: tracker.interval_seconds,
        created_at: tracker.created_at,
        last_update: tracker.last_update,
        stats: tracker.stats.summary(),
    }
}

fn pct_change(from: f64, to: f64) -> f64 {
    if from == 0.0 {
        0.0
    } else {
        (to - from) / from * 100.0
    }
}
