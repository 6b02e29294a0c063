use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::stats::TrackerStats;

/// Discord-style channel identifier. Opaque to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl ChannelId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChannelId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Handle to a rendered tracker message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: u64,
}

/// Latest price for one instrument, as produced by a price source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub symbol: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    /// 24h change in percent, when the provider reports one.
    #[serde(default)]
    pub change_24h: Option<f64>,
    #[serde(default)]
    pub best_bid: Option<f64>,
    #[serde(default)]
    pub best_ask: Option<f64>,
}

impl PriceSnapshot {
    pub fn new(symbol: impl Into<String>, price: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
            change_24h: None,
            best_bid: None,
            best_ask: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Percent,
    Price,
}

impl AlertKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "percent" | "pct" | "%" => Some(Self::Percent),
            "price" => Some(Self::Price),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percent => "percent",
            Self::Price => "price",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A one-shot price condition. Serialized in the on-disk alert schema
/// (`ticker`, `alert_type`, `value`, `reference_price`, `created_at`, `channel_id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Session-local identity assigned by the registry; not persisted.
    #[serde(skip)]
    pub id: u64,
    pub ticker: String,
    #[serde(rename = "alert_type")]
    pub kind: AlertKind,
    #[serde(rename = "value")]
    pub target: f64,
    pub reference_price: f64,
    #[serde(with = "alert_timestamp")]
    pub created_at: DateTime<Utc>,
    pub channel_id: ChannelId,
}

impl Alert {
    pub fn new(
        channel_id: ChannelId,
        ticker: impl Into<String>,
        kind: AlertKind,
        target: f64,
        reference_price: f64,
    ) -> Self {
        Self {
            id: 0,
            ticker: ticker.into().to_uppercase(),
            kind,
            target,
            reference_price,
            created_at: Utc::now(),
            channel_id,
        }
    }

    /// Price at which the alert fires on the upside.
    pub fn target_price(&self) -> f64 {
        match self.kind {
            AlertKind::Percent => self.reference_price * (1.0 + self.target / 100.0),
            AlertKind::Price => self.target,
        }
    }
}

/// One sample in a tracker's history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// A live, periodically refreshed price view bound to one message.
#[derive(Debug, Clone)]
pub struct Tracker {
    pub id: u64,
    pub symbol: String,
    pub channel_id: ChannelId,
    pub interval_seconds: u64,
    pub message_ref: Option<MessageRef>,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    /// Most recent snapshot, kept for bid/ask and 24h figures on the display.
    pub last_snapshot: PriceSnapshot,
    pub stats: TrackerStats,
}

impl Tracker {
    /// Create a tracker seeded with its first price.
    pub fn new(
        channel_id: ChannelId,
        interval_seconds: u64,
        initial: PriceSnapshot,
        history_capacity: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let mut stats = TrackerStats::new(history_capacity);
        stats.record(PricePoint {
            timestamp: initial.timestamp,
            price: initial.price,
        });

        Self {
            id: 0,
            symbol: initial.symbol.to_uppercase(),
            channel_id,
            interval_seconds,
            message_ref: None,
            created_at: now,
            last_update: now,
            last_snapshot: initial,
            stats,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let elapsed = now.signed_duration_since(self.last_update).num_milliseconds();
        elapsed >= (self.interval_seconds as i64).saturating_mul(1000)
    }

    /// Apply a fresh snapshot observed at tick time `now`.
    pub fn apply(&mut self, snapshot: PriceSnapshot, now: DateTime<Utc>) {
        self.stats.record(PricePoint {
            timestamp: snapshot.timestamp,
            price: snapshot.price,
        });
        if now > self.last_update {
            self.last_update = now;
        }
        self.last_snapshot = snapshot;
    }

    pub fn current_price(&self) -> f64 {
        self.last_snapshot.price
    }
}

/// Timestamps in the alert file use the bot's historical `%Y-%m-%d %H:%M:%S`
/// layout (UTC). RFC 3339 is accepted on read.
mod alert_timestamp {
    use super::*;

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, FORMAT) {
            return Ok(naive.and_utc());
        }
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
