use anyhow::{Context, Result};
use market_monitor::{parse_watchlist, ChannelId, MonitorConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    // Credentials
    #[serde(skip_serializing)]
    pub discord_token: String,
    #[serde(skip_serializing)]
    pub polygon_api_key: String,

    // Providers
    pub kucoin_base_url: String,

    // Persistence
    pub alerts_path: PathBuf, // data/stock_alerts.json

    pub monitor: MonitorConfig,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let defaults = MonitorConfig::default();
        let monitor = MonitorConfig {
            base_tick_seconds: parse(&lookup, "MONITOR_TICK_SECONDS", defaults.base_tick_seconds)?,
            alert_check_interval_seconds: parse(
                &lookup,
                "CHECK_INTERVAL",
                defaults.alert_check_interval_seconds,
            )?,
            fetch_concurrency_limit: parse(
                &lookup,
                "FETCH_CONCURRENCY",
                defaults.fetch_concurrency_limit,
            )?,
            fetch_timeout_seconds: parse(
                &lookup,
                "FETCH_TIMEOUT_SECONDS",
                defaults.fetch_timeout_seconds,
            )?,
            dispatch_timeout_seconds: parse(
                &lookup,
                "DISPATCH_TIMEOUT_SECONDS",
                defaults.dispatch_timeout_seconds,
            )?,
            backoff_base_seconds: parse(
                &lookup,
                "BACKOFF_BASE_SECONDS",
                defaults.backoff_base_seconds,
            )?,
            backoff_max_seconds: parse(&lookup, "BACKOFF_MAX_SECONDS", defaults.backoff_max_seconds)?,
            history_capacity: parse(&lookup, "TRACKER_HISTORY_SIZE", defaults.history_capacity)?,
            min_tracker_interval_seconds: parse(
                &lookup,
                "MIN_TRACK_INTERVAL",
                defaults.min_tracker_interval_seconds,
            )?,
            max_tracker_interval_seconds: parse(
                &lookup,
                "MAX_TRACK_INTERVAL",
                defaults.max_tracker_interval_seconds,
            )?,
            event_channel_capacity: parse(
                &lookup,
                "EVENT_CHANNEL_CAPACITY",
                defaults.event_channel_capacity,
            )?,
            metrics_log_interval_ticks: parse(
                &lookup,
                "METRICS_LOG_INTERVAL_TICKS",
                defaults.metrics_log_interval_ticks,
            )?,
            watchlist: match lookup("WATCHLIST") {
                Some(raw) => parse_watchlist(&raw).context("Invalid WATCHLIST")?,
                None => defaults.watchlist,
            },
            watchlist_channel: parse::<u64>(&lookup, "ALERT_CHANNEL_ID", 0)
                .map(|id| (id != 0).then_some(ChannelId(id)))?,
        };
        monitor.validate().context("Invalid monitor configuration")?;

        let config = Self {
            discord_token: lookup("DISCORD_BOT_TOKEN")
                .or_else(|| lookup("DISCORD_TOKEN"))
                .context("DISCORD_BOT_TOKEN must be set")?,
            polygon_api_key: lookup("POLYGON_API_KEY").context("POLYGON_API_KEY must be set")?,
            kucoin_base_url: get("KUCOIN_BASE_URL", price_client::kucoin::BASE_URL),
            alerts_path: PathBuf::from(get("ALERTS_FILE", "data/stock_alerts.json")),
            monitor,
        };

        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
