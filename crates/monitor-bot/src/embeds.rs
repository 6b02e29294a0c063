use chrono::{DateTime, Utc};
use market_monitor::{
    Alert, AlertKind, Breach, Direction, PriceSnapshot, Side, Tracker, TrackerDetails, Trigger,
    WatchEntry,
};
use price_client::is_crypto_pair;
use serenity::builder::{CreateEmbed, CreateEmbedFooter};
use serenity::model::Timestamp;

const COLOR_GREEN: u32 = 0x00FF00;
const COLOR_RED: u32 = 0xFF0000;
const COLOR_GOLD: u32 = 0xFFD700;
const COLOR_BLUE: u32 = 0x3498DB;
const COLOR_GREY: u32 = 0x95A5A6;

pub const STOP_EMOJI: &str = "\u{23F9}\u{FE0F}";
pub const DETAILS_EMOJI: &str = "\u{1F4CA}";

fn footer(text: impl Into<String>) -> CreateEmbedFooter {
    CreateEmbedFooter::new(text)
}

fn to_timestamp(ts: DateTime<Utc>) -> Timestamp {
    Timestamp::from_unix_timestamp(ts.timestamp()).unwrap_or_else(|_| Timestamp::now())
}

/// `BTC-USDT` reads as `BTC/USDT`; equities are shown as-is.
pub fn display_symbol(symbol: &str) -> String {
    if is_crypto_pair(symbol) {
        symbol.replacen('-', "/", 1)
    } else {
        symbol.to_string()
    }
}

/// Sub-dollar prices keep more precision.
pub fn format_price(price: f64) -> String {
    if price.abs() >= 1.0 {
        format!("${:.2}", price)
    } else {
        format!("${:.6}", price)
    }
}

pub fn format_change(pct: f64) -> String {
    format!("{:+.2}%", pct)
}

pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (hours, rem) = (seconds / 3600, seconds % 3600);
    let (minutes, secs) = (rem / 60, rem % 60);
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

fn change_color(pct: f64) -> u32 {
    if pct >= 0.0 {
        COLOR_GREEN
    } else {
        COLOR_RED
    }
}

pub fn alert_description(alert: &Alert) -> String {
    match alert.kind {
        AlertKind::Percent => format!(
            "{} moves {}% from {} (up at {})",
            alert.ticker,
            alert.target,
            format_price(alert.reference_price),
            format_price(alert.target_price())
        ),
        AlertKind::Price => format!(
            "{} reaches {} (set at {})",
            alert.ticker,
            format_price(alert.target),
            format_price(alert.reference_price)
        ),
    }
}

/// Live tracker message; `stopped` renders the terminal form.
pub fn build_tracker_embed(tracker: &Tracker, details: &TrackerDetails, stopped: bool) -> CreateEmbed {
    let stats = &details.stats;
    let snapshot: &PriceSnapshot = &tracker.last_snapshot;

    let mut title = format!("{} Price Tracker", display_symbol(&tracker.symbol));
    if stopped {
        title.push_str(" (Stopped)");
    }

    let color = if stopped {
        COLOR_GREY
    } else {
        change_color(stats.change_since_start)
    };

    let mut embed = CreateEmbed::new()
        .title(title)
        .description(format!("**{}**", format_price(stats.current)))
        .color(color)
        .timestamp(to_timestamp(tracker.last_update));

    if let (Some(bid), Some(ask)) = (snapshot.best_bid, snapshot.best_ask) {
        embed = embed
            .field("Bid", format_price(bid), true)
            .field("Ask", format_price(ask), true);
    }
    if let Some(change) = snapshot.change_24h {
        embed = embed.field("24h Change", format_change(change), true);
    }

    embed = embed
        .field(
            "Last Update",
            stats.change_last.map_or("-".to_string(), format_change),
            true,
        )
        .field(
            "5 Updates",
            stats.change_5.map_or("-".to_string(), format_change),
            true,
        )
        .field("Since Start", format_change(stats.change_since_start), true);

    if stopped {
        embed.footer(footer("Tracking stopped"))
    } else {
        embed.footer(footer(format!(
            "Updates every {}s \u{2022} React with {} to stop, {} for details",
            tracker.interval_seconds, STOP_EMOJI, DETAILS_EMOJI
        )))
    }
}

pub fn build_details_embed(details: &TrackerDetails) -> CreateEmbed {
    let stats = &details.stats;
    let running = Utc::now().signed_duration_since(details.created_at).num_seconds();

    let mut embed = CreateEmbed::new()
        .title(format!("{} Detailed Price View", display_symbol(&details.symbol)))
        .description("Historical price analysis and statistics")
        .color(COLOR_BLUE)
        .field("Current", format_price(stats.current), true)
        .field("High", format_price(stats.high), true)
        .field("Low", format_price(stats.low), true)
        .field("Average", format_price(stats.average), true)
        .field("Range", format_price(stats.range), true)
        .field(
            "From High/Low",
            format!(
                "{} / {}",
                format_change(stats.pct_from_high),
                format_change(stats.pct_from_low)
            ),
            true,
        );

    if stats.samples > 2 {
        embed = embed.field(
            "Volatility",
            format!(
                "{:.4} ({} \u{2191} / {} \u{2193})",
                stats.volatility, stats.up_moves, stats.down_moves
            ),
            true,
        );
    }

    embed = embed.field(
        "Tracking Info",
        format!(
            "Started: {}\nRunning: {}\nInterval: {}s\nData points: {}",
            details.created_at.format("%Y-%m-%d %H:%M:%S"),
            format_duration(running),
            details.interval_seconds,
            stats.samples
        ),
        false,
    );

    if stats.recent.len() > 1 {
        embed = embed.field("Recent Price History", recent_history(details), false);
    }

    embed.footer(footer("Market Monitor")).timestamp(Timestamp::now())
}

fn recent_history(details: &TrackerDetails) -> String {
    let recent = &details.stats.recent;
    let newest = recent.last().map_or(details.last_update, |p| p.timestamp);
    let mut out = String::new();
    for (i, point) in recent.iter().enumerate() {
        let ago = newest.signed_duration_since(point.timestamp).num_seconds();
        out.push_str(&format!("\u{2022} {} ago: {}", format_duration(ago), format_price(point.price)));
        if i > 0 && recent[i - 1].price != 0.0 {
            let pct = (point.price - recent[i - 1].price) / recent[i - 1].price * 100.0;
            out.push_str(&format!(" ({})", format_change(pct)));
        }
        out.push('\n');
    }
    out
}

pub fn build_alert_triggered_embed(trigger: &Trigger) -> CreateEmbed {
    let alert = &trigger.alert;
    let (emoji, color) = match trigger.direction {
        Direction::Up => ("\u{1F680}", COLOR_GREEN),
        Direction::Down => ("\u{1F4C9}", COLOR_RED),
        Direction::Flat => ("\u{26A0}\u{FE0F}", COLOR_GOLD),
    };

    let condition = match alert.kind {
        AlertKind::Percent => format!("Moved {}% or more", alert.target),
        AlertKind::Price => format!("Reached {}", format_price(alert.target)),
    };

    CreateEmbed::new()
        .title(format!("{} {} Price Alert Triggered!", emoji, alert.ticker))
        .description(condition)
        .color(color)
        .field("Current Price", format_price(trigger.snapshot.price), true)
        .field("Reference Price", format_price(alert.reference_price), true)
        .field("Change", format_change(trigger.change_percent), true)
        .field(
            "Set On",
            alert.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            false,
        )
        .footer(footer("This alert has been removed"))
        .timestamp(to_timestamp(trigger.snapshot.timestamp))
}

pub fn breach_title(breach: &Breach) -> String {
    let (emoji, word) = match breach.side {
        Side::Below => ("\u{1F4C9}", "Below"),
        Side::Above => ("\u{1F4C8}", "Above"),
    };
    format!("{} {} {} Threshold Alert", emoji, breach.entry.ticker, word)
}

pub fn watch_band(entry: &WatchEntry) -> String {
    format!("Low: {}\nHigh: {}", format_price(entry.low), format_price(entry.high))
}

pub fn build_breach_embed(breach: &Breach) -> CreateEmbed {
    let color = match breach.side {
        Side::Below => COLOR_RED,
        Side::Above => COLOR_GREEN,
    };

    CreateEmbed::new()
        .title(breach_title(breach))
        .color(color)
        .field("Current Price", format_price(breach.snapshot.price), true)
        .field("Threshold", format_price(breach.threshold()), true)
        .footer(footer("Watchlist"))
        .timestamp(to_timestamp(breach.snapshot.timestamp))
}

pub fn build_watchlist_embed(entries: &[WatchEntry]) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title("Stock Watchlist")
        .description("Configured stocks with price thresholds")
        .color(COLOR_BLUE)
        .footer(footer("Market Monitor"));

    if entries.is_empty() {
        return embed.description("No watchlist is configured.");
    }

    for entry in entries.iter().take(25) {
        embed = embed.field(entry.ticker.clone(), watch_band(entry), true);
    }
    embed
}

pub fn build_alert_created_embed(alert: &Alert, index: usize) -> CreateEmbed {
    CreateEmbed::new()
        .title(format!("\u{1F514} Alert #{} set for {}", index + 1, alert.ticker))
        .description(alert_description(alert))
        .color(COLOR_BLUE)
        .footer(footer(format!("Use /alert remove index:{} to cancel", index + 1)))
        .timestamp(Timestamp::now())
}

pub fn build_alert_list_embed(alerts: &[Alert]) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title("Active Price Alerts")
        .color(COLOR_BLUE)
        .footer(footer("Market Monitor"));

    if alerts.is_empty() {
        return embed.description("No active alerts in this channel.");
    }

    for (i, alert) in alerts.iter().take(25).enumerate() {
        embed = embed.field(
            format!("#{}: {}", i + 1, alert.ticker),
            format!("{} ({})", alert_description(alert), alert.kind),
            false,
        );
    }
    embed
}

pub fn build_tracker_list_embed(trackers: &[Tracker]) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title("Active Price Trackers")
        .color(COLOR_BLUE)
        .footer(footer("Market Monitor"));

    if trackers.is_empty() {
        return embed.description("No active trackers in this channel.");
    }

    for tracker in trackers.iter().take(25) {
        embed = embed.field(
            display_symbol(&tracker.symbol),
            format!(
                "{} \u{2022} every {}s \u{2022} {} since start",
                format_price(tracker.current_price()),
                tracker.interval_seconds,
                format_change(tracker.stats.change_since_start())
            ),
            false,
        );
    }
    embed
}
