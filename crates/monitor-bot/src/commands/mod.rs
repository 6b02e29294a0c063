pub mod alerts;
pub mod tracking;

use market_monitor::{FetchError, MonitorError};
use serenity::all::{
    CommandDataOption, CommandDataOptionValue, CommandOptionType, CreateCommand,
    CreateCommandOption,
};

/// Extract sub-options from a SubCommand or SubCommandGroup option.
pub fn get_sub_options(opt: &CommandDataOption) -> &[CommandDataOption] {
    match &opt.value {
        CommandDataOptionValue::SubCommand(opts) => opts,
        CommandDataOptionValue::SubCommandGroup(opts) => opts,
        _ => &[],
    }
}

/// Extract a string value from a subcommand's options by name.
pub fn get_string_opt(subcommand: &CommandDataOption, name: &str) -> Option<String> {
    for opt in get_sub_options(subcommand) {
        if opt.name == name {
            if let CommandDataOptionValue::String(s) = &opt.value {
                return Some(s.clone());
            }
        }
    }
    None
}

/// Extract an integer value from a subcommand's options by name.
pub fn get_int_opt(subcommand: &CommandDataOption, name: &str) -> Option<i64> {
    for opt in get_sub_options(subcommand) {
        if opt.name == name {
            if let CommandDataOptionValue::Integer(v) = &opt.value {
                return Some(*v);
            }
        }
    }
    None
}

/// Extract a number value by name. Integers are accepted as well.
pub fn get_number_opt(subcommand: &CommandDataOption, name: &str) -> Option<f64> {
    for opt in get_sub_options(subcommand) {
        if opt.name == name {
            match &opt.value {
                CommandDataOptionValue::Number(v) => return Some(*v),
                CommandDataOptionValue::Integer(v) => return Some(*v as f64),
                _ => {}
            }
        }
    }
    None
}

/// Text shown to the user when a monitor operation fails.
pub fn user_message(err: &MonitorError) -> String {
    match err {
        MonitorError::Validation(msg) => format!("\u{274C} {}", msg),
        MonitorError::NotFound(msg) => format!("\u{274C} {}", capitalize(msg)),
        MonitorError::Fetch(FetchError::UnknownSymbol(symbol)) => {
            format!("\u{274C} Could not find a price for {}", symbol)
        }
        MonitorError::Fetch(FetchError::Timeout) => {
            "\u{26A0}\u{FE0F} Price provider timed out, try again shortly".to_string()
        }
        MonitorError::Fetch(e) => format!("\u{26A0}\u{FE0F} Could not fetch price: {}", e),
        MonitorError::Dispatch(e) => format!("\u{26A0}\u{FE0F} Could not post message: {}", e),
        MonitorError::Persistence(e) => format!("\u{26A0}\u{FE0F} Storage error: {}", e),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn symbol_option(description: &str) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::String, "symbol", description).required(true)
}

pub fn create_alert_command() -> CreateCommand {
    CreateCommand::new("alert")
        .description("One-shot price alerts")
        .add_option(
            CreateCommandOption::new(CommandOptionType::SubCommand, "add", "Create a price alert")
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::String,
                        "ticker",
                        "Ticker or pair (e.g. AAPL, BTC-USDT)",
                    )
                    .required(true),
                )
                .add_sub_option(
                    CreateCommandOption::new(CommandOptionType::String, "type", "Alert type")
                        .required(true)
                        .add_string_choice("percent move", "percent")
                        .add_string_choice("target price", "price"),
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::Number,
                        "value",
                        "Percent move or target price",
                    )
                    .required(true),
                ),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "remove",
                "Remove an alert by its list number",
            )
            .add_sub_option(
                CreateCommandOption::new(
                    CommandOptionType::Integer,
                    "index",
                    "Alert number from /alert list",
                )
                .required(true)
                .min_int_value(1),
            ),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::SubCommand,
            "list",
            "Show alerts in this channel",
        ))
        .add_option(CreateCommandOption::new(
            CommandOptionType::SubCommand,
            "watchlist",
            "Show the configured threshold watchlist",
        ))
}

pub fn create_track_command() -> CreateCommand {
    CreateCommand::new("track")
        .description("Live price trackers")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "start",
                "Start a live tracker in this channel",
            )
            .add_sub_option(symbol_option("Ticker or pair (e.g. BTC-USDT)"))
            .add_sub_option(CreateCommandOption::new(
                CommandOptionType::Integer,
                "interval",
                "Update interval in seconds (default 60)",
            )),
        )
        .add_option(
            CreateCommandOption::new(CommandOptionType::SubCommand, "stop", "Stop a tracker")
                .add_sub_option(symbol_option("Tracked symbol")),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::SubCommand,
            "list",
            "Show trackers in this channel",
        ))
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "details",
                "Detailed statistics for a tracker",
            )
            .add_sub_option(symbol_option("Tracked symbol")),
        )
}
