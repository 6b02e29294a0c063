mod commands;
mod config;
mod dispatcher;
mod embeds;

use anyhow::Context as _;
use market_monitor::{
    control_channel, ChannelId, ControlAction, ControlEvent, JsonAlertStore, MessageRef,
    MonitorService, PriceSource, Scheduler,
};
use price_client::{KucoinSource, PolygonSource, RoutingSource};
use serenity::{
    all::{
        Command, CommandInteraction, CreateInteractionResponse, CreateInteractionResponseMessage,
        Http, Interaction, Reaction, ReactionType,
    },
    async_trait,
    model::{gateway::Ready, id::UserId},
    prelude::*,
};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::signal::unix::SignalKind;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::BotConfig;
use crate::dispatcher::SerenityDispatcher;

const SCHEDULER_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

struct Handler {
    service: MonitorService,
    events: mpsc::Sender<ControlEvent>,
    bot_user: OnceLock<UserId>,
}

/// Map a reaction emoji to a tracker control action.
fn reaction_action(emoji: &ReactionType) -> Option<ControlAction> {
    let ReactionType::Unicode(raw) = emoji else {
        return None;
    };
    let raw = raw.trim_end_matches('\u{FE0F}');
    if raw == embeds::STOP_EMOJI.trim_end_matches('\u{FE0F}') {
        Some(ControlAction::Stop)
    } else if raw == embeds::DETAILS_EMOJI {
        Some(ControlAction::ShowDetails)
    } else {
        None
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };

        match command.data.name.as_str() {
            "alert" => self.handle_alert(&ctx, &command).await,
            "track" => self.handle_track(&ctx, &command).await,
            _ => {
                let _ = respond_ephemeral(&ctx, &command, "Unknown command.").await;
            }
        }
    }

    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        let Some(action) = reaction_action(&reaction.emoji) else {
            return;
        };
        let Some(user_id) = reaction.user_id else {
            return;
        };
        if self.bot_user.get() == Some(&user_id) {
            return;
        }

        let message = MessageRef {
            channel_id: ChannelId(reaction.channel_id.get()),
            message_id: reaction.message_id.get(),
        };
        let Some((symbol, channel)) = self.service.resolve_tracker_message(message).await else {
            return;
        };

        if action == ControlAction::ShowDetails {
            if let Err(e) = reaction.delete(&ctx.http).await {
                tracing::debug!("Could not remove details reaction: {}", e);
            }
        }

        let event = ControlEvent {
            action,
            symbol,
            channel,
            actor: user_id.get(),
        };
        if let Err(e) = self.events.try_send(event) {
            tracing::warn!("Dropped tracker control event: {}", e);
        }
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!("{} is connected and ready!", ready.user.name);
        let _ = self.bot_user.set(ready.user.id);

        let definitions = vec![
            commands::create_alert_command(),
            commands::create_track_command(),
        ];
        match Command::set_global_commands(&ctx.http, definitions).await {
            Ok(commands) => {
                tracing::info!("Registered {} global slash commands", commands.len());
            }
            Err(e) => {
                tracing::error!("Failed to register slash commands: {}", e);
            }
        }
    }
}

async fn respond_ephemeral(
    ctx: &Context,
    command: &CommandInteraction,
    content: &str,
) -> serenity::Result<()> {
    let msg = CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(content)
            .ephemeral(true),
    );
    command.create_response(&ctx.http, msg).await
}

fn init_tracing() {
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "monitor_bot=info,market_monitor=info,price_client=info".into());

    if json_logging {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    let config = BotConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Alerts file: {}", config.alerts_path.display());
    tracing::info!("  Alert check interval: {}s", config.monitor.alert_check_interval_seconds);
    tracing::info!(
        "  Tracker interval: {}-{}s",
        config.monitor.min_tracker_interval_seconds,
        config.monitor.max_tracker_interval_seconds
    );
    if let Some(channel) = config.monitor.watchlist_channel {
        tracing::info!(
            "  Watchlist: {} tickers posting to channel {}",
            config.monitor.watchlist.len(),
            channel
        );
    }

    let equities: Arc<dyn PriceSource> = Arc::new(
        PolygonSource::new(config.polygon_api_key.clone())
            .with_concurrency(config.monitor.fetch_concurrency_limit),
    );
    let crypto: Arc<dyn PriceSource> = Arc::new(KucoinSource::new(config.kucoin_base_url.clone()));
    let source = Arc::new(RoutingSource::new(equities, crypto));

    let http = Arc::new(Http::new(&config.discord_token));
    let dispatcher = Arc::new(SerenityDispatcher::new(http));
    let store = Arc::new(JsonAlertStore::new(config.alerts_path.clone()));

    let service = MonitorService::new(config.monitor.clone(), source, dispatcher, store);
    let loaded = service
        .load_alerts()
        .await
        .with_context(|| format!("Failed to load alerts from {}", config.alerts_path.display()))?;
    tracing::info!("Loaded {} alerts", loaded);

    let (events_tx, events_rx) = control_channel(config.monitor.event_channel_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Scheduler::new(service.clone(), events_rx);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS;

    let handler = Handler {
        service,
        events: events_tx,
        bot_user: OnceLock::new(),
    };

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .await?;

    tracing::info!("Market monitor bot starting...");

    // Graceful shutdown: SIGINT + SIGTERM
    let shard_manager = client.shard_manager.clone();
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;

    tokio::select! {
        result = client.start() => {
            if let Err(e) = result {
                tracing::error!("Discord client error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, shutting down...");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }

    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(
        Duration::from_secs(SCHEDULER_SHUTDOWN_TIMEOUT_SECS),
        scheduler_handle,
    )
    .await
    {
        Ok(Ok(())) => tracing::info!("Scheduler stopped"),
        Ok(Err(e)) => tracing::error!("Scheduler task failed: {}", e),
        Err(_) => tracing::warn!("Scheduler did not stop within {}s", SCHEDULER_SHUTDOWN_TIMEOUT_SECS),
    }

    shard_manager.shutdown_all().await;
    tracing::info!("Market monitor bot shut down.");

    Ok(())
}
