use crate::embeds;
use crate::respond_ephemeral;
use crate::Handler;
use super::{get_int_opt, get_string_opt, user_message};

use market_monitor::ChannelId;
use serenity::all::{CommandDataOption, CommandInteraction, EditInteractionResponse};
use serenity::prelude::*;

pub(crate) const DEFAULT_INTERVAL_SECS: i64 = 60;

impl Handler {
    pub async fn handle_track(&self, ctx: &Context, command: &CommandInteraction) {
        let Some(subcommand) = command.data.options.first() else {
            let _ = respond_ephemeral(ctx, command, "Use `/track start`, `/track stop`, `/track list` or `/track details`.").await;
            return;
        };

        match subcommand.name.as_str() {
            "start" => self.handle_track_start(ctx, command, subcommand).await,
            "stop" => self.handle_track_stop(ctx, command, subcommand).await,
            "list" => self.handle_track_list(ctx, command).await,
            "details" => self.handle_track_details(ctx, command, subcommand).await,
            _ => {
                let _ = respond_ephemeral(ctx, command, "Unknown track subcommand.").await;
            }
        }
    }

    async fn handle_track_start(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
        sub_opt: &CommandDataOption,
    ) {
        let Some(symbol) = get_string_opt(sub_opt, "symbol") else {
            let _ = respond_ephemeral(ctx, command, "Please provide a symbol.").await;
            return;
        };
        let interval = get_int_opt(sub_opt, "interval").unwrap_or(DEFAULT_INTERVAL_SECS);

        let _ = command.defer_ephemeral(&ctx.http).await;

        let channel = ChannelId(command.channel_id.get());
        let content = match self.service.start_tracking(channel, &symbol, interval).await {
            Ok(tracker) => format!(
                "\u{2705} Tracking {} every {}s",
                embeds::display_symbol(&tracker.symbol),
                tracker.interval_seconds
            ),
            Err(e) => {
                tracing::warn!("Failed to start tracker for {}: {}", symbol, e);
                user_message(&e)
            }
        };
        let _ = command
            .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
            .await;
    }

    async fn handle_track_stop(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
        sub_opt: &CommandDataOption,
    ) {
        let Some(symbol) = get_string_opt(sub_opt, "symbol") else {
            let _ = respond_ephemeral(ctx, command, "Please provide a symbol.").await;
            return;
        };

        let _ = command.defer_ephemeral(&ctx.http).await;

        let channel = ChannelId(command.channel_id.get());
        let content = match self.service.stop_tracking(channel, symbol.trim()).await {
            Ok(tracker) => format!(
                "\u{23F9}\u{FE0F} Stopped tracking {}",
                embeds::display_symbol(&tracker.symbol)
            ),
            Err(e) => user_message(&e),
        };
        let _ = command
            .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
            .await;
    }

    async fn handle_track_list(&self, ctx: &Context, command: &CommandInteraction) {
        let _ = command.defer(&ctx.http).await;

        let channel = ChannelId(command.channel_id.get());
        let trackers = self.service.list_trackers(channel).await;
        let embed = embeds::build_tracker_list_embed(&trackers);
        let _ = command
            .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
            .await;
    }

    async fn handle_track_details(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
        sub_opt: &CommandDataOption,
    ) {
        let Some(symbol) = get_string_opt(sub_opt, "symbol") else {
            let _ = respond_ephemeral(ctx, command, "Please provide a symbol.").await;
            return;
        };

        let _ = command.defer(&ctx.http).await;

        let channel = ChannelId(command.channel_id.get());
        match self.service.tracker_details(channel, symbol.trim()).await {
            Ok(details) => {
                let embed = embeds::build_details_embed(&details);
                let _ = command
                    .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
                    .await;
            }
            Err(e) => {
                let _ = command
                    .edit_response(&ctx.http, EditInteractionResponse::new().content(user_message(&e)))
                    .await;
            }
        }
    }
}
