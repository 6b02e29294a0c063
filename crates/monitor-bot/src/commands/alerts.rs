use crate::embeds;
use crate::respond_ephemeral;
use crate::Handler;
use super::{get_int_opt, get_number_opt, get_string_opt, user_message};

use market_monitor::{AlertKind, ChannelId};
use serenity::all::{
    CommandDataOption, CommandInteraction, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse,
};
use serenity::prelude::*;

impl Handler {
    pub async fn handle_alert(&self, ctx: &Context, command: &CommandInteraction) {
        let Some(subcommand) = command.data.options.first() else {
            let _ = respond_ephemeral(ctx, command, "Use `/alert add`, `/alert remove`, `/alert list` or `/alert watchlist`.").await;
            return;
        };

        match subcommand.name.as_str() {
            "add" => self.handle_alert_add(ctx, command, subcommand).await,
            "remove" => self.handle_alert_remove(ctx, command, subcommand).await,
            "list" => self.handle_alert_list(ctx, command).await,
            "watchlist" => self.handle_alert_watchlist(ctx, command).await,
            _ => {
                let _ = respond_ephemeral(ctx, command, "Unknown alert subcommand.").await;
            }
        }
    }

    async fn handle_alert_add(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
        sub_opt: &CommandDataOption,
    ) {
        let Some(ticker) = get_string_opt(sub_opt, "ticker") else {
            let _ = respond_ephemeral(ctx, command, "Please provide a ticker.").await;
            return;
        };
        let Some(kind) = get_string_opt(sub_opt, "type").and_then(|t| AlertKind::parse(&t)) else {
            let _ = respond_ephemeral(ctx, command, "Alert type must be `percent` or `price`.").await;
            return;
        };
        let Some(value) = get_number_opt(sub_opt, "value") else {
            let _ = respond_ephemeral(ctx, command, "Please provide a value.").await;
            return;
        };

        let _ = command.defer(&ctx.http).await;

        let channel = ChannelId(command.channel_id.get());
        match self.service.add_alert(channel, &ticker, kind, value).await {
            Ok(alert) => {
                let index = self
                    .service
                    .list_alerts(channel)
                    .await
                    .iter()
                    .position(|a| a.id == alert.id)
                    .unwrap_or(0);
                let embed = embeds::build_alert_created_embed(&alert, index);
                let _ = command
                    .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
                    .await;
            }
            Err(e) => {
                tracing::warn!("Failed to add alert for {}: {}", ticker, e);
                let _ = command
                    .edit_response(&ctx.http, EditInteractionResponse::new().content(user_message(&e)))
                    .await;
            }
        }
    }

    async fn handle_alert_remove(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
        sub_opt: &CommandDataOption,
    ) {
        let index = match get_int_opt(sub_opt, "index") {
            Some(i) if i >= 1 => (i - 1) as usize,
            _ => {
                let _ = respond_ephemeral(ctx, command, "Alert number must be 1 or greater.").await;
                return;
            }
        };

        let channel = ChannelId(command.channel_id.get());
        let content = match self.service.remove_alert(channel, index).await {
            Ok(alert) => format!(
                "\u{2705} Removed alert #{}: {}",
                index + 1,
                embeds::alert_description(&alert)
            ),
            Err(e) => user_message(&e),
        };
        let _ = respond_ephemeral(ctx, command, &content).await;
    }

    async fn handle_alert_list(&self, ctx: &Context, command: &CommandInteraction) {
        let _ = command.defer(&ctx.http).await;

        let channel = ChannelId(command.channel_id.get());
        let alerts = self.service.list_alerts(channel).await;
        let embed = embeds::build_alert_list_embed(&alerts);
        let _ = command
            .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
            .await;
    }

    async fn handle_alert_watchlist(&self, ctx: &Context, command: &CommandInteraction) {
        let embed = embeds::build_watchlist_embed(self.service.config().active_watchlist());
        let msg = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new().embed(embed),
        );
        let _ = command.create_response(&ctx.http, msg).await;
    }
}
