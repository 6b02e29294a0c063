use async_trait::async_trait;
use market_monitor::{
    Breach, ChannelId, DispatchError, Dispatcher, MessageRef, Tracker, TrackerDetails, Trigger,
};
use serenity::all::{
    ChannelId as DiscordChannelId, CreateMessage, EditMessage, Http, MessageId, ReactionType,
};
use std::sync::Arc;

use crate::embeds;

/// Renders alerts and trackers as Discord embeds.
pub struct SerenityDispatcher {
    http: Arc<Http>,
}

impl SerenityDispatcher {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn channel(id: ChannelId) -> DiscordChannelId {
    DiscordChannelId::new(id.get())
}

/// A 404 means the channel or message was deleted.
fn map_error(e: serenity::Error) -> DispatchError {
    if let serenity::Error::Http(http_err) = &e {
        if http_err.status_code().map(|s| s.as_u16()) == Some(404) {
            return DispatchError::Gone;
        }
    }
    DispatchError::Failed(e.to_string())
}

#[async_trait]
impl Dispatcher for SerenityDispatcher {
    async fn render_tracker(
        &self,
        tracker: &Tracker,
        details: &TrackerDetails,
    ) -> Result<MessageRef, DispatchError> {
        let embed = embeds::build_tracker_embed(tracker, details, false);
        let message = channel(tracker.channel_id)
            .send_message(&self.http, CreateMessage::new().embed(embed))
            .await
            .map_err(map_error)?;

        for emoji in [embeds::STOP_EMOJI, embeds::DETAILS_EMOJI] {
            if let Err(e) = message
                .react(&self.http, ReactionType::Unicode(emoji.to_string()))
                .await
            {
                tracing::warn!("Failed to add {} reaction to tracker: {}", emoji, e);
            }
        }

        Ok(MessageRef {
            channel_id: tracker.channel_id,
            message_id: message.id.get(),
        })
    }

    async fn update_tracker(
        &self,
        handle: &MessageRef,
        tracker: &Tracker,
        details: &TrackerDetails,
    ) -> Result<(), DispatchError> {
        let embed = embeds::build_tracker_embed(tracker, details, false);
        channel(handle.channel_id)
            .edit_message(
                &self.http,
                MessageId::new(handle.message_id),
                EditMessage::new().embed(embed),
            )
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn render_triggered_alert(&self, trigger: &Trigger) -> Result<(), DispatchError> {
        let embed = embeds::build_alert_triggered_embed(trigger);
        channel(trigger.alert.channel_id)
            .send_message(&self.http, CreateMessage::new().embed(embed))
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn render_breach(&self, channel_id: ChannelId, breach: &Breach) -> Result<(), DispatchError> {
        let embed = embeds::build_breach_embed(breach);
        channel(channel_id)
            .send_message(&self.http, CreateMessage::new().embed(embed))
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn render_stopped(
        &self,
        handle: &MessageRef,
        tracker: &Tracker,
        details: &TrackerDetails,
    ) -> Result<(), DispatchError> {
        let embed = embeds::build_tracker_embed(tracker, details, true);
        channel(handle.channel_id)
            .edit_message(
                &self.http,
                MessageId::new(handle.message_id),
                EditMessage::new().embed(embed),
            )
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn render_details(
        &self,
        channel_id: ChannelId,
        details: &TrackerDetails,
    ) -> Result<(), DispatchError> {
        let embed = embeds::build_details_embed(details);
        channel(channel_id)
            .send_message(&self.http, CreateMessage::new().embed(embed))
            .await
            .map_err(map_error)?;
        Ok(())
    }
}
