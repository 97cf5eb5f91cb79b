//! Hosted consumers that execute Engine commands against the game server.
//!
//! Each consumer takes a queued bus subscription at construction and drains
//! it on its own task, so the transport that publishes inbound commands never
//! waits on the game server. Every command is answered with a
//! [`CommandResult`] event, which the transport forwards to the Engine.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use gamelink_shared::{
    AnnounceMessage, BanPlayer, CommandResult, ConfigSynced, HostedService, KickPlayer, Message,
    MessageBus, MessageFilter, MessagePayload, ServerId, Subscription, UpdateConfig,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ports::GameServerPort;

const INBOX_CAPACITY: usize = 256;

const MODERATION_TYPES: &[&str] = &[KickPlayer::MESSAGE_TYPE, BanPlayer::MESSAGE_TYPE];
const CONFIG_TYPES: &[&str] = &[UpdateConfig::MESSAGE_TYPE];
const ANNOUNCEMENT_TYPES: &[&str] = &[AnnounceMessage::MESSAGE_TYPE];

/// Executes one family of commands.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Message types routed to this handler.
    fn accepts(&self) -> &'static [&'static str];

    /// Run `command`. `Ok` carries the response text, `Err` the failure.
    async fn execute(&self, command: &Message) -> Result<String, String>;
}

/// Runs a [`CommandHandler`] as a hosted service.
pub struct CommandConsumer<H> {
    handler: H,
    bus: MessageBus,
    server_id: ServerId,
    inbox: Mutex<Option<(Subscription, mpsc::Receiver<Message>)>>,
}

impl<H: CommandHandler> CommandConsumer<H> {
    pub fn new(handler: H, bus: &MessageBus, server_id: ServerId) -> Self {
        let inbox = bus.subscribe_queued(MessageFilter::Types(handler.accepts()), INBOX_CAPACITY);
        Self {
            handler,
            bus: bus.clone(),
            server_id,
            inbox: Mutex::new(Some(inbox)),
        }
    }

    /// Execute one command and publish its result.
    pub async fn process(&self, command: &Message) {
        let outcome = self.handler.execute(command).await;
        match &outcome {
            Ok(response) => tracing::info!(
                command_id = %command.id(),
                message_type = %command.message_type(),
                response = %response,
                "Command executed"
            ),
            Err(error) => tracing::warn!(
                command_id = %command.id(),
                message_type = %command.message_type(),
                error = %error,
                "Command failed"
            ),
        }

        let result = self
            .bus
            .create_event::<CommandResult>(Some(self.server_id), |r| match outcome {
                Ok(response) => r.succeeded(command.id(), response),
                Err(error) => r.failed(command.id(), error),
            });
        match result {
            Ok(result) => {
                self.bus.publish(&result);
            }
            Err(e) => tracing::error!(error = %e, "Failed to build command result"),
        }
    }
}

#[async_trait]
impl<H: CommandHandler> HostedService for CommandConsumer<H> {
    fn name(&self) -> &'static str {
        self.handler.name()
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let taken = self
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some((_subscription, mut inbox)) = taken else {
            tracing::warn!(consumer = self.handler.name(), "Consumer started twice");
            return;
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = inbox.recv() => match next {
                    Some(command) => self.process(&command).await,
                    None => break,
                },
            }
        }
    }
}

fn decode<T: MessagePayload>(command: &Message) -> Result<T, String> {
    command.payload::<T>().map_err(|e| e.to_string())
}

pub struct ModerationHandler {
    game: Arc<dyn GameServerPort>,
}

impl ModerationHandler {
    pub fn new(game: Arc<dyn GameServerPort>) -> Self {
        Self { game }
    }
}

#[async_trait]
impl CommandHandler for ModerationHandler {
    fn name(&self) -> &'static str {
        "moderation-consumer"
    }

    fn accepts(&self) -> &'static [&'static str] {
        MODERATION_TYPES
    }

    async fn execute(&self, command: &Message) -> Result<String, String> {
        if command.is::<KickPlayer>() {
            let kick = decode::<KickPlayer>(command)?;
            self.game
                .kick_player(&kick.player_id, kick.reason)
                .await
                .map_err(|e| e.to_string())?;
            Ok(format!("kicked {}", kick.player_id))
        } else {
            let ban = decode::<BanPlayer>(command)?;
            self.game
                .ban_player(&ban.player_id, ban.reason, ban.duration_minutes)
                .await
                .map_err(|e| e.to_string())?;
            Ok(match ban.duration_minutes {
                Some(minutes) => format!("banned {} for {minutes} minutes", ban.player_id),
                None => format!("banned {}", ban.player_id),
            })
        }
    }
}

/// Applies `UpdateConfig` and announces the new value with `ConfigSynced`.
pub struct ConfigHandler {
    game: Arc<dyn GameServerPort>,
    bus: MessageBus,
    server_id: ServerId,
}

impl ConfigHandler {
    pub fn new(game: Arc<dyn GameServerPort>, bus: &MessageBus, server_id: ServerId) -> Self {
        Self {
            game,
            bus: bus.clone(),
            server_id,
        }
    }
}

#[async_trait]
impl CommandHandler for ConfigHandler {
    fn name(&self) -> &'static str {
        "config-consumer"
    }

    fn accepts(&self) -> &'static [&'static str] {
        CONFIG_TYPES
    }

    async fn execute(&self, command: &Message) -> Result<String, String> {
        let update = decode::<UpdateConfig>(command)?;
        let applied = self
            .game
            .apply_config(&update.key, update.value)
            .await
            .map_err(|e| e.to_string())?;

        let synced = self
            .bus
            .create_event::<ConfigSynced>(Some(self.server_id), |s| {
                s.key = update.key.clone();
                s.value = applied;
            })
            .map_err(|e| e.to_string())?;
        self.bus.publish(&synced);

        Ok(format!("{} updated", update.key))
    }
}

pub struct AnnouncementHandler {
    game: Arc<dyn GameServerPort>,
}

impl AnnouncementHandler {
    pub fn new(game: Arc<dyn GameServerPort>) -> Self {
        Self { game }
    }
}

#[async_trait]
impl CommandHandler for AnnouncementHandler {
    fn name(&self) -> &'static str {
        "announcement-consumer"
    }

    fn accepts(&self) -> &'static [&'static str] {
        ANNOUNCEMENT_TYPES
    }

    async fn execute(&self, command: &Message) -> Result<String, String> {
        let announcement = decode::<AnnounceMessage>(command)?;
        let recipients = self
            .game
            .broadcast(&announcement.text)
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!("delivered to {recipients} players"))
    }
}

pub type ModerationConsumer = CommandConsumer<ModerationHandler>;
pub type ConfigConsumer = CommandConsumer<ConfigHandler>;
pub type AnnouncementConsumer = CommandConsumer<AnnouncementHandler>;
