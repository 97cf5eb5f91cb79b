//! Durable command queue.
//!
//! Commands are written to the store before they reach the bus, so a target
//! that is offline (or an Engine restart) never loses one. Once a target is
//! reachable again its `Pending` backlog is replayed in creation order.
//!
//! Rows only become `Sent` once the hub has written them to the agent's
//! socket; handing a command to the bus is not proof of delivery.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Duration;
use gamelink_domain::{
    BufferedCommand, CommandStatus, Message, MessageError, MessageId, MessagePayload,
    MessageRegistry, ServerId,
};
use gamelink_shared::MessageBus;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::infrastructure::ports::{CommandOutcome, CommandStore, RepoError};

/// Pause between replay passes while the target's channel is full.
const REPLAY_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(25);
/// Consecutive passes without progress before a replay gives up.
const REPLAY_MAX_STALLS: u32 = 20;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] RepoError),

    #[error(transparent)]
    Message(#[from] MessageError),
}

/// A command row plus whether it has been `Sent` for too long.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStatusReport {
    #[serde(flatten)]
    pub command: BufferedCommand,
    pub stale: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ReplayPass {
    handed_off: usize,
    blocked: bool,
}

/// Rows a replay has already dealt with, so later passes skip them.
#[derive(Debug, Default)]
struct ReplayProgress {
    seen: HashSet<MessageId>,
    handed_off: usize,
}

pub struct CommandQueue {
    store: Arc<dyn CommandStore>,
    bus: MessageBus,
    registry: MessageRegistry,
    stale_after: Duration,
    // Targets whose backlog is being replayed, with the number of holders.
    // New commands for them are persisted but not published until the
    // replay has caught up, so they cannot overtake older rows.
    replaying: Mutex<HashMap<ServerId, usize>>,
    replay_retry_delay: std::time::Duration,
    replay_max_stalls: u32,
}

impl CommandQueue {
    pub fn new(
        store: Arc<dyn CommandStore>,
        bus: MessageBus,
        registry: MessageRegistry,
        stale_after: Duration,
    ) -> Self {
        Self {
            store,
            bus,
            registry,
            stale_after,
            replaying: Mutex::new(HashMap::new()),
            replay_retry_delay: REPLAY_RETRY_DELAY,
            replay_max_stalls: REPLAY_MAX_STALLS,
        }
    }

    /// Override how long a replay waits for a full channel to drain.
    pub fn with_replay_pacing(mut self, retry_delay: std::time::Duration, max_stalls: u32) -> Self {
        self.replay_retry_delay = retry_delay;
        self.replay_max_stalls = max_stalls;
        self
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Persist `command` as `Pending`, then publish it.
    ///
    /// If the row cannot be written the command is not published. While the
    /// target's backlog is replaying the row is left for the replay to send.
    pub async fn publish_command(&self, command: Message) -> Result<MessageId, QueueError> {
        let row = BufferedCommand::from_message(&command)?;
        self.store.insert(&row).await?;

        tracing::info!(
            command_id = %row.id,
            server_id = %row.server_id,
            message_type = %row.message_type,
            "Command queued"
        );

        let replaying = self.replaying.lock().await;
        if replaying.contains_key(&row.server_id) {
            tracing::debug!(
                command_id = %row.id,
                server_id = %row.server_id,
                "Target is replaying its backlog; command will follow it"
            );
        } else {
            self.bus.publish(&command);
        }
        Ok(row.id)
    }

    /// Build a `T` command for `target` and queue it.
    pub async fn issue<T: MessagePayload>(
        &self,
        target: ServerId,
        configure: impl FnOnce(&mut T),
    ) -> Result<MessageId, QueueError> {
        let command = self.bus.create_command::<T>(target, configure)?;
        self.publish_command(command).await
    }

    pub async fn get_pending_commands(
        &self,
        server_id: ServerId,
    ) -> Result<Vec<BufferedCommand>, QueueError> {
        Ok(self.store.list_pending(server_id).await?)
    }

    /// `Pending -> Sent`. Returns `false` (no-op) for any other state.
    pub async fn mark_sent(&self, id: MessageId) -> Result<bool, QueueError> {
        let moved = self.store.mark_sent(id, self.bus.clock().now()).await?;
        if !moved {
            tracing::debug!(command_id = %id, "mark_sent ignored; command is not pending");
        }
        Ok(moved)
    }

    /// `Sent -> Completed | Failed`. Returns `false` (no-op) for any other state.
    pub async fn record_response(
        &self,
        id: MessageId,
        response: Option<String>,
        success: bool,
    ) -> Result<bool, QueueError> {
        let outcome = if success {
            CommandOutcome {
                success,
                response,
                error: None,
            }
        } else {
            CommandOutcome {
                success,
                error: response.clone(),
                response,
            }
        };

        let moved = self.store.record_response(id, outcome).await?;
        if moved {
            tracing::info!(command_id = %id, success, "Command response recorded");
        } else {
            tracing::debug!(command_id = %id, "record_response ignored; command is not sent");
        }
        Ok(moved)
    }

    /// Record the outcome carried by a `CommandResult` event.
    ///
    /// A result can overtake the hub's own `Sent` update for the same row. The
    /// agent answering proves the command was delivered, so a row still
    /// `Pending` is moved to `Sent` first.
    pub async fn record_result(
        &self,
        result: &gamelink_shared::CommandResult,
    ) -> Result<bool, QueueError> {
        let outcome = CommandOutcome {
            success: result.success,
            response: result.response.clone(),
            error: result.error.clone(),
        };
        let mut moved = self
            .store
            .record_response(result.command_id, outcome.clone())
            .await?;

        if !moved {
            let delivered_early = self
                .store
                .get(result.command_id)
                .await?
                .is_some_and(|row| row.status.can_transition_to(CommandStatus::Sent));
            if delivered_early {
                self.store
                    .mark_sent(result.command_id, self.bus.clock().now())
                    .await?;
                moved = self.store.record_response(result.command_id, outcome).await?;
            }
        }

        if moved {
            tracing::info!(
                command_id = %result.command_id,
                success = result.success,
                "Command response recorded"
            );
        }
        Ok(moved)
    }

    /// Re-publish the `Pending` backlog for `server_id`, oldest first.
    ///
    /// Rows are handed to the bus in creation order and stay `Pending` until
    /// the transport has written them. A row that no longer decodes is marked
    /// `Failed` and the loop moves on. The first row nobody accepts stops the
    /// replay so nothing behind it goes out first. Returns the number of rows
    /// handed off.
    pub async fn replay_pending(&self, server_id: ServerId) -> Result<usize, QueueError> {
        self.hold_live_commands(server_id).await;
        self.replay_held(server_id).await
    }

    /// Stop publishing new commands for `server_id` until [`replay_held`]
    /// has caught up. Every hold must be followed by one `replay_held`.
    ///
    /// [`replay_held`]: Self::replay_held
    pub async fn hold_live_commands(&self, server_id: ServerId) {
        *self.replaying.lock().await.entry(server_id).or_default() += 1;
    }

    /// Replay the backlog of a held target, then release the hold.
    pub async fn replay_held(&self, server_id: ServerId) -> Result<usize, QueueError> {
        let mut progress = ReplayProgress::default();
        let passes = self.replay_until_drained(server_id, &mut progress).await;

        // Commands queued while the passes ran are picked up under the lock,
        // before live publishing resumes.
        let mut replaying = self.replaying.lock().await;
        let last = match passes {
            Ok(true) => self.replay_pass(server_id, &mut progress).await.map(|_| ()),
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        };
        if let Some(holders) = replaying.get_mut(&server_id) {
            *holders -= 1;
            if *holders == 0 {
                replaying.remove(&server_id);
            }
        }
        drop(replaying);

        last?;
        if progress.handed_off > 0 {
            tracing::info!(
                server_id = %server_id,
                handed_off = progress.handed_off,
                "Replayed pending commands"
            );
        }
        Ok(progress.handed_off)
    }

    /// Run passes until one finds nothing new. `false` if the target stopped
    /// accepting commands for too long.
    async fn replay_until_drained(
        &self,
        server_id: ServerId,
        progress: &mut ReplayProgress,
    ) -> Result<bool, QueueError> {
        let mut stalls = 0;
        loop {
            let pass = self.replay_pass(server_id, progress).await?;
            if !pass.blocked {
                if pass.handed_off == 0 {
                    return Ok(true);
                }
                continue;
            }

            stalls = if pass.handed_off > 0 { 0 } else { stalls + 1 };
            if stalls >= self.replay_max_stalls {
                tracing::warn!(
                    server_id = %server_id,
                    "Target stopped accepting replayed commands; leaving the rest pending"
                );
                return Ok(false);
            }
            tokio::time::sleep(self.replay_retry_delay).await;
        }
    }

    async fn replay_pass(
        &self,
        server_id: ServerId,
        progress: &mut ReplayProgress,
    ) -> Result<ReplayPass, QueueError> {
        let backlog = self.store.list_pending(server_id).await?;
        let mut pass = ReplayPass::default();

        for row in backlog {
            if progress.seen.contains(&row.id) {
                continue;
            }

            let message = match self.registry.decode(&row.payload) {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(
                        command_id = %row.id,
                        message_type = %row.message_type,
                        error = %e,
                        "Buffered command cannot be reconstructed, marking failed"
                    );
                    self.store.mark_failed(row.id, e.to_string()).await?;
                    progress.seen.insert(row.id);
                    continue;
                }
            };

            if self.bus.publish(&message).delivered == 0 {
                tracing::debug!(
                    command_id = %row.id,
                    server_id = %server_id,
                    "Replayed command was not accepted; holding the rest back"
                );
                pass.blocked = true;
                break;
            }

            progress.seen.insert(row.id);
            progress.handed_off += 1;
            pass.handed_off += 1;
        }

        Ok(pass)
    }

    /// Delete a row. `false` if it did not exist.
    pub async fn acknowledge(&self, id: MessageId) -> Result<bool, QueueError> {
        Ok(self.store.delete(id).await?)
    }

    /// Delete terminal rows created more than `older_than` ago.
    pub async fn cleanup(&self, older_than: Duration) -> Result<usize, QueueError> {
        let cutoff = self.bus.clock().now() - older_than;
        let removed = self.store.delete_terminal_before(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, cutoff = %cutoff, "Cleaned up finished commands");
        }
        Ok(removed)
    }

    /// Look up a row and flag it if it has been `Sent` for too long.
    ///
    /// Stale rows are only reported; their status is left alone.
    pub async fn command_status(
        &self,
        id: MessageId,
    ) -> Result<Option<CommandStatusReport>, QueueError> {
        let now = self.bus.clock().now();
        Ok(self.store.get(id).await?.map(|command| CommandStatusReport {
            stale: command.is_stale(now, self.stale_after),
            command,
        }))
    }

    /// Every row stuck in `Sent` past the staleness threshold.
    pub async fn stale_commands(&self) -> Result<Vec<BufferedCommand>, QueueError> {
        let cutoff = self.bus.clock().now() - self.stale_after;
        Ok(self.store.list_sent_before(cutoff).await?)
    }
}
