//! Background services around the command queue.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use gamelink_shared::{CommandResult, HostedService, Message, MessageBus, MessageFilter, Subscription};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::command_queue::CommandQueue;

/// Periodically deletes finished commands older than the retention horizon.
pub struct CleanupWorker {
    queue: Arc<CommandQueue>,
    retention: chrono::Duration,
    interval: Duration,
}

impl CleanupWorker {
    pub fn new(queue: Arc<CommandQueue>, retention: chrono::Duration, interval: Duration) -> Self {
        Self {
            queue,
            retention,
            interval,
        }
    }
}

#[async_trait]
impl HostedService for CleanupWorker {
    fn name(&self) -> &'static str {
        "command-cleanup"
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if let Err(e) = self.queue.cleanup(self.retention).await {
                tracing::error!(error = %e, "Command cleanup failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Command cleanup worker shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

/// Reports commands stuck in `Sent`. Never changes their status: the action
/// may already have run on the target.
pub struct StaleCommandMonitor {
    queue: Arc<CommandQueue>,
    interval: Duration,
}

impl StaleCommandMonitor {
    pub fn new(queue: Arc<CommandQueue>, interval: Duration) -> Self {
        Self { queue, interval }
    }

    /// One scan; returns how many stale rows were reported.
    pub async fn scan(&self) -> usize {
        match self.queue.stale_commands().await {
            Ok(stale) => {
                for command in &stale {
                    tracing::warn!(
                        command_id = %command.id,
                        server_id = %command.server_id,
                        message_type = %command.message_type,
                        sent_at = ?command.sent_at,
                        "Command has no recorded response; acknowledgement may be lost"
                    );
                }
                stale.len()
            }
            Err(e) => {
                tracing::error!(error = %e, "Stale command scan failed");
                0
            }
        }
    }
}

#[async_trait]
impl HostedService for StaleCommandMonitor {
    fn name(&self) -> &'static str {
        "stale-command-monitor"
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Stale command monitor shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.scan().await;
                }
            }
        }
    }
}

/// Records `CommandResult` events published on the bus against their rows.
///
/// The subscription is taken at construction so results that arrive before
/// the service task starts are queued rather than lost.
pub struct CommandResultRecorder {
    queue: Arc<CommandQueue>,
    inbox: Mutex<Option<(Subscription, mpsc::Receiver<Message>)>>,
}

const RESULT_INBOX_CAPACITY: usize = 1024;

impl CommandResultRecorder {
    pub fn new(queue: Arc<CommandQueue>, bus: &MessageBus) -> Self {
        let inbox = bus.subscribe_queued(MessageFilter::of::<CommandResult>(), RESULT_INBOX_CAPACITY);
        Self {
            queue,
            inbox: Mutex::new(Some(inbox)),
        }
    }

    async fn record(&self, message: &Message) {
        let result = match message.payload::<CommandResult>() {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(message_id = %message.id(), error = %e, "Malformed command result");
                return;
            }
        };

        if let Err(e) = self.queue.record_result(&result).await {
            tracing::error!(
                command_id = %result.command_id,
                error = %e,
                "Failed to record command result"
            );
        }
    }
}

#[async_trait]
impl HostedService for CommandResultRecorder {
    fn name(&self) -> &'static str {
        "command-result-recorder"
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let taken = self
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some((_subscription, mut inbox)) = taken else {
            tracing::warn!("Command result recorder started twice");
            return;
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = inbox.recv() => match next {
                    Some(message) => self.record(&message).await,
                    None => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ports::{CommandOutcome, MockCommandStore};
    use gamelink_domain::{BufferedCommand, CommandStatus, MessageId, ServerId};
    use gamelink_shared::{builtin_registry, KickPlayer};
    use mockall::predicate::eq;

    fn queue(store: MockCommandStore, bus: MessageBus) -> Arc<CommandQueue> {
        Arc::new(CommandQueue::new(
            Arc::new(store),
            bus,
            builtin_registry(),
            chrono::Duration::seconds(30),
        ))
    }

    #[tokio::test]
    async fn recorder_applies_published_results() {
        let bus = MessageBus::default();
        let command_id = MessageId::new();

        let (done_tx, mut done_rx) = mpsc::channel(1);
        let mut store = MockCommandStore::new();
        store
            .expect_record_response()
            .with(
                eq(command_id),
                eq(CommandOutcome {
                    success: true,
                    response: Some("kicked".into()),
                    error: None,
                }),
            )
            .times(1)
            .returning(move |_, _| {
                let _ = done_tx.try_send(());
                Ok(true)
            });

        let recorder = Arc::new(CommandResultRecorder::new(queue(store, bus.clone()), &bus));
        let result = bus
            .create_event::<CommandResult>(None, |r| r.succeeded(command_id, "kicked"))
            .expect("event");
        // Published before the task starts; the inbox holds it.
        assert_eq!(bus.publish(&result).delivered, 1);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(recorder.run(cancel.clone()));
        done_rx.recv().await.expect("recorded");
        cancel.cancel();
        task.await.expect("join");
    }

    #[tokio::test]
    async fn stale_scan_reports_without_mutating() {
        let bus = MessageBus::default();
        let msg = bus
            .create_command::<KickPlayer>(ServerId::new(), |_| {})
            .expect("command");
        let mut row = BufferedCommand::from_message(&msg).expect("row");
        row.status = CommandStatus::Sent;
        row.sent_at = Some(msg.created_at());

        let mut store = MockCommandStore::new();
        store
            .expect_list_sent_before()
            .returning(move |_| Ok(vec![row.clone()]));
        store.expect_record_response().never();
        store.expect_mark_failed().never();
        store.expect_mark_sent().never();

        let monitor = StaleCommandMonitor::new(queue(store, bus), Duration::from_secs(60));
        assert_eq!(monitor.scan().await, 1);
    }
}
