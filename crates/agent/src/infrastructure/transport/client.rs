//! Resilient link between the agent's local bus and the Engine hub.
//!
//! One background loop per client owns the connection:
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                     |             |  link lost
//!                     v             v
//!                 Reconnecting <----+
//!                     ^   |
//!                     +---+ attempt failed
//! ```
//!
//! Local events are always appended to the [`OutboundQueue`] and the loop
//! drains it in order whenever the link is up. A failed send leaves that item
//! at the head, drops the link and lets the next connection retry it.

use std::sync::Arc;
use std::time::Duration;

use gamelink_domain::{Message, MessageKind, MessageRegistry, ServerId};
use gamelink_shared::{MessageBus, MessageFilter, Subscription};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backoff::BackoffSchedule;
use super::connection::{ConnectionState, ConnectionStateObserver, ConnectionStatus};
use super::outbound::{Enqueued, OutboundQueue, RecentIds};
use super::ports::{HubConnector, HubReceiver, HubSender, TokenExchange, TransportError};

const RECENT_INBOUND_IDS: usize = 4096;

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub server_id: ServerId,
    /// Long-lived access key traded for a bearer token on every attempt
    pub access_token: String,
    pub backoff: BackoffSchedule,
    /// A session must stay up this long before the backoff starts over
    pub stable_after: Duration,
    /// Time allowed to flush queued sends when shutting down
    pub shutdown_grace: Duration,
}

/// Why a connected session ended.
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    Lost(TransportError),
}

struct Shared {
    settings: TransportSettings,
    bus: MessageBus,
    registry: MessageRegistry,
    tokens: Arc<dyn TokenExchange>,
    connector: Arc<dyn HubConnector>,
    outbound: Arc<OutboundQueue>,
    outbound_ready: Arc<Notify>,
    inbound_ids: Arc<RecentIds>,
    status: ConnectionStatus,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct TransportClient {
    shared: Arc<Shared>,
    running: Mutex<Option<RunningLoop>>,
    _outbound_subscription: Subscription,
}

impl TransportClient {
    pub fn new(
        settings: TransportSettings,
        bus: MessageBus,
        registry: MessageRegistry,
        tokens: Arc<dyn TokenExchange>,
        connector: Arc<dyn HubConnector>,
        outbound: Arc<OutboundQueue>,
    ) -> Self {
        let outbound_ready = Arc::new(Notify::new());
        let inbound_ids = Arc::new(RecentIds::new(RECENT_INBOUND_IDS));
        let subscription = install_outbound_forwarder(
            &bus,
            outbound.clone(),
            outbound_ready.clone(),
            inbound_ids.clone(),
        );

        Self {
            shared: Arc::new(Shared {
                settings,
                bus,
                registry,
                tokens,
                connector,
                outbound,
                outbound_ready,
                inbound_ids,
                status: ConnectionStatus::new(),
            }),
            running: Mutex::new(None),
            _outbound_subscription: subscription,
        }
    }

    pub fn observer(&self) -> ConnectionStateObserver {
        self.shared.status.observer()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status.get()
    }

    /// Messages waiting to be sent.
    pub fn queued(&self) -> usize {
        self.shared.outbound.len()
    }

    /// Start the connection loop. A loop that is already running is stopped
    /// first, so at most one connection sequence is ever active.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            tracing::info!("Restarting transport, stopping previous connection loop");
            stop(previous, self.shared.settings.shutdown_grace).await;
        }

        let cancel = CancellationToken::new();
        let shared = self.shared.clone();
        let handle = tokio::spawn(run(shared, cancel.clone()));
        *running = Some(RunningLoop { cancel, handle });
    }

    /// Stop the connection loop, waiting at most `grace` for it to flush.
    pub async fn shutdown(&self, grace: Duration) {
        if let Some(running) = self.running.lock().await.take() {
            stop(running, grace).await;
        }
        self.shared.status.set(ConnectionState::Disconnected);
    }
}

async fn stop(running: RunningLoop, grace: Duration) {
    running.cancel.cancel();
    let mut handle = running.handle;
    if tokio::time::timeout(grace, &mut handle).await.is_err() {
        tracing::warn!(
            grace_ms = grace.as_millis() as u64,
            "Transport loop did not stop in time, aborting"
        );
        handle.abort();
    }
}

/// Queue every local event for the Engine, except those that came from it.
fn install_outbound_forwarder(
    bus: &MessageBus,
    outbound: Arc<OutboundQueue>,
    ready: Arc<Notify>,
    inbound_ids: Arc<RecentIds>,
) -> Subscription {
    bus.subscribe(MessageFilter::Kind(MessageKind::Event), move |message| {
        if inbound_ids.contains(message.id()) {
            return Ok(());
        }

        match outbound.push(message.clone()) {
            Enqueued::Queued => {}
            Enqueued::Evicted(dropped) => tracing::warn!(
                dropped = %dropped,
                capacity = outbound.capacity(),
                "Outbound queue full, dropped oldest message"
            ),
            Enqueued::Rejected => {
                anyhow::bail!("outbound queue is full ({} messages)", outbound.capacity())
            }
        }
        ready.notify_one();
        Ok(())
    })
}

async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    let server_id = shared.settings.server_id;
    let mut failures = 0usize;
    shared.status.set(ConnectionState::Connecting);

    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = shared.open_link() => attempt,
        };

        match attempt {
            Ok((sender, receiver)) => {
                shared.status.set(ConnectionState::Connected);
                tracing::info!(server_id = %server_id, queued = shared.outbound.len(), "Transport connected");

                let connected_at = tokio::time::Instant::now();
                let end = shared.session(sender, receiver, &cancel).await;
                // A link that drops right after the handshake counts as
                // another failed attempt.
                let uptime = connected_at.elapsed();
                if uptime >= shared.settings.stable_after {
                    failures = 0;
                }

                match end {
                    SessionEnd::Cancelled => break,
                    SessionEnd::Lost(e) => {
                        tracing::warn!(
                            server_id = %server_id,
                            uptime_ms = uptime.as_millis() as u64,
                            error = %e,
                            "Hub link lost"
                        );
                    }
                }
            }
            Err(e) => {
                tracing::warn!(server_id = %server_id, attempt = failures, error = %e, "Connection attempt failed");
            }
        }

        shared.status.set(ConnectionState::Reconnecting);
        let delay = shared.settings.backoff.delay_for(failures);
        failures = failures.saturating_add(1);
        tracing::debug!(delay_ms = delay.as_millis() as u64, attempt = failures, "Waiting before reconnect");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.status.set(ConnectionState::Disconnected);
    tracing::info!(server_id = %server_id, "Transport loop stopped");
}

impl Shared {
    /// Token exchange followed by the hub handshake.
    async fn open_link(&self) -> Result<(Box<dyn HubSender>, Box<dyn HubReceiver>), TransportError> {
        let bearer = self.tokens.exchange(&self.settings.access_token).await?;
        self.connector.connect(&bearer).await
    }

    async fn session(
        &self,
        mut sender: Box<dyn HubSender>,
        mut receiver: Box<dyn HubReceiver>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        if let Err(e) = self.drain(sender.as_mut()).await {
            return SessionEnd::Lost(e);
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let grace = self.settings.shutdown_grace;
                    match tokio::time::timeout(grace, self.drain(sender.as_mut())).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => tracing::warn!(error = %e, "Could not flush outbound queue on shutdown"),
                        Err(_) => tracing::warn!(
                            remaining = self.outbound.len(),
                            "Outbound flush did not finish within grace period"
                        ),
                    }
                    sender.close().await;
                    return SessionEnd::Cancelled;
                }
                inbound = receiver.recv() => match inbound {
                    Some(Ok(message)) => self.accept_inbound(message),
                    Some(Err(e)) => return SessionEnd::Lost(e),
                    None => return SessionEnd::Lost(TransportError::Closed),
                },
                _ = self.outbound_ready.notified() => {
                    if let Err(e) = self.drain(sender.as_mut()).await {
                        return SessionEnd::Lost(e);
                    }
                }
            }
        }
    }

    /// Send queued messages head first. Stops at the first failure and
    /// leaves the failed message and everything behind it queued.
    async fn drain(&self, sender: &mut dyn HubSender) -> Result<usize, TransportError> {
        let mut sent = 0;
        while let Some(next) = self.outbound.front() {
            if let Err(e) = sender.send(&next).await {
                tracing::warn!(
                    message_id = %next.id(),
                    message_type = %next.message_type(),
                    remaining = self.outbound.len(),
                    error = %e,
                    "Send failed, message stays queued"
                );
                return Err(e);
            }
            self.outbound.remove_front(next.id());
            sent += 1;
        }
        if sent > 0 {
            tracing::debug!(sent, "Drained outbound queue");
        }
        Ok(sent)
    }

    fn accept_inbound(&self, message: Message) {
        if let Err(e) = self.registry.validate(&message) {
            tracing::warn!(error = %e, "Rejected inbound message");
            return;
        }
        if let Some(target) = message.target_server_id() {
            if target != self.settings.server_id {
                tracing::warn!(
                    message_type = %message.message_type(),
                    target = %target,
                    "Inbound message addressed to another server, ignoring"
                );
                return;
            }
        }
        if !self.inbound_ids.remember(message.id()) {
            tracing::debug!(message_id = %message.id(), "Duplicate inbound message, ignoring");
            return;
        }

        self.bus.publish(&message);
    }
}
