//! Connection registry for hub-connected agents.
//!
//! Tracks which game servers currently hold a hub connection and the channel
//! feeding each connection's writer task. A server has at most one active
//! connection; a reconnect replaces the previous entry.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gamelink_domain::{Message, ServerId};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Errors routing a message to a connected agent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("Server {0} is not connected")]
    NotConnected(ServerId),
    #[error("Outbound channel for server {0} is full")]
    ChannelFull(ServerId),
    #[error("Outbound channel for server {0} is closed")]
    ChannelClosed(ServerId),
    #[error("Message {0} has no target server")]
    NoTarget(String),
}

/// Public view of a connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub server_id: ServerId,
    pub connection_id: Uuid,
    pub connected_at: DateTime<Utc>,
}

struct AgentConnection {
    info: ConnectionInfo,
    sender: mpsc::Sender<Message>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ServerId, AgentConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any previous one for the same server.
    ///
    /// Returns the replaced connection id. Dropping its sender ends the old
    /// writer task.
    pub fn register(
        &self,
        server_id: ServerId,
        connection_id: Uuid,
        connected_at: DateTime<Utc>,
        sender: mpsc::Sender<Message>,
    ) -> Option<Uuid> {
        let previous = self.connections.insert(
            server_id,
            AgentConnection {
                info: ConnectionInfo {
                    server_id,
                    connection_id,
                    connected_at,
                },
                sender,
            },
        );
        tracing::debug!(server_id = %server_id, connection_id = %connection_id, "Agent connection registered");
        previous.map(|old| old.info.connection_id)
    }

    /// Remove the entry for `server_id` only if it still belongs to
    /// `connection_id`.
    pub fn unregister(&self, server_id: ServerId, connection_id: Uuid) -> bool {
        let removed = self
            .connections
            .remove_if(&server_id, |_, conn| conn.info.connection_id == connection_id)
            .is_some();
        if removed {
            tracing::debug!(server_id = %server_id, connection_id = %connection_id, "Agent connection unregistered");
        }
        removed
    }

    pub fn is_connected(&self, server_id: ServerId) -> bool {
        self.connections.contains_key(&server_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn list(&self) -> Vec<ConnectionInfo> {
        let mut all: Vec<_> = self
            .connections
            .iter()
            .map(|entry| entry.value().info.clone())
            .collect();
        all.sort_by_key(|info| info.connected_at);
        all
    }

    /// Hand `message` to its target's writer without waiting.
    pub fn route(&self, message: &Message) -> Result<(), HubError> {
        let server_id = message
            .target_server_id()
            .ok_or_else(|| HubError::NoTarget(message.message_type().to_string()))?;

        // Clone the sender so the map shard is not held during send.
        let sender = self
            .connections
            .get(&server_id)
            .map(|conn| conn.sender.clone())
            .ok_or(HubError::NotConnected(server_id))?;

        sender.try_send(message.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HubError::ChannelFull(server_id),
            mpsc::error::TrySendError::Closed(_) => HubError::ChannelClosed(server_id),
        })
    }
}
