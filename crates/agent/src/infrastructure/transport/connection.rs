//! Connection state and its read-only observer.
//!
//! The transport owns a [`ConnectionStatus`]; everything else gets a
//! [`ConnectionStateObserver`] injected and can only read or wait for changes.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Link state between the agent and the Engine hub.
///
/// There is no terminal failure state: while the agent runs it keeps
/// reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying (before start, after shutdown)
    Disconnected,
    /// First connection attempt in progress
    Connecting,
    /// Link is up
    Connected,
    /// Link was lost or an attempt failed; waiting out the backoff
    Reconnecting,
}

impl ConnectionState {
    /// Convert to u8 for atomic storage.
    pub fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
        }
    }

    /// Convert from u8 (atomic storage).
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Writable side, held by the transport.
#[derive(Clone)]
pub struct ConnectionStatus {
    state: Arc<AtomicU8>,
    changes: Arc<watch::Sender<ConnectionState>>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStatus {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state: Arc::new(AtomicU8::new(ConnectionState::Disconnected.to_u8())),
            changes: Arc::new(changes),
        }
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Store `next` and notify watchers if it differs from the current state.
    pub fn set(&self, next: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.swap(next.to_u8(), Ordering::SeqCst));
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Connection state changed");
            self.changes.send_replace(next);
        }
    }

    pub fn observer(&self) -> ConnectionStateObserver {
        ConnectionStateObserver {
            state: Arc::clone(&self.state),
            changes: self.changes.subscribe(),
        }
    }
}

/// Read-only view of the connection state.
#[derive(Clone)]
pub struct ConnectionStateObserver {
    state: Arc<AtomicU8>,
    changes: watch::Receiver<ConnectionState>,
}

impl ConnectionStateObserver {
    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver that is notified on every state change.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.changes.clone()
    }

    /// Wait until the state equals `target`. Returns `false` if the
    /// transport was dropped first.
    pub async fn wait_for(&self, target: ConnectionState) -> bool {
        let mut changes = self.changes.clone();
        let reached = changes.wait_for(|state| *state == target).await.is_ok();
        reached
    }
}

impl fmt::Debug for ConnectionStateObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStateObserver")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_roundtrip() {
        let states = [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
        ];

        for state in states {
            assert_eq!(ConnectionState::from_u8(state.to_u8()), state);
        }
    }

    #[test]
    fn test_observer_reads_state() {
        let status = ConnectionStatus::new();
        let observer = status.observer();

        assert_eq!(observer.state(), ConnectionState::Disconnected);
        assert!(!observer.is_connected());

        status.set(ConnectionState::Connected);

        assert_eq!(observer.state(), ConnectionState::Connected);
        assert!(observer.is_connected());
    }

    #[tokio::test]
    async fn watchers_see_changes() {
        let status = ConnectionStatus::new();
        let observer = status.observer();
        let mut changes = observer.watch();

        status.set(ConnectionState::Connecting);
        changes.changed().await.expect("changed");
        assert_eq!(*changes.borrow(), ConnectionState::Connecting);

        let waiter = tokio::spawn({
            let observer = observer.clone();
            async move { observer.wait_for(ConnectionState::Connected).await }
        });
        status.set(ConnectionState::Connected);
        assert!(waiter.await.expect("join"));
    }

    #[tokio::test]
    async fn waiting_ends_when_the_transport_goes_away() {
        let status = ConnectionStatus::new();
        let observer = status.observer();

        let waiter = tokio::spawn(async move { observer.wait_for(ConnectionState::Connected).await });
        tokio::task::yield_now().await;
        drop(status);

        assert!(!waiter.await.expect("join"));
    }
}
