//! Network seams of the transport: token exchange and the duplex hub link.

use async_trait::async_trait;
use gamelink_domain::Message;

/// Errors raised by the transport.
///
/// None of these end the agent; they all fall back to the reconnect loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The Engine refused the access token.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The token endpoint or hub could not be reached.
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Connection closed")]
    Closed,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Swaps the long-lived access token for a short-lived bearer token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, access_token: &str) -> Result<String, TransportError>;
}

/// Outbound half of an open hub link.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HubSender: Send {
    async fn send(&mut self, message: &Message) -> Result<(), TransportError>;

    async fn close(&mut self);
}

/// Inbound half of an open hub link.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HubReceiver: Send {
    /// Next message from the Engine. `None` once the link is closed.
    async fn recv(&mut self) -> Option<Result<Message, TransportError>>;
}

pub type HubLink = (Box<dyn HubSender>, Box<dyn HubReceiver>);

/// Opens the duplex link using a bearer token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HubConnector: Send + Sync {
    async fn connect(&self, bearer_token: &str) -> Result<HubLink, TransportError>;
}
