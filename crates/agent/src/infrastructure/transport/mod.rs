//! Resilient transport between the agent bus and the Engine hub.

pub mod backoff;
pub mod client;
pub mod connection;
pub mod http_token;
pub mod outbound;
pub mod ports;
pub mod ws;

pub use backoff::BackoffSchedule;
pub use client::{TransportClient, TransportSettings};
pub use connection::{ConnectionState, ConnectionStateObserver, ConnectionStatus};
pub use http_token::HttpTokenExchange;
pub use outbound::{OutboundQueue, OverflowPolicy, DEFAULT_OUTBOUND_CAPACITY};
pub use ports::{HubConnector, HubReceiver, HubSender, TokenExchange, TransportError};
pub use ws::WsHubConnector;
