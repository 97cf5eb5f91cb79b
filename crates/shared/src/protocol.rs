//! Wire protocol between the Agent transport and the Engine hub.
//!
//! The duplex channel carries [`HubFrame`]s as JSON text frames. Before
//! opening it the Agent trades its long-lived access key for a bearer token
//! through [`TOKEN_PATH`].

use gamelink_domain::Message;
use serde::{Deserialize, Serialize};

/// One-shot token exchange endpoint.
pub const TOKEN_PATH: &str = "/auth/token";

/// Duplex hub endpoint (WebSocket upgrade).
pub const HUB_PATH: &str = "/hub";

/// Query parameter naming the connecting server on [`HUB_PATH`].
pub const SERVER_ID_PARAM: &str = "serverId";

/// A single hub frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "message", rename_all = "camelCase")]
pub enum HubFrame {
    /// Agent -> Engine
    PublishEvent(Message),
    /// Engine -> Agent
    ReceiveEvent(Message),
}

impl HubFrame {
    pub fn message(&self) -> &Message {
        match self {
            Self::PublishEvent(message) | Self::ReceiveEvent(message) => message,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Self::PublishEvent(message) | Self::ReceiveEvent(message) => message,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// Short-lived bearer credential for the hub upgrade
    pub access_token: String,
    pub token_type: String,
    /// Seconds until `access_token` expires
    pub expires_in: u64,
}
