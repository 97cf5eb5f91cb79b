//! Outbound port to the game server process the agent runs beside.
//!
//! The agent never talks to a specific game engine directly; consumers call
//! [`GameServerPort`] and the binary wires in an implementation.

use async_trait::async_trait;
use gamelink_shared::MetricsSample;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameServerError {
    #[error("Player not found: {0}")]
    PlayerNotFound(String),

    #[error("Rejected by game server: {0}")]
    Rejected(String),

    #[error("Game server unavailable: {0}")]
    Unavailable(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GameServerPort: Send + Sync {
    async fn kick_player(&self, player_id: &str, reason: Option<String>)
        -> Result<(), GameServerError>;

    async fn ban_player(
        &self,
        player_id: &str,
        reason: Option<String>,
        duration_minutes: Option<u32>,
    ) -> Result<(), GameServerError>;

    /// Apply a setting and return the value now in effect.
    async fn apply_config(
        &self,
        key: &str,
        value: serde_json::Value,
    ) -> Result<serde_json::Value, GameServerError>;

    /// Broadcast a chat announcement. Returns how many players received it.
    async fn broadcast(&self, text: &str) -> Result<usize, GameServerError>;

    async fn sample_metrics(&self) -> Result<MetricsSample, GameServerError>;
}
