//! Game server adapter that only logs what it is asked to do.
//!
//! Used when the agent runs without an embedding game engine, and in tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use gamelink_shared::MetricsSample;

use crate::ports::{GameServerError, GameServerPort};

#[derive(Default)]
struct State {
    online: HashSet<String>,
    banned: HashSet<String>,
    config: HashMap<String, serde_json::Value>,
}

pub struct LoggingGameServer {
    state: Mutex<State>,
}

impl Default for LoggingGameServer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingGameServer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Mark a player as online.
    pub fn join(&self, player_id: impl Into<String>) {
        self.lock().online.insert(player_id.into());
    }

    pub fn is_online(&self, player_id: &str) -> bool {
        self.lock().online.contains(player_id)
    }

    pub fn is_banned(&self, player_id: &str) -> bool {
        self.lock().banned.contains(player_id)
    }

    pub fn config_value(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().config.get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl GameServerPort for LoggingGameServer {
    async fn kick_player(
        &self,
        player_id: &str,
        reason: Option<String>,
    ) -> Result<(), GameServerError> {
        if !self.lock().online.remove(player_id) {
            return Err(GameServerError::PlayerNotFound(player_id.to_string()));
        }
        tracing::info!(player_id, reason = ?reason, "Kicked player");
        Ok(())
    }

    async fn ban_player(
        &self,
        player_id: &str,
        reason: Option<String>,
        duration_minutes: Option<u32>,
    ) -> Result<(), GameServerError> {
        let mut state = self.lock();
        state.online.remove(player_id);
        state.banned.insert(player_id.to_string());
        tracing::info!(player_id, reason = ?reason, duration_minutes = ?duration_minutes, "Banned player");
        Ok(())
    }

    async fn apply_config(
        &self,
        key: &str,
        value: serde_json::Value,
    ) -> Result<serde_json::Value, GameServerError> {
        if key.trim().is_empty() {
            return Err(GameServerError::Rejected("config key is empty".to_string()));
        }
        self.lock().config.insert(key.to_string(), value.clone());
        tracing::info!(key, value = %value, "Applied config");
        Ok(value)
    }

    async fn broadcast(&self, text: &str) -> Result<usize, GameServerError> {
        let recipients = self.lock().online.len();
        tracing::info!(recipients, text, "Broadcast announcement");
        Ok(recipients)
    }

    async fn sample_metrics(&self) -> Result<MetricsSample, GameServerError> {
        let players_online = self.lock().online.len() as u32;
        Ok(MetricsSample {
            players_online,
            tick_ms: 0.0,
            memory_bytes: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn kicking_requires_an_online_player() {
        let server = LoggingGameServer::new();
        server.join("p1");

        assert!(server.kick_player("p1", None).await.is_ok());
        assert!(!server.is_online("p1"));
        assert_eq!(
            server.kick_player("p1", None).await,
            Err(GameServerError::PlayerNotFound("p1".into()))
        );
    }

    #[tokio::test]
    async fn ban_removes_the_player_and_remembers_the_ban() {
        let server = LoggingGameServer::new();
        server.join("p2");

        server
            .ban_player("p2", Some("griefing".into()), Some(60))
            .await
            .expect("ban");
        assert!(server.is_banned("p2"));
        assert_eq!(server.sample_metrics().await.expect("metrics").players_online, 0);
    }
}
