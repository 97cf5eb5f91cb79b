//! Concrete command and event payloads exchanged between Engine and Agent.
//!
//! Every payload implements [`MessagePayload`]; the tag strings below are
//! persisted in the command table, so renaming one strands rows written by an
//! older build.

use gamelink_domain::{MessageId, MessageKind, MessagePayload, MessageRegistry};
use serde::{Deserialize, Serialize};

macro_rules! payload {
    ($ty:ty, $tag:literal, $kind:ident) => {
        impl MessagePayload for $ty {
            const MESSAGE_TYPE: &'static str = $tag;
            const KIND: MessageKind = MessageKind::$kind;
        }
    };
}

// =============================================================================
// Commands (Engine -> Agent)
// =============================================================================

/// Remove a player from the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KickPlayer {
    pub player_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
payload!(KickPlayer, "moderation.kickPlayer", Command);

/// Ban a player. `duration_minutes: None` is permanent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanPlayer {
    pub player_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
}
payload!(BanPlayer, "moderation.banPlayer", Command);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfig {
    pub key: String,
    pub value: serde_json::Value,
}
payload!(UpdateConfig, "config.update", Command);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnounceMessage {
    pub text: String,
}
payload!(AnnounceMessage, "announcement.broadcast", Command);

// =============================================================================
// Events (Agent -> Engine)
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoined {
    pub player_id: String,
    pub player_name: String,
}
payload!(PlayerJoined, "session.playerJoined", Event);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeft {
    pub player_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
payload!(PlayerLeft, "session.playerLeft", Event);

/// Periodic server health sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSample {
    pub players_online: u32,
    pub tick_ms: f64,
    pub memory_bytes: u64,
}
payload!(MetricsSample, "metrics.sample", Event);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSynced {
    pub key: String,
    pub value: serde_json::Value,
}
payload!(ConfigSynced, "config.synced", Event);

/// Outcome of a command, correlated by the command's message id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub command_id: MessageId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
payload!(CommandResult, "command.result", Event);

impl CommandResult {
    pub fn succeeded(&mut self, command_id: MessageId, response: impl Into<String>) {
        self.command_id = command_id;
        self.success = true;
        self.response = Some(response.into());
        self.error = None;
    }

    pub fn failed(&mut self, command_id: MessageId, error: impl Into<String>) {
        self.command_id = command_id;
        self.success = false;
        self.response = None;
        self.error = Some(error.into());
    }
}

/// Registry holding every payload in this catalog.
pub fn builtin_registry() -> MessageRegistry {
    MessageRegistry::new()
        .with::<KickPlayer>()
        .with::<BanPlayer>()
        .with::<UpdateConfig>()
        .with::<AnnounceMessage>()
        .with::<PlayerJoined>()
        .with::<PlayerLeft>()
        .with::<MetricsSample>()
        .with::<ConfigSynced>()
        .with::<CommandResult>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gamelink_domain::{Message, ServerId};

    #[test]
    fn builtin_registry_knows_every_catalog_type() {
        let registry = builtin_registry();
        assert_eq!(registry.len(), 9);
        assert_eq!(
            registry.kind_of(KickPlayer::MESSAGE_TYPE),
            Some(MessageKind::Command)
        );
        assert_eq!(
            registry.kind_of(CommandResult::MESSAGE_TYPE),
            Some(MessageKind::Event)
        );
    }

    #[test]
    fn persisted_ban_command_decodes_through_the_registry() {
        let msg = Message::command::<BanPlayer>(ServerId::new(), Utc::now(), |b| {
            b.player_id = "p-7".into();
            b.duration_minutes = Some(30);
        })
        .expect("command");

        let restored = builtin_registry()
            .decode(&msg.to_json().expect("json"))
            .expect("decode");
        let ban = restored.payload::<BanPlayer>().expect("payload");
        assert_eq!(ban.player_id, "p-7");
        assert_eq!(ban.duration_minutes, Some(30));
        assert_eq!(ban.reason, None);
    }

    #[test]
    fn command_result_helpers_keep_outcome_fields_consistent() {
        let id = MessageId::new();
        let mut result = CommandResult::default();

        result.failed(id, "player offline");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("player offline"));

        result.succeeded(id, "kicked");
        assert!(result.success);
        assert_eq!(result.command_id, id);
        assert!(result.error.is_none());
    }
}
