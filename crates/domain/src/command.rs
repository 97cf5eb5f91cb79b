//! Buffered command row and its lifecycle.
//!
//! `Pending -> Sent -> {Completed | Failed}`, plus `Pending -> Failed` when a
//! command cannot be (re)published at all. Terminal rows never change again.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{MessageId, ServerId};
use crate::message::{Message, MessageError};

/// Delivery status of a persisted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    /// Durably recorded, not yet handed to the transport.
    Pending,
    /// Handed to the transport; outcome unknown.
    Sent,
    /// Target reported success.
    Completed,
    /// Target reported failure, or the command could not be published.
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Strictly forward transitions only.
    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Sent)
                | (Self::Pending, Self::Failed)
                | (Self::Sent, Self::Completed)
                | (Self::Sent, Self::Failed)
        )
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::parse(format!("unknown command status '{other}'"))),
        }
    }
}

/// Persisted record backing the durable command queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferedCommand {
    pub id: MessageId,
    pub server_id: ServerId,
    pub message_type: String,
    /// Serialized [`Message`] envelope.
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub status: CommandStatus,
    pub response_payload: Option<String>,
    pub error_message: Option<String>,
}

impl BufferedCommand {
    /// New `Pending` row for a command message.
    pub fn from_message(message: &Message) -> Result<Self, MessageError> {
        if !message.is_command() {
            return Err(MessageError::KindMismatch {
                message_type: message.message_type().to_string(),
                expected: crate::message::MessageKind::Command,
            });
        }
        let server_id = message
            .target_server_id()
            .ok_or_else(|| MessageError::MissingTarget(message.message_type().to_string()))?;

        Ok(Self {
            id: message.id(),
            server_id,
            message_type: message.message_type().to_string(),
            payload: message.to_json()?,
            created_at: message.created_at(),
            sent_at: None,
            status: CommandStatus::Pending,
            response_payload: None,
            error_message: None,
        })
    }

    /// A `Sent` row with no recorded outcome after `threshold` probably lost
    /// its acknowledgement. It is reported, never replayed automatically.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match (self.status, self.sent_at) {
            (CommandStatus::Sent, Some(sent_at)) => now - sent_at > threshold,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::tests::{at, Joined, Kick};

    #[test]
    fn transitions_only_move_forward() {
        use CommandStatus::*;

        assert!(Pending.can_transition_to(Sent));
        assert!(Pending.can_transition_to(Failed));
        assert!(Sent.can_transition_to(Completed));
        assert!(Sent.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Sent.can_transition_to(Pending));
        for terminal in [Completed, Failed] {
            assert!(terminal.is_terminal());
            for next in [Pending, Sent, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn status_storage_form_round_trips() {
        for status in [
            CommandStatus::Pending,
            CommandStatus::Sent,
            CommandStatus::Completed,
            CommandStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<CommandStatus>().expect("parse"), status);
        }
        assert!("delivered".parse::<CommandStatus>().is_err());
    }

    #[test]
    fn from_message_builds_a_pending_row() {
        let target = ServerId::new();
        let msg = Message::command::<Kick>(target, at(5), |k| k.player = "zed".into())
            .expect("command");

        let row = BufferedCommand::from_message(&msg).expect("row");
        assert_eq!(row.id, msg.id());
        assert_eq!(row.server_id, target);
        assert_eq!(row.message_type, "test.kick");
        assert_eq!(row.status, CommandStatus::Pending);
        assert_eq!(row.created_at, at(5));
        assert!(row.sent_at.is_none());
        assert_eq!(row.payload, msg.to_json().expect("json"));
    }

    #[test]
    fn events_cannot_be_buffered() {
        let msg = Message::event::<Joined>(Some(ServerId::new()), at(0), |_| {}).expect("event");
        assert!(BufferedCommand::from_message(&msg).is_err());
    }

    #[test]
    fn only_sent_rows_past_the_threshold_are_stale() {
        let msg = Message::command::<Kick>(ServerId::new(), at(0), |_| {}).expect("command");
        let mut row = BufferedCommand::from_message(&msg).expect("row");
        let threshold = Duration::seconds(60);

        assert!(!row.is_stale(at(1_000), threshold));

        row.status = CommandStatus::Sent;
        row.sent_at = Some(at(10));
        assert!(!row.is_stale(at(60), threshold));
        assert!(row.is_stale(at(71), threshold));

        row.status = CommandStatus::Completed;
        assert!(!row.is_stale(at(1_000), threshold));
    }
}
