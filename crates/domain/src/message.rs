//! Message envelope shared by commands and events.
//!
//! A [`Message`] is the unit moved by the in-process bus, persisted by the
//! durable command queue, and carried over the hub connection. The payload is
//! kept as untyped JSON (`data`) tagged by `message_type`; consumers decode it
//! into a concrete [`MessagePayload`] type when they need it.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ServerId};

/// The two concrete kinds of message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A requested action with an expected eventual outcome, routed to one target.
    Command,
    /// A notification of something that already happened.
    #[default]
    Event,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Event => write!(f, "event"),
        }
    }
}

/// A concrete payload shape that can travel inside a [`Message`].
///
/// `MESSAGE_TYPE` is the routing and replay tag. It must be unique across the
/// catalog and stable across releases, since persisted commands refer to it.
pub trait MessagePayload: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    const MESSAGE_TYPE: &'static str;
    const KIND: MessageKind;
}

/// Errors raised while building, decoding, or reconstructing messages.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    /// Payload could not be mapped to or from its declared type.
    #[error("Serialization failure for {message_type}: {reason}")]
    Serialization { message_type: String, reason: String },

    /// No decoder is registered for this tag.
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Typed access asked for a different payload than the message carries.
    #[error("Message type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    /// A payload type was used with the factory for the other kind.
    #[error("{message_type} is not a {expected}")]
    KindMismatch {
        message_type: String,
        expected: MessageKind,
    },

    /// Commands must name the server they are routed to.
    #[error("Command {0} has no target server")]
    MissingTarget(String),
}

impl MessageError {
    pub fn serialization(message_type: impl Into<String>, reason: impl ToString) -> Self {
        Self::Serialization {
            message_type: message_type.into(),
            reason: reason.to_string(),
        }
    }
}

/// Envelope for every command and event.
///
/// Fields are private: a message is populated once by its factory and is
/// read-only afterwards. The serialized form is the hub wire shape
/// (`id`, `kind`, `messageType`, `targetServerId`, `data`, `createdAt`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: MessageId,
    #[serde(default)]
    kind: MessageKind,
    message_type: String,
    target_server_id: Option<ServerId>,
    data: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl Message {
    /// Build a command for `target` from `T::default()` adjusted by `configure`.
    pub fn command<T: MessagePayload>(
        target: ServerId,
        now: DateTime<Utc>,
        configure: impl FnOnce(&mut T),
    ) -> Result<Self, MessageError> {
        if T::KIND != MessageKind::Command {
            return Err(MessageError::KindMismatch {
                message_type: T::MESSAGE_TYPE.to_string(),
                expected: MessageKind::Command,
            });
        }
        Self::build::<T>(Some(target), now, configure)
    }

    /// Build an event, optionally scoped to the server it concerns.
    pub fn event<T: MessagePayload>(
        server_id: Option<ServerId>,
        now: DateTime<Utc>,
        configure: impl FnOnce(&mut T),
    ) -> Result<Self, MessageError> {
        if T::KIND != MessageKind::Event {
            return Err(MessageError::KindMismatch {
                message_type: T::MESSAGE_TYPE.to_string(),
                expected: MessageKind::Event,
            });
        }
        Self::build::<T>(server_id, now, configure)
    }

    fn build<T: MessagePayload>(
        target_server_id: Option<ServerId>,
        now: DateTime<Utc>,
        configure: impl FnOnce(&mut T),
    ) -> Result<Self, MessageError> {
        let mut payload = T::default();
        configure(&mut payload);
        let data = serde_json::to_value(&payload)
            .map_err(|e| MessageError::serialization(T::MESSAGE_TYPE, e))?;

        Ok(Self {
            id: MessageId::new(),
            kind: T::KIND,
            message_type: T::MESSAGE_TYPE.to_string(),
            target_server_id,
            data,
            created_at: now,
        })
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn target_server_id(&self) -> Option<ServerId> {
        self.target_server_id
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_command(&self) -> bool {
        self.kind == MessageKind::Command
    }

    /// True if this message carries payload type `T`.
    pub fn is<T: MessagePayload>(&self) -> bool {
        self.message_type == T::MESSAGE_TYPE
    }

    /// Decode the payload as `T`.
    pub fn payload<T: MessagePayload>(&self) -> Result<T, MessageError> {
        if !self.is::<T>() {
            return Err(MessageError::TypeMismatch {
                expected: T::MESSAGE_TYPE,
                actual: self.message_type.clone(),
            });
        }
        T::deserialize(&self.data).map_err(|e| MessageError::serialization(T::MESSAGE_TYPE, e))
    }

    /// Serialized envelope as stored in the command table.
    pub fn to_json(&self) -> Result<String, MessageError> {
        serde_json::to_string(self).map_err(|e| MessageError::serialization(&self.message_type, e))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Kick {
        pub player: String,
    }

    impl MessagePayload for Kick {
        const MESSAGE_TYPE: &'static str = "test.kick";
        const KIND: MessageKind = MessageKind::Command;
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Joined {
        pub player: String,
    }

    impl MessagePayload for Joined {
        const MESSAGE_TYPE: &'static str = "test.joined";
        const KIND: MessageKind = MessageKind::Event;
    }

    pub(crate) fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn command_factory_applies_configure_and_stamps_envelope() {
        let target = ServerId::new();
        let msg = Message::command::<Kick>(target, at(0), |k| k.player = "alice".into())
            .expect("build command");

        assert_eq!(msg.kind(), MessageKind::Command);
        assert_eq!(msg.message_type(), "test.kick");
        assert_eq!(msg.target_server_id(), Some(target));
        assert_eq!(msg.created_at(), at(0));
        assert_eq!(
            msg.payload::<Kick>().expect("decode"),
            Kick {
                player: "alice".into()
            }
        );
    }

    #[test]
    fn factories_reject_payloads_of_the_other_kind() {
        let err = Message::command::<Joined>(ServerId::new(), at(0), |_| {}).expect_err("should fail");
        assert!(matches!(err, MessageError::KindMismatch { .. }));

        let err = Message::event::<Kick>(None, at(0), |_| {}).expect_err("should fail");
        assert!(matches!(err, MessageError::KindMismatch { .. }));
    }

    #[test]
    fn each_message_gets_a_fresh_id() {
        let a = Message::event::<Joined>(None, at(0), |_| {}).expect("a");
        let b = Message::event::<Joined>(None, at(0), |_| {}).expect("b");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn typed_access_to_the_wrong_payload_is_an_error() {
        let msg = Message::event::<Joined>(None, at(0), |_| {}).expect("event");
        let err = msg.payload::<Kick>().expect_err("should fail");
        assert_eq!(
            err,
            MessageError::TypeMismatch {
                expected: "test.kick",
                actual: "test.joined".into()
            }
        );
    }

    #[test]
    fn wire_shape_uses_camel_case_field_names() {
        let target = ServerId::new();
        let msg = Message::command::<Kick>(target, at(0), |k| k.player = "bob".into())
            .expect("command");
        let value = serde_json::to_value(&msg).expect("to value");

        assert_eq!(value["messageType"], "test.kick");
        assert_eq!(value["targetServerId"], target.to_string());
        assert_eq!(value["kind"], "command");
        assert_eq!(value["data"]["player"], "bob");
        assert!(value.get("createdAt").is_some());
    }
}
