//! Explicit map from message-type tag to payload decoder.
//!
//! Persisted commands and wire messages only carry a string tag. Rebuilding
//! them goes through this registry: every tag a process understands is
//! registered up front, and anything else is rejected with
//! [`MessageError::UnknownType`].

use std::collections::HashMap;

use crate::message::{Message, MessageError, MessageKind, MessagePayload};

type ValidateFn = fn(&serde_json::Value) -> Result<(), serde_json::Error>;

#[derive(Clone, Copy)]
struct Registration {
    kind: MessageKind,
    validate: ValidateFn,
}

fn validate_as<T: MessagePayload>(data: &serde_json::Value) -> Result<(), serde_json::Error> {
    T::deserialize(data).map(|_| ())
}

/// Statically populated registry of known payload types.
#[derive(Clone, Default)]
pub struct MessageRegistry {
    entries: HashMap<&'static str, Registration>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register payload type `T` under its `MESSAGE_TYPE` tag.
    pub fn register<T: MessagePayload>(&mut self) -> &mut Self {
        self.entries.insert(
            T::MESSAGE_TYPE,
            Registration {
                kind: T::KIND,
                validate: validate_as::<T>,
            },
        );
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<T: MessagePayload>(mut self) -> Self {
        self.register::<T>();
        self
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.entries.contains_key(message_type)
    }

    pub fn kind_of(&self, message_type: &str) -> Option<MessageKind> {
        self.entries.get(message_type).map(|r| r.kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check that a message's tag is known, its kind matches the registration,
    /// commands carry a target, and its data decodes as the registered type.
    pub fn validate(&self, message: &Message) -> Result<(), MessageError> {
        let registration = self
            .entries
            .get(message.message_type())
            .ok_or_else(|| MessageError::UnknownType(message.message_type().to_string()))?;

        if registration.kind != message.kind() {
            return Err(MessageError::KindMismatch {
                message_type: message.message_type().to_string(),
                expected: registration.kind,
            });
        }

        if message.is_command() && message.target_server_id().is_none() {
            return Err(MessageError::MissingTarget(
                message.message_type().to_string(),
            ));
        }

        (registration.validate)(message.data())
            .map_err(|e| MessageError::serialization(message.message_type(), e))
    }

    /// Rebuild a message from its serialized envelope and validate it.
    pub fn decode(&self, raw: &str) -> Result<Message, MessageError> {
        let message: Message =
            serde_json::from_str(raw).map_err(|e| MessageError::serialization("envelope", e))?;
        self.validate(&message)?;
        Ok(message)
    }
}

impl std::fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.entries.keys().collect();
        tags.sort();
        f.debug_struct("MessageRegistry").field("types", &tags).finish()
    }
}
