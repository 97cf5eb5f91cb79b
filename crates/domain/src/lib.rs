//! Gamelink Domain - the message envelope and command lifecycle.
//!
//! Everything here is pure data plus invariants: no I/O, no runtime, no clock.
//! Callers pass timestamps in explicitly.
//!
//! ## Structure
//!
//! - `ids` - uuid newtypes for messages and servers
//! - `message` - the [`Message`] envelope and the [`MessagePayload`] trait
//! - `registry` - explicit tag → decoder map used on replay
//! - `command` - persisted command row and its status state machine

pub mod command;
pub mod error;
pub mod ids;
pub mod message;
pub mod registry;

pub use command::{BufferedCommand, CommandStatus};
pub use error::DomainError;
pub use ids::{MessageId, ServerId};
pub use message::{Message, MessageError, MessageKind, MessagePayload};
pub use registry::MessageRegistry;
