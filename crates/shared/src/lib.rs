//! GameLink Shared - types and plumbing used by both Engine and Agent
//!
//! - Message catalog: the concrete command and event payloads
//! - Wire protocol: hub frames and token exchange DTOs
//! - In-process message bus
//! - Clock port and hosted-service lifecycle

pub mod bus;
pub mod clock;
pub mod lifecycle;
pub mod messages;
pub mod protocol;

pub use bus::{MessageBus, MessageFilter, PublishReport, Subscription};
pub use clock::{ClockPort, SystemClock};
#[cfg(any(test, feature = "testing"))]
pub use clock::{FixedClock, ManualClock};
pub use lifecycle::{HostedService, ServiceHost, ShutdownReport};
pub use messages::{
    builtin_registry, AnnounceMessage, BanPlayer, CommandResult, ConfigSynced, KickPlayer,
    MetricsSample, PlayerJoined, PlayerLeft, UpdateConfig,
};
pub use protocol::{HubFrame, TokenRequest, TokenResponse};

// Re-export the envelope so downstream crates need a single import path
pub use gamelink_domain::{Message, MessageId, MessageKind, MessagePayload, ServerId};
