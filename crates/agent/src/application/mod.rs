//! Services hosted by the agent on top of the local bus.

pub mod consumers;
pub mod metrics;

pub use consumers::{
    AnnouncementConsumer, AnnouncementHandler, CommandConsumer, CommandHandler, ConfigConsumer,
    ConfigHandler, ModerationConsumer, ModerationHandler,
};
pub use metrics::MetricsReporter;
