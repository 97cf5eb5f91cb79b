//! Command queue orchestration and its background services.

pub mod command_queue;
pub mod workers;

pub use command_queue::{CommandQueue, CommandStatusReport, QueueError};
