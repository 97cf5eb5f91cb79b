//! GameLink Agent
//!
//! Runs beside a game server. Keeps a resilient link to the Engine hub,
//! executes the commands it receives against the game server and reports
//! results and metrics back.
//!
//! ## Structure
//!
//! - `infrastructure::transport` - token exchange, hub link, reconnect loop
//! - `application` - hosted command consumers and the metrics reporter
//! - `ports` - the game server seam

pub mod app;
pub mod application;
pub mod infrastructure;
pub mod ports;

#[cfg(test)]
mod e2e_tests;

pub use app::Agent;
