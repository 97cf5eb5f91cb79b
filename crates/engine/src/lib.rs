//! GameLink Engine library.
//!
//! The control-plane side of GameLink: commands for remote game servers are
//! persisted before they are published, replayed when their target connects,
//! and correlated with the results the target reports back.
//!
//! ## Structure
//!
//! - `infrastructure/` - Ports, SQLite store, token issuer, configuration
//! - `use_cases/` - Durable command queue and its background workers
//! - `api/` - HTTP routes and the WebSocket hub for agents
//! - `app` - Application composition

pub mod api;
pub mod app;
pub mod infrastructure;
pub mod use_cases;

pub use app::App;
