//! Agent ↔ Engine E2E tests.
//!
//! Each test stands up the real Engine router on an ephemeral port with a
//! temporary SQLite command store, then drives the real agent transport
//! (reqwest token exchange + tokio-tungstenite hub link) against it.
//!
//! ```bash
//! cargo test -p gamelink-agent --lib e2e_tests
//! ```

mod e2e_helpers;
mod link_tests;

pub use e2e_helpers::*;
