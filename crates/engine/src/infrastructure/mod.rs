//! External dependency implementations (ports + adapters).

pub mod auth;
pub mod command_store;
pub mod config;
pub mod ports;

#[cfg(test)]
mod command_store_integration_tests;
