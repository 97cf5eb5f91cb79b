//! Application configuration

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP/WebSocket bind host
    pub server_host: String,
    /// HTTP/WebSocket bind port
    pub server_port: u16,

    /// Command queue configuration
    pub commands: CommandQueueConfig,

    /// Hub authorization
    pub hub: HubConfig,
}

/// Durable command queue configuration
#[derive(Debug, Clone)]
pub struct CommandQueueConfig {
    /// SQLite database path
    pub sqlite_path: String,
    /// How long to keep completed/failed rows before cleanup (hours)
    pub retention_hours: u64,
    /// How long a row may sit in `sent` before it is reported as stale (seconds)
    pub stale_after_seconds: u64,
    /// Cleanup and stale-scan interval (seconds)
    pub cleanup_interval_seconds: u64,
}

impl CommandQueueConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_seconds as i64)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds.max(1))
    }
}

impl Default for CommandQueueConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "./data/commands.db".to_string(),
            retention_hours: 24 * 7,
            stale_after_seconds: 300,
            cleanup_interval_seconds: 3600,
        }
    }
}

/// Hub authorization configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Long-lived access keys agents may exchange for bearer tokens
    pub access_keys: Vec<String>,
    /// Bearer token lifetime (seconds)
    pub token_ttl_seconds: u64,
}

impl HubConfig {
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_seconds as i64)
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var_or(name, default)
        .parse()
        .with_context(|| format!("{name} must be a valid {}", std::any::type_name::<T>()))
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = CommandQueueConfig::default();

        let access_keys: Vec<String> = var_or("HUB_ACCESS_KEYS", "")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if access_keys.is_empty() {
            tracing::warn!("HUB_ACCESS_KEYS is empty; no agent will be able to connect");
        }

        Ok(Self {
            server_host: var_or("ENGINE_HOST", "0.0.0.0"),
            server_port: parse_var("ENGINE_PORT", "3000")?,

            commands: CommandQueueConfig {
                sqlite_path: var_or("COMMAND_DB_PATH", &defaults.sqlite_path),
                retention_hours: parse_var(
                    "COMMAND_RETENTION_HOURS",
                    &defaults.retention_hours.to_string(),
                )?,
                stale_after_seconds: parse_var(
                    "COMMAND_STALE_SECONDS",
                    &defaults.stale_after_seconds.to_string(),
                )?,
                cleanup_interval_seconds: parse_var(
                    "COMMAND_CLEANUP_INTERVAL_SECONDS",
                    &defaults.cleanup_interval_seconds.to_string(),
                )?,
            },

            hub: HubConfig {
                access_keys,
                token_ttl_seconds: parse_var("HUB_TOKEN_TTL_SECONDS", "900")?,
            },
        })
    }
}
