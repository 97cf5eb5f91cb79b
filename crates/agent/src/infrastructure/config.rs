//! Agent configuration

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use gamelink_domain::ServerId;
use url::Url;

use super::transport::{BackoffSchedule, OverflowPolicy, DEFAULT_OUTBOUND_CAPACITY};

/// Agent configuration loaded from environment
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Engine base URL (HTTP); the hub URL is derived from it
    pub engine_url: Url,
    /// Identity of the game server this agent runs beside
    pub server_id: ServerId,
    /// Long-lived access key exchanged for bearer tokens
    pub access_token: String,
    pub reconnect_delays: BackoffSchedule,
    /// Uptime after which a session counts as healthy and the delays restart
    pub stable_connection_seconds: u64,
    /// Timeout for one token exchange request
    pub token_timeout_seconds: u64,
    pub outbound_capacity: usize,
    pub outbound_overflow: OverflowPolicy,
    pub shutdown_grace_seconds: u64,
    pub metrics_interval_seconds: u64,
}

impl AgentConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn stable_connection(&self) -> Duration {
        Duration::from_secs(self.stable_connection_seconds)
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_seconds.max(1))
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_seconds.max(1))
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

impl AgentConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let engine_url = var_or("AGENT_ENGINE_URL", "http://localhost:3000");
        let engine_url =
            Url::parse(&engine_url).with_context(|| format!("AGENT_ENGINE_URL is not a URL: {engine_url}"))?;

        let server_id: ServerId = env::var("AGENT_SERVER_ID")
            .context("AGENT_SERVER_ID must be set")?
            .parse()
            .context("AGENT_SERVER_ID must be a UUID")?;

        let access_token = env::var("AGENT_ACCESS_TOKEN").context("AGENT_ACCESS_TOKEN must be set")?;

        let reconnect_delays = BackoffSchedule::parse(&var_or("AGENT_RECONNECT_DELAYS", "0,2,10,30,60"))
            .context("AGENT_RECONNECT_DELAYS must be comma-separated seconds")?;

        let outbound_overflow = var_or("AGENT_OUTBOUND_OVERFLOW", "drop-oldest")
            .parse::<OverflowPolicy>()
            .map_err(anyhow::Error::msg)
            .context("AGENT_OUTBOUND_OVERFLOW must be drop-oldest or reject-new")?;

        Ok(Self {
            engine_url,
            server_id,
            access_token,
            reconnect_delays,
            stable_connection_seconds: parse_var("AGENT_STABLE_CONNECTION_SECONDS", "30")?,
            token_timeout_seconds: parse_var("AGENT_TOKEN_TIMEOUT_SECONDS", "10")?,
            outbound_capacity: parse_var(
                "AGENT_OUTBOUND_CAPACITY",
                &DEFAULT_OUTBOUND_CAPACITY.to_string(),
            )?,
            outbound_overflow,
            shutdown_grace_seconds: parse_var("AGENT_SHUTDOWN_GRACE_SECONDS", "10")?,
            metrics_interval_seconds: parse_var("AGENT_METRICS_INTERVAL_SECONDS", "30")?,
        })
    }
}
