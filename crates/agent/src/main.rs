//! GameLink Agent - Main entry point.

use std::sync::Arc;

use gamelink_agent::{
    infrastructure::{config::AgentConfig, game_server::LoggingGameServer},
    Agent,
};
use gamelink_shared::ServiceHost;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gamelink_agent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from_env()?;
    tracing::info!(
        server_id = %config.server_id,
        engine_url = %config.engine_url,
        "Starting GameLink Agent"
    );

    let agent = Agent::new(&config, Arc::new(LoggingGameServer::new()))?;

    let mut services = ServiceHost::new();
    agent.spawn_services(&mut services, &config);
    agent.transport.start().await;

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }

    // Stop producers first so their last results can still be flushed.
    let report = services.shutdown(config.shutdown_grace()).await;
    if !report.timed_out.is_empty() {
        tracing::warn!(services = ?report.timed_out, "Some services did not stop in time");
    }
    agent.transport.shutdown(config.shutdown_grace()).await;

    tracing::info!("GameLink Agent stopped");
    Ok(())
}
