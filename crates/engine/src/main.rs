//! GameLink Engine - Main entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gamelink_engine::{api, infrastructure::config::AppConfig, App};
use gamelink_shared::{ClockPort, ServiceHost, SystemClock};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long background workers get to finish after the server stops.
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gamelink_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting GameLink Engine");

    let config = AppConfig::from_env()?;
    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock::new());
    let app = Arc::new(App::from_config(&config, clock).await?);

    let cancel_token = CancellationToken::new();
    let mut workers = ServiceHost::with_token(cancel_token.clone());
    app.spawn_workers(&mut workers, &config.commands);

    let router = api::router(app.clone());
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    tracing::info!("Listening on {}", addr);

    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        shutdown.cancel();
    });

    let server = axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            tracing::info!("HTTP server received shutdown signal");
        });

    if let Err(e) = server.await {
        tracing::error!("Server error: {}", e);
    }

    tracing::info!("Waiting for workers to complete...");
    let report = workers.shutdown(WORKER_SHUTDOWN_GRACE).await;
    if !report.timed_out.is_empty() {
        tracing::warn!(services = ?report.timed_out, "Some workers did not stop in time");
    }

    tracing::info!("GameLink Engine stopped");
    Ok(())
}
