//! Application state and composition.

use std::sync::Arc;

use gamelink_domain::MessageRegistry;
use gamelink_shared::{builtin_registry, ClockPort, MessageBus, ServiceHost, Subscription};

use crate::api::{connections::ConnectionRegistry, hub};
use crate::infrastructure::{
    auth::StaticKeyTokenIssuer,
    command_store::SqliteCommandStore,
    config::{AppConfig, CommandQueueConfig},
    ports::{CommandStore, TokenIssuer},
};
use crate::use_cases::{
    command_queue::CommandQueue,
    workers::{CleanupWorker, CommandResultRecorder, StaleCommandMonitor},
};

/// Main application state.
///
/// Passed to HTTP/WebSocket handlers via Axum state.
pub struct App {
    pub bus: MessageBus,
    pub registry: MessageRegistry,
    pub queue: Arc<CommandQueue>,
    pub connections: Arc<ConnectionRegistry>,
    pub tokens: Arc<dyn TokenIssuer>,
    // Routes bus commands to connected agents for as long as the app lives
    _command_router: Subscription,
}

impl App {
    pub fn new(
        bus: MessageBus,
        store: Arc<dyn CommandStore>,
        tokens: Arc<dyn TokenIssuer>,
        stale_after: chrono::Duration,
    ) -> Self {
        let registry = builtin_registry();
        let connections = Arc::new(ConnectionRegistry::new());
        let command_router = hub::install_command_router(&bus, connections.clone());
        let queue = Arc::new(CommandQueue::new(
            store,
            bus.clone(),
            registry.clone(),
            stale_after,
        ));

        Self {
            bus,
            registry,
            queue,
            connections,
            tokens,
            _command_router: command_router,
        }
    }

    /// Build the production app: SQLite store and static access keys.
    pub async fn from_config(config: &AppConfig, clock: Arc<dyn ClockPort>) -> anyhow::Result<Self> {
        if let Some(parent) = std::path::Path::new(&config.commands.sqlite_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %config.commands.sqlite_path, "Opening command store");
        let store = Arc::new(SqliteCommandStore::new(&config.commands.sqlite_path, clock.clone()).await?);
        let tokens = Arc::new(StaticKeyTokenIssuer::new(
            config.hub.access_keys.iter().cloned(),
            config.hub.token_ttl(),
            clock.clone(),
        ));

        Ok(Self::new(
            MessageBus::new(clock),
            store,
            tokens,
            config.commands.stale_after(),
        ))
    }

    /// Spawn the background services that keep the command table healthy.
    pub fn spawn_workers(&self, host: &mut ServiceHost, config: &CommandQueueConfig) {
        host.spawn(Arc::new(CommandResultRecorder::new(self.queue.clone(), &self.bus)));
        host.spawn(Arc::new(CleanupWorker::new(
            self.queue.clone(),
            config.retention(),
            config.cleanup_interval(),
        )));
        host.spawn(Arc::new(StaleCommandMonitor::new(
            self.queue.clone(),
            config.cleanup_interval(),
        )));
    }
}
