//! Harness for running an Engine and an Agent in one test process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use gamelink_domain::{CommandStatus, MessageId, ServerId};
use gamelink_engine::{
    api,
    infrastructure::{
        auth::StaticKeyTokenIssuer, command_store::SqliteCommandStore, config::CommandQueueConfig,
    },
    App,
};
use gamelink_shared::{ClockPort, MessageBus, ServiceHost, SystemClock};
use tokio::task::JoinHandle;
use url::Url;

use crate::infrastructure::{
    config::AgentConfig,
    game_server::LoggingGameServer,
    transport::{BackoffSchedule, OverflowPolicy},
};
use crate::Agent;

pub const ACCESS_KEY: &str = "e2e-access-key";

pub struct EngineHarness {
    pub app: Arc<App>,
    pub url: Url,
    workers: Option<ServiceHost>,
    server: JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl EngineHarness {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("commands.db").to_string_lossy().to_string();
        let clock: Arc<dyn ClockPort> = Arc::new(SystemClock::new());

        let store = Arc::new(
            SqliteCommandStore::new(&db_path, clock.clone())
                .await
                .expect("open store"),
        );
        let tokens = Arc::new(StaticKeyTokenIssuer::new(
            [ACCESS_KEY.to_string()],
            chrono::Duration::minutes(5),
            clock.clone(),
        ));
        let app = Arc::new(App::new(
            MessageBus::new(clock),
            store,
            tokens,
            chrono::Duration::minutes(5),
        ));

        let mut workers = ServiceHost::new();
        app.spawn_workers(
            &mut workers,
            &CommandQueueConfig {
                sqlite_path: db_path,
                ..CommandQueueConfig::default()
            },
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let router = api::router(app.clone());
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "Test engine stopped");
            }
        });

        Self {
            app,
            url: Url::parse(&format!("http://{addr}")).expect("url"),
            workers: Some(workers),
            server,
            _dir: dir,
        }
    }

    pub async fn status(&self, id: MessageId) -> Option<CommandStatus> {
        self.app
            .queue
            .command_status(id)
            .await
            .expect("status")
            .map(|report| report.command.status)
    }

    pub async fn stop(mut self) {
        if let Some(workers) = self.workers.take() {
            workers.shutdown(Duration::from_secs(2)).await;
        }
        self.server.abort();
    }
}

pub fn agent_config(engine_url: &Url, server_id: ServerId, access_token: &str) -> AgentConfig {
    AgentConfig {
        engine_url: engine_url.clone(),
        server_id,
        access_token: access_token.to_string(),
        reconnect_delays: BackoffSchedule::new(vec![
            Duration::ZERO,
            Duration::from_millis(50),
            Duration::from_millis(100),
        ]),
        stable_connection_seconds: 1,
        token_timeout_seconds: 5,
        outbound_capacity: 100,
        outbound_overflow: OverflowPolicy::DropOldest,
        shutdown_grace_seconds: 1,
        metrics_interval_seconds: 3600,
    }
}

pub struct AgentHarness {
    pub agent: Agent,
    pub game: Arc<LoggingGameServer>,
    pub config: AgentConfig,
    services: Option<ServiceHost>,
}

impl AgentHarness {
    pub fn new(config: AgentConfig) -> Self {
        let game = Arc::new(LoggingGameServer::new());
        let agent = Agent::new(&config, game.clone()).expect("agent");
        let mut services = ServiceHost::new();
        agent.spawn_services(&mut services, &config);
        Self {
            agent,
            game,
            config,
            services: Some(services),
        }
    }

    pub async fn stop(mut self) {
        if let Some(services) = self.services.take() {
            services.shutdown(self.config.shutdown_grace()).await;
        }
        self.agent
            .transport
            .shutdown(self.config.shutdown_grace())
            .await;
    }
}

/// Poll `check` until it returns true or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
