//! Agent composition.

use std::sync::Arc;

use gamelink_shared::{builtin_registry, MessageBus, ServerId, ServiceHost};

use crate::application::{
    AnnouncementConsumer, AnnouncementHandler, ConfigConsumer, ConfigHandler, MetricsReporter,
    ModerationConsumer, ModerationHandler,
};
use crate::infrastructure::config::AgentConfig;
use crate::infrastructure::transport::{
    HttpTokenExchange, OutboundQueue, TransportClient, TransportError, TransportSettings,
    WsHubConnector,
};
use crate::ports::GameServerPort;

pub struct Agent {
    pub bus: MessageBus,
    pub server_id: ServerId,
    pub transport: Arc<TransportClient>,
    pub game: Arc<dyn GameServerPort>,
}

impl Agent {
    /// Wire the transport for `config` against the given game server.
    pub fn new(config: &AgentConfig, game: Arc<dyn GameServerPort>) -> Result<Self, TransportError> {
        let bus = MessageBus::default();
        let tokens = Arc::new(HttpTokenExchange::new(&config.engine_url, config.token_timeout())?);
        let connector = Arc::new(WsHubConnector::new(&config.engine_url, config.server_id)?);
        let outbound = Arc::new(OutboundQueue::new(
            config.outbound_capacity,
            config.outbound_overflow,
        ));

        let transport = Arc::new(TransportClient::new(
            TransportSettings {
                server_id: config.server_id,
                access_token: config.access_token.clone(),
                backoff: config.reconnect_delays.clone(),
                stable_after: config.stable_connection(),
                shutdown_grace: config.shutdown_grace(),
            },
            bus.clone(),
            builtin_registry(),
            tokens,
            connector,
            outbound,
        ));

        Ok(Self {
            bus,
            server_id: config.server_id,
            transport,
            game,
        })
    }

    /// Spawn the command consumers and the metrics reporter.
    ///
    /// Consumers subscribe here, so commands that arrive before their tasks
    /// are scheduled wait in their inboxes.
    pub fn spawn_services(&self, host: &mut ServiceHost, config: &AgentConfig) {
        host.spawn(Arc::new(ModerationConsumer::new(
            ModerationHandler::new(self.game.clone()),
            &self.bus,
            self.server_id,
        )));
        host.spawn(Arc::new(ConfigConsumer::new(
            ConfigHandler::new(self.game.clone(), &self.bus, self.server_id),
            &self.bus,
            self.server_id,
        )));
        host.spawn(Arc::new(AnnouncementConsumer::new(
            AnnouncementHandler::new(self.game.clone()),
            &self.bus,
            self.server_id,
        )));
        host.spawn(Arc::new(MetricsReporter::new(
            self.game.clone(),
            self.bus.clone(),
            self.server_id,
            self.transport.observer(),
            config.metrics_interval(),
        )));
    }
}
