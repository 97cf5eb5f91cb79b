//! Periodic metrics samples.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gamelink_shared::{HostedService, MessageBus, MetricsSample, ServerId};
use tokio_util::sync::CancellationToken;

use crate::infrastructure::transport::ConnectionStateObserver;
use crate::ports::GameServerPort;

/// Publishes a [`MetricsSample`] every interval while the link is up.
///
/// Samples taken while disconnected would only fill the outbound queue with
/// stale numbers, so they are skipped.
pub struct MetricsReporter {
    game: Arc<dyn GameServerPort>,
    bus: MessageBus,
    server_id: ServerId,
    connection: ConnectionStateObserver,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(
        game: Arc<dyn GameServerPort>,
        bus: MessageBus,
        server_id: ServerId,
        connection: ConnectionStateObserver,
        interval: Duration,
    ) -> Self {
        Self {
            game,
            bus,
            server_id,
            connection,
            interval,
        }
    }

    /// Take and publish one sample. Returns whether a sample was published.
    pub async fn report_once(&self) -> bool {
        if !self.connection.is_connected() {
            tracing::debug!(state = %self.connection.state(), "Skipping metrics sample while disconnected");
            return false;
        }

        let sample = match self.game.sample_metrics().await {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to sample game server metrics");
                return false;
            }
        };

        match self
            .bus
            .create_event::<MetricsSample>(Some(self.server_id), |m| *m = sample)
        {
            Ok(event) => {
                self.bus.publish(&event);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to build metrics sample");
                false
            }
        }
    }
}

#[async_trait]
impl HostedService for MetricsReporter {
    fn name(&self) -> &'static str {
        "metrics-reporter"
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Metrics reporter shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.report_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::{ConnectionState, ConnectionStatus};
    use crate::ports::MockGameServerPort;
    use gamelink_shared::MessageFilter;

    fn game() -> Arc<MockGameServerPort> {
        let mut game = MockGameServerPort::new();
        game.expect_sample_metrics().returning(|| {
            Ok(MetricsSample {
                players_online: 12,
                tick_ms: 16.5,
                memory_bytes: 1 << 20,
            })
        });
        Arc::new(game)
    }

    #[tokio::test]
    async fn samples_are_skipped_while_disconnected() {
        let bus = MessageBus::default();
        let status = ConnectionStatus::new();
        let (_sub, mut samples) = bus.subscribe_queued(MessageFilter::of::<MetricsSample>(), 4);
        let server = ServerId::new();

        let reporter = MetricsReporter::new(
            game(),
            bus.clone(),
            server,
            status.observer(),
            Duration::from_secs(30),
        );

        status.set(ConnectionState::Reconnecting);
        assert!(!reporter.report_once().await);
        assert!(samples.try_recv().is_err());

        status.set(ConnectionState::Connected);
        assert!(reporter.report_once().await);
        let sample = samples.recv().await.expect("sample");
        assert_eq!(sample.target_server_id(), Some(server));
        assert_eq!(
            sample.payload::<MetricsSample>().expect("payload").players_online,
            12
        );
    }
}
