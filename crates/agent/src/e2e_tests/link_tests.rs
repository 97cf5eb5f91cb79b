use std::time::Duration;

use gamelink_domain::{CommandStatus, ServerId};
use gamelink_shared::{AnnounceMessage, KickPlayer, MessageFilter, PlayerJoined, UpdateConfig};

use super::*;
use crate::infrastructure::transport::ConnectionState;

#[tokio::test]
async fn commands_issued_while_offline_run_once_the_agent_connects() {
    let engine = EngineHarness::start().await;
    let server = ServerId::new();

    let kick = engine
        .app
        .queue
        .issue::<KickPlayer>(server, |k| {
            k.player_id = "p1".into();
            k.reason = Some("afk".into());
        })
        .await
        .expect("issue kick");
    let update = engine
        .app
        .queue
        .issue::<UpdateConfig>(server, |u| {
            u.key = "motd".into();
            u.value = serde_json::json!("welcome");
        })
        .await
        .expect("issue update");
    assert_eq!(engine.status(kick).await, Some(CommandStatus::Pending));
    assert_eq!(engine.status(update).await, Some(CommandStatus::Pending));

    let agent = AgentHarness::new(agent_config(&engine.url, server, ACCESS_KEY));
    agent.game.join("p1");
    agent.agent.transport.start().await;

    let engine_ref = &engine;
    assert!(
        eventually(|| async move {
            engine_ref.status(kick).await == Some(CommandStatus::Completed)
                && engine_ref.status(update).await == Some(CommandStatus::Completed)
        })
        .await,
        "replayed commands were not completed"
    );

    let report = engine
        .app
        .queue
        .command_status(kick)
        .await
        .expect("status")
        .expect("row");
    assert_eq!(report.command.response_payload.as_deref(), Some("kicked p1"));
    assert!(!agent.game.is_online("p1"));
    assert_eq!(agent.game.config_value("motd"), Some(serde_json::json!("welcome")));

    agent.stop().await;
    engine.stop().await;
}

#[tokio::test]
async fn failed_commands_are_recorded_as_failed() {
    let engine = EngineHarness::start().await;
    let server = ServerId::new();
    let agent = AgentHarness::new(agent_config(&engine.url, server, ACCESS_KEY));
    agent.agent.transport.start().await;
    assert!(agent.agent.transport.observer().wait_for(ConnectionState::Connected).await);

    // Nobody named "ghost" is online.
    let kick = engine
        .app
        .queue
        .issue::<KickPlayer>(server, |k| k.player_id = "ghost".into())
        .await
        .expect("issue");

    let engine_ref = &engine;
    assert!(
        eventually(|| async move { engine_ref.status(kick).await == Some(CommandStatus::Failed) })
            .await,
        "kick was not recorded as failed"
    );
    let row = engine
        .app
        .queue
        .command_status(kick)
        .await
        .expect("status")
        .expect("row")
        .command;
    assert!(row.error_message.expect("error").contains("ghost"));

    agent.stop().await;
    engine.stop().await;
}

#[tokio::test]
async fn agent_events_reach_the_engine_bus() {
    let engine = EngineHarness::start().await;
    let server = ServerId::new();
    let (_sub, mut joined) = engine
        .app
        .bus
        .subscribe_queued(MessageFilter::of::<PlayerJoined>(), 8);

    let agent = AgentHarness::new(agent_config(&engine.url, server, ACCESS_KEY));
    // Published before the link exists; it waits in the outbound queue.
    let event = agent
        .agent
        .bus
        .create_event::<PlayerJoined>(Some(server), |p| {
            p.player_id = "p7".into();
            p.player_name = "Seven".into();
        })
        .expect("event");
    agent.agent.bus.publish(&event);
    assert_eq!(agent.agent.transport.queued(), 1);

    agent.agent.transport.start().await;

    let received = tokio::time::timeout(Duration::from_secs(5), joined.recv())
        .await
        .expect("timely")
        .expect("event");
    assert_eq!(received.id(), event.id());
    assert_eq!(
        received.payload::<PlayerJoined>().expect("payload").player_name,
        "Seven"
    );
    let transport = agent.agent.transport.clone();
    assert!(
        eventually(|| {
            let transport = transport.clone();
            async move { transport.queued() == 0 }
        })
        .await
    );

    agent.stop().await;
    engine.stop().await;
}

#[tokio::test]
async fn live_commands_are_delivered_to_a_connected_agent() {
    let engine = EngineHarness::start().await;
    let server = ServerId::new();
    let agent = AgentHarness::new(agent_config(&engine.url, server, ACCESS_KEY));
    agent.game.join("p1");
    agent.game.join("p2");
    agent.agent.transport.start().await;

    let engine_app = engine.app.clone();
    assert!(
        eventually(|| {
            let app = engine_app.clone();
            async move { app.connections.is_connected(server) }
        })
        .await
    );

    let announce = engine
        .app
        .queue
        .issue::<AnnounceMessage>(server, |a| a.text = "restart soon".into())
        .await
        .expect("issue");

    let engine_ref = &engine;
    assert!(
        eventually(
            || async move { engine_ref.status(announce).await == Some(CommandStatus::Completed) }
        )
        .await
    );
    let row = engine
        .app
        .queue
        .command_status(announce)
        .await
        .expect("status")
        .expect("row")
        .command;
    assert_eq!(row.response_payload.as_deref(), Some("delivered to 2 players"));

    agent.stop().await;
    engine.stop().await;
}

#[tokio::test]
async fn rejected_access_key_keeps_the_agent_reconnecting() {
    let engine = EngineHarness::start().await;
    let server = ServerId::new();
    let agent = AgentHarness::new(agent_config(&engine.url, server, "wrong-key"));
    let observer = agent.agent.transport.observer();

    agent.agent.transport.start().await;
    assert!(observer.wait_for(ConnectionState::Reconnecting).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_ne!(observer.state(), ConnectionState::Connected);
    assert!(!engine.app.connections.is_connected(server));

    agent.stop().await;
    assert_eq!(observer.state(), ConnectionState::Disconnected);
    engine.stop().await;
}

#[tokio::test]
async fn metrics_reporter_only_samples_while_connected() {
    let engine = EngineHarness::start().await;
    let server = ServerId::new();
    let (_sub, mut samples) = engine
        .app
        .bus
        .subscribe_queued(MessageFilter::of::<gamelink_shared::MetricsSample>(), 8);

    let agent = AgentHarness::new(agent_config(&engine.url, server, ACCESS_KEY));
    agent.game.join("p1");
    let reporter = crate::application::MetricsReporter::new(
        agent.game.clone(),
        agent.agent.bus.clone(),
        server,
        agent.agent.transport.observer(),
        Duration::from_secs(3600),
    );

    assert!(!reporter.report_once().await);
    assert_eq!(agent.agent.transport.queued(), 0);

    agent.agent.transport.start().await;
    assert!(agent.agent.transport.observer().wait_for(ConnectionState::Connected).await);
    assert!(reporter.report_once().await);

    let sample = tokio::time::timeout(Duration::from_secs(5), samples.recv())
        .await
        .expect("timely")
        .expect("sample");
    assert_eq!(
        sample
            .payload::<gamelink_shared::MetricsSample>()
            .expect("payload")
            .players_online,
        1
    );

    agent.stop().await;
    engine.stop().await;
}
