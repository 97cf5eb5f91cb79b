use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use gamelink_domain::{CommandStatus, Message, MessageId, ServerId};
use gamelink_shared::{builtin_registry, KickPlayer, ManualClock, MessageBus, MessageFilter};

use crate::infrastructure::{
    command_store::SqliteCommandStore,
    ports::{ClockPort, CommandOutcome, CommandStore},
};
use crate::use_cases::command_queue::CommandQueue;

fn start() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).single().expect("timestamp")
}

struct Fixture {
    _dir: tempfile::TempDir,
    db_path: String,
    clock: Arc<ManualClock>,
    store: Arc<SqliteCommandStore>,
    queue: CommandQueue,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("commands.db").to_string_lossy().to_string();
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(
        SqliteCommandStore::new(&db_path, clock.clone())
            .await
            .expect("open store"),
    );
    let bus = MessageBus::new(clock.clone());
    let queue = CommandQueue::new(
        store.clone(),
        bus,
        builtin_registry(),
        Duration::seconds(120),
    );

    Fixture {
        _dir: dir,
        db_path,
        clock,
        store,
        queue,
    }
}

fn kick(bus: &MessageBus, target: ServerId, player: &str) -> Message {
    bus.create_command::<KickPlayer>(target, |k| k.player_id = player.to_string())
        .expect("command")
}

async fn status(store: &SqliteCommandStore, id: MessageId) -> CommandStatus {
    store
        .get(id)
        .await
        .expect("get")
        .expect("row exists")
        .status
}

#[tokio::test]
async fn n_commands_to_an_unreachable_target_replay_in_creation_order() {
    let fx = fixture().await;
    let target = ServerId::new();
    let other = ServerId::new();

    // Nothing is subscribed: the target is unreachable.
    let mut issued = Vec::new();
    for i in 0..5 {
        let id = fx
            .queue
            .publish_command(kick(fx.queue.bus(), target, &format!("p{i}")))
            .await
            .expect("publish");
        issued.push(id);
        // Same-timestamp rows must still keep insertion order.
        if i % 2 == 0 {
            fx.clock.advance(Duration::milliseconds(1));
        }
    }
    fx.queue
        .publish_command(kick(fx.queue.bus(), other, "elsewhere"))
        .await
        .expect("publish other");

    let pending = fx.queue.get_pending_commands(target).await.expect("pending");
    assert_eq!(pending.iter().map(|c| c.id).collect::<Vec<_>>(), issued);

    // Reachability restored.
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    let _link = fx
        .queue
        .bus()
        .subscribe(MessageFilter::of::<KickPlayer>(), move |m| {
            if m.target_server_id() == Some(target) {
                sink.lock().expect("lock").push(m.id());
                Ok(())
            } else {
                anyhow::bail!("not connected")
            }
        });

    let replayed = fx.queue.replay_pending(target).await.expect("replay");
    assert_eq!(replayed, issued.len());
    assert_eq!(*delivered.lock().expect("lock"), issued);

    // The hub writes each frame, then marks it.
    let written = delivered.lock().expect("lock").clone();
    for id in &written {
        assert_eq!(status(&fx.store, *id).await, CommandStatus::Pending);
        assert!(fx.queue.mark_sent(*id).await.expect("sent"));
        assert_eq!(status(&fx.store, *id).await, CommandStatus::Sent);
    }
    assert!(fx.queue.get_pending_commands(target).await.expect("pending").is_empty());
    assert_eq!(fx.queue.get_pending_commands(other).await.expect("pending").len(), 1);
}

#[tokio::test]
async fn commands_lost_with_a_dead_connection_are_replayed_on_the_next_one() {
    let fx = fixture().await;
    let target = ServerId::new();
    let id = fx
        .queue
        .publish_command(kick(fx.queue.bus(), target, "dave"))
        .await
        .expect("publish");

    // First connection accepts the command into its channel, then dies
    // before the frame is written.
    let (tx, rx) = tokio::sync::mpsc::channel(4);
    let first = fx
        .queue
        .bus()
        .subscribe(MessageFilter::of::<KickPlayer>(), move |m| {
            tx.try_send(m.clone())?;
            Ok(())
        });
    assert_eq!(fx.queue.replay_pending(target).await.expect("replay"), 1);
    drop(rx);
    drop(first);
    assert_eq!(status(&fx.store, id).await, CommandStatus::Pending);

    // The next connection gets it again.
    let redelivered = Arc::new(Mutex::new(Vec::new()));
    let sink = redelivered.clone();
    let _second = fx
        .queue
        .bus()
        .subscribe(MessageFilter::of::<KickPlayer>(), move |m| {
            sink.lock().expect("lock").push(m.id());
            Ok(())
        });
    assert_eq!(fx.queue.replay_pending(target).await.expect("replay"), 1);
    assert_eq!(*redelivered.lock().expect("lock"), vec![id]);
}

#[tokio::test]
async fn a_result_that_arrives_before_the_sent_update_completes_the_row() {
    let fx = fixture().await;
    let id = fx
        .queue
        .publish_command(kick(fx.queue.bus(), ServerId::new(), "erin"))
        .await
        .expect("publish");

    let mut result = gamelink_shared::CommandResult::default();
    result.succeeded(id, "kicked erin");
    assert!(fx.queue.record_result(&result).await.expect("record"));

    let row = fx.store.get(id).await.expect("get").expect("row");
    assert_eq!(row.status, CommandStatus::Completed);
    assert!(row.sent_at.is_some());
    assert_eq!(row.response_payload.as_deref(), Some("kicked erin"));
}

#[tokio::test]
async fn terminal_rows_ignore_later_transitions() {
    let fx = fixture().await;
    let id = fx
        .queue
        .publish_command(kick(fx.queue.bus(), ServerId::new(), "eve"))
        .await
        .expect("publish");

    // Response before Sent is a no-op.
    assert!(!fx.queue.record_response(id, None, true).await.expect("record"));
    assert_eq!(status(&fx.store, id).await, CommandStatus::Pending);

    assert!(fx.queue.mark_sent(id).await.expect("sent"));
    assert!(!fx.queue.mark_sent(id).await.expect("sent again"));
    assert!(fx
        .queue
        .record_response(id, Some("kicked".into()), true)
        .await
        .expect("record"));

    for _ in 0..3 {
        assert!(!fx.queue.mark_sent(id).await.expect("mark_sent"));
        assert!(!fx
            .queue
            .record_response(id, Some("late failure".into()), false)
            .await
            .expect("record"));
    }

    let row = fx.store.get(id).await.expect("get").expect("row");
    assert_eq!(row.status, CommandStatus::Completed);
    assert_eq!(row.response_payload.as_deref(), Some("kicked"));
    assert!(row.error_message.is_none());
}

#[tokio::test]
async fn stale_sent_rows_are_flagged_but_not_mutated() {
    let fx = fixture().await;
    let id = fx
        .queue
        .publish_command(kick(fx.queue.bus(), ServerId::new(), "mallory"))
        .await
        .expect("publish");
    fx.queue.mark_sent(id).await.expect("sent");

    let fresh = fx.queue.command_status(id).await.expect("status").expect("row");
    assert!(!fresh.stale);

    fx.clock.advance(Duration::seconds(121));

    let report = fx.queue.command_status(id).await.expect("status").expect("row");
    assert!(report.stale);
    assert_eq!(report.command.status, CommandStatus::Sent);

    let stale = fx.queue.stale_commands().await.expect("stale");
    assert_eq!(stale.iter().map(|c| c.id).collect::<Vec<_>>(), vec![id]);

    // Replay only touches pending rows.
    assert_eq!(
        fx.queue
            .replay_pending(report.command.server_id)
            .await
            .expect("replay"),
        0
    );
    assert_eq!(status(&fx.store, id).await, CommandStatus::Sent);
}

#[tokio::test]
async fn cleanup_removes_only_old_terminal_rows() {
    let fx = fixture().await;
    let target = ServerId::new();
    let bus = fx.queue.bus().clone();
    let now = start() + Duration::days(30);

    let mut completed = Vec::new();
    for age_days in [10, 5, 1] {
        fx.clock.set(now - Duration::days(age_days));
        let id = fx
            .queue
            .publish_command(kick(&bus, target, "old"))
            .await
            .expect("publish");
        fx.store.mark_sent(id, fx.clock.now()).await.expect("sent");
        fx.store
            .record_response(
                id,
                CommandOutcome {
                    success: true,
                    response: Some("ok".into()),
                    error: None,
                },
            )
            .await
            .expect("complete");
        completed.push(id);
    }

    fx.clock.set(now - Duration::days(10));
    let pending = fx
        .queue
        .publish_command(kick(&bus, target, "still waiting"))
        .await
        .expect("publish pending");

    fx.clock.set(now);
    let removed = fx.queue.cleanup(Duration::days(7)).await.expect("cleanup");
    assert_eq!(removed, 1);

    assert!(fx.store.get(completed[0]).await.expect("get").is_none());
    assert!(fx.store.get(completed[1]).await.expect("get").is_some());
    assert!(fx.store.get(completed[2]).await.expect("get").is_some());
    assert_eq!(status(&fx.store, pending).await, CommandStatus::Pending);
}

#[tokio::test]
async fn acknowledge_deletes_and_reports_missing_rows() {
    let fx = fixture().await;
    let id = fx
        .queue
        .publish_command(kick(fx.queue.bus(), ServerId::new(), "bob"))
        .await
        .expect("publish");

    assert!(fx.queue.acknowledge(id).await.expect("ack"));
    assert!(!fx.queue.acknowledge(id).await.expect("ack again"));
    assert!(fx.queue.command_status(id).await.expect("status").is_none());
}

#[tokio::test]
async fn pending_commands_survive_an_engine_restart() {
    let fx = fixture().await;
    let target = ServerId::new();
    let id = fx
        .queue
        .publish_command(kick(fx.queue.bus(), target, "carol"))
        .await
        .expect("publish");
    let db_path = fx.db_path.clone();
    let clock: Arc<dyn ClockPort> = fx.clock.clone();

    let reopened = SqliteCommandStore::new(&db_path, clock)
        .await
        .expect("reopen");
    let pending = reopened.list_pending(target).await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);

    let restored = builtin_registry().decode(&pending[0].payload).expect("decode");
    let kick = restored.payload::<KickPlayer>().expect("payload");
    assert_eq!(kick.player_id, "carol");
}
