//! The runner owns the engine on its own task; commands are serialized
//! with ticks and shutdown hands the engine back.

use hydrograph_core::{
    broadcast::EventBroadcaster,
    clock::ManualClock,
    config::GridConfig,
    engine::GridEngine,
    error::{DeliveryError, GridError},
    event::{EventKind, GridEvent},
    phase::SystemState,
    runner::TickRunner,
    snapshot::Snapshot,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn build() -> (GridEngine, ManualClock, Arc<EventBroadcaster>) {
    let clock = ManualClock::new();
    let broadcaster = EventBroadcaster::shared();
    let config = GridConfig { seed: Some(5), ..GridConfig::default() };
    let engine = GridEngine::new(&config, Arc::new(clock.clone()), Arc::clone(&broadcaster))
        .expect("engine");
    (engine, clock, broadcaster)
}

fn queue(broadcaster: &EventBroadcaster, depth: usize) -> mpsc::Receiver<Arc<Snapshot>> {
    let (tx, rx) = mpsc::channel(depth);
    broadcaster.subscribe(EventKind::SnapshotUpdated, move |event| {
        if let GridEvent::SnapshotUpdated(s) = event {
            tx.try_send(Arc::clone(s))
                .map_err(|_| DeliveryError::QueueFull)?;
        }
        Ok(())
    });
    rx
}

#[tokio::test]
async fn runner_ticks_and_stops() {
    let (engine, _clock, broadcaster) = build();
    let mut rx = queue(&broadcaster, 64);
    let handle = TickRunner::spawn(engine, Duration::from_millis(5));

    for _ in 0..3 {
        let snap = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("tick within timeout")
            .expect("channel open");
        assert_eq!(snap.system_state, SystemState::Normal);
    }

    let engine = handle.shutdown().await.expect("clean shutdown");
    assert!(engine.tick_count() >= 3);
}

#[tokio::test]
async fn commands_go_through_the_runner() {
    let (engine, _clock, _broadcaster) = build();
    let handle = TickRunner::spawn(engine, Duration::from_millis(5));
    let client = handle.client();

    let snap = client.trigger_anomaly(None).await.expect("trigger");
    assert_eq!(snap.system_state, SystemState::Anomalous);
    assert!(client.latest().sequence >= snap.sequence);

    let err = client.trigger_anomaly(Some("nope".into())).await.unwrap_err();
    assert!(matches!(err, GridError::UnknownNode { .. }));

    handle.shutdown().await.unwrap();
    assert!(matches!(client.trigger_anomaly(None).await, Err(GridError::RunnerStopped)));
}

#[tokio::test]
async fn slow_consumer_never_stalls_the_clock() {
    let (engine, _clock, broadcaster) = build();
    // Depth 1 and never read: dropped on the second tick.
    let _stuck = queue(&broadcaster, 1);
    let mut live = queue(&broadcaster, 256);
    let handle = TickRunner::spawn(engine, Duration::from_millis(2));

    for _ in 0..10 {
        tokio::time::timeout(Duration::from_secs(2), live.recv())
            .await
            .expect("live subscriber keeps receiving")
            .expect("open");
    }
    assert_eq!(broadcaster.subscriber_count(EventKind::SnapshotUpdated), 1);
    handle.shutdown().await.unwrap();
}
