//! The manual trigger is an escape hatch outside the schedule. These tests
//! keep it clearly separate from the scripted phases.

use hydrograph_core::{
    broadcast::EventBroadcaster,
    clock::ManualClock,
    command::GridCommand,
    config::{GridConfig, SiteConfig},
    engine::GridEngine,
    error::GridError,
    event::{EventKind, GridEvent},
    incident::IncidentCache,
    phase::{Phase, SystemState},
    topology::NodeStatus,
};
use std::sync::{Arc, Mutex};

fn build(config: GridConfig) -> (GridEngine, ManualClock, Arc<EventBroadcaster>) {
    let clock = ManualClock::new();
    let broadcaster = EventBroadcaster::shared();
    let engine = GridEngine::new(&config, Arc::new(clock.clone()), Arc::clone(&broadcaster))
        .expect("engine");
    (engine, clock, broadcaster)
}

fn seeded() -> GridConfig {
    GridConfig { seed: Some(77), jitter_amplitude: 0.0, ..GridConfig::default() }
}

#[test]
fn trigger_publishes_anomalous_snapshot_immediately() {
    let (mut engine, clock, broadcaster) = build(seeded());
    let published = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&published);
    broadcaster.subscribe(EventKind::SnapshotUpdated, move |event| {
        if let GridEvent::SnapshotUpdated(s) = event {
            sink.lock().unwrap().push(Arc::clone(s));
        }
        Ok(())
    });

    clock.set_secs(10.0);
    engine.tick();
    let snap = engine
        .apply(GridCommand::TriggerAnomaly { node_id: None })
        .expect("trigger");

    assert_eq!(snap.system_state, SystemState::Anomalous);
    let n1 = snap.node("N1").unwrap();
    assert_eq!(n1.status, NodeStatus::Critical);
    assert_eq!(n1.pressure, 82.0);
    assert_eq!(published.lock().unwrap().len(), 2);
    assert!(Arc::ptr_eq(&published.lock().unwrap()[1], &snap));
}

#[test]
fn schedule_resumes_on_next_tick() {
    let (mut engine, clock, _) = build(seeded());
    clock.set_secs(10.0);
    engine.tick();
    engine.apply(GridCommand::TriggerAnomaly { node_id: Some("N7".into()) }).unwrap();
    assert_eq!(engine.phase(), Phase::Normal, "trigger must not move the scheduler");

    clock.set_secs(11.0);
    let out = engine.tick();
    assert_eq!(out.snapshot.system_state, SystemState::Normal);
    assert_eq!(out.entered, None);
    // Jitter rewrites readings; the forced status stays until the next reset.
    assert_eq!(out.snapshot.node("N7").unwrap().pressure, 100.0);

    clock.set_secs(180.2);
    let out = engine.tick();
    assert_eq!(out.snapshot.node("N7").unwrap().status, NodeStatus::Normal);
}

#[test]
fn trigger_does_not_touch_the_incident_cache() {
    let (mut engine, clock, broadcaster) = build(seeded());
    let cache = Arc::new(IncidentCache::new());
    cache.attach(&broadcaster);
    clock.set_secs(5.0);
    engine.tick();
    engine.apply(GridCommand::TriggerAnomaly { node_id: None }).unwrap();
    assert!(cache.is_empty());
}

#[test]
fn unknown_trigger_node_is_rejected_without_publishing() {
    let (mut engine, _, broadcaster) = build(seeded());
    let count = Arc::new(Mutex::new(0));
    let c = Arc::clone(&count);
    broadcaster.subscribe(EventKind::SnapshotUpdated, move |_| {
        *c.lock().unwrap() += 1;
        Ok(())
    });
    let err = engine
        .apply(GridCommand::TriggerAnomaly { node_id: Some("N99".into()) })
        .unwrap_err();
    assert!(matches!(err, GridError::UnknownNode { ref id } if id == "N99"));
    assert_eq!(*count.lock().unwrap(), 0);
}

#[test]
fn construction_fails_fast_on_bad_site() {
    let broadcaster = EventBroadcaster::shared();
    let clock = Arc::new(ManualClock::new());

    let missing = GridConfig {
        site: SiteConfig { pressure_node: "N42".into(), ..SiteConfig::default() },
        ..seeded()
    };
    assert!(matches!(
        GridEngine::new(&missing, clock.clone(), Arc::clone(&broadcaster)),
        Err(GridError::UnknownNode { .. })
    ));

    let not_adjacent = GridConfig {
        site: SiteConfig { acoustic_node: "N7".into(), ..SiteConfig::default() },
        ..seeded()
    };
    assert!(matches!(
        GridEngine::new(&not_adjacent, clock.clone(), Arc::clone(&broadcaster)),
        Err(GridError::MissingEdge { .. })
    ));

    let bad_manual = GridConfig {
        site: SiteConfig { manual_trigger_node: "X".into(), ..SiteConfig::default() },
        ..seeded()
    };
    assert!(GridEngine::new(&bad_manual, clock, broadcaster).is_err());
}

#[test]
fn command_json_shape() {
    let cmd: GridCommand = serde_json::from_str(r#"{ "cmd": "trigger_anomaly" }"#).unwrap();
    assert_eq!(cmd, GridCommand::TriggerAnomaly { node_id: None });
    let cmd: GridCommand =
        serde_json::from_str(r#"{ "cmd": "trigger_anomaly", "node_id": "N3" }"#).unwrap();
    assert_eq!(cmd, GridCommand::TriggerAnomaly { node_id: Some("N3".into()) });
}
