//! Replay determinism and the scenario run state machine, driven through the
//! engine's command surface.

use std::sync::Arc;

use fleetsync::clock::FleetClock;
use fleetsync::config::FleetSyncConfig;
use fleetsync::coordinator::{EngineError, FleetEngine};
use fleetsync::fanout::FanoutGateway;
use fleetsync::graph::{GraphSyncEngine, MemoryGraphStore};
use fleetsync::model::{RunStatus, Vehicle, VehicleStatus, VehicleType};
use fleetsync::scenario::{ScenarioDefinition, ScenarioError, VehicleProfile};
use fleetsync::store::{MemoryStateStore, StateStore};

struct Harness {
    engine: FleetEngine,
    store: Arc<MemoryStateStore>,
}

async fn harness() -> Harness {
    let config = FleetSyncConfig::default();
    let store = Arc::new(MemoryStateStore::new());
    let graph = Arc::new(GraphSyncEngine::new(
        store.clone(),
        Arc::new(MemoryGraphStore::new()),
        config.graph_lookback_ms(),
    ));
    let gateway = Arc::new(FanoutGateway::new(config.fanout_queue_depth));
    let clock = Arc::new(FleetClock::sim(1_700_000_000_000, 1_000));
    let engine = FleetEngine::new(config, store.clone(), graph, gateway, clock);

    for id in ["veh-1", "veh-2"] {
        store
            .upsert_vehicle(&Vehicle {
                id: id.into(),
                registration: format!("REG-{id}"),
                vehicle_type: VehicleType::Truck,
                depot: "north".into(),
                status: VehicleStatus::Parked,
                geofence: None,
                updated_ts: 0,
            })
            .await
            .unwrap();
    }
    Harness { engine, store }
}

fn definition() -> ScenarioDefinition {
    ScenarioDefinition {
        name: "depot-morning".into(),
        tick_ms: 1_000,
        duration_sec: 600,
        vehicles: vec![
            VehicleProfile {
                vehicle_id: "veh-1".into(),
                start_lat: 51.5,
                start_lon: -0.12,
                heading_deg: 90.0,
                base_speed_kph: 60.0,
                start_fuel_pct: 90.0,
                start_odometer_km: 12_000.0,
            },
            VehicleProfile {
                vehicle_id: "veh-2".into(),
                start_lat: 51.6,
                start_lon: -0.2,
                heading_deg: 180.0,
                base_speed_kph: 45.0,
                start_fuel_pct: 70.0,
                start_odometer_km: 8_500.0,
            },
        ],
        actions: vec![],
    }
}

/// The persisted telemetry stream for one vehicle, oldest first, as JSON.
async fn telemetry_json(store: &MemoryStateStore, vehicle_id: &str) -> String {
    let mut points = store.telemetry_history(vehicle_id, 1_000).await.unwrap();
    points.reverse();
    serde_json::to_string(&points).unwrap()
}

#[tokio::test]
async fn seed_42_replayed_twice_is_byte_identical() {
    let mut streams = Vec::new();
    for _ in 0..2 {
        let h = harness().await;
        h.engine
            .start_scenario(definition(), 42, 1.0)
            .await
            .unwrap();
        for _ in 0..100 {
            h.engine.scenario_tick().await.unwrap();
        }
        streams.push((
            telemetry_json(&h.store, "veh-1").await,
            telemetry_json(&h.store, "veh-2").await,
        ));
    }
    assert_eq!(streams[0].0, streams[1].0);
    assert_eq!(streams[0].1, streams[1].1);
    assert!(!streams[0].0.is_empty());
}

#[tokio::test]
async fn starting_while_active_is_rejected() {
    let h = harness().await;
    h.engine
        .start_scenario(definition(), 42, 1.0)
        .await
        .unwrap();

    let err = h.engine.start_scenario(definition(), 43, 1.0).await;
    assert!(matches!(
        err,
        Err(EngineError::Scenario(ScenarioError::RunActive(_)))
    ));

    // Paused still counts as active.
    h.engine.pause_scenario().await.unwrap();
    assert!(h.engine.start_scenario(definition(), 44, 1.0).await.is_err());
}

#[tokio::test]
async fn pause_resume_preserves_cursor() {
    let h = harness().await;
    h.engine
        .start_scenario(definition(), 7, 1.0)
        .await
        .unwrap();
    h.engine.scenario_tick().await.unwrap();
    h.engine.scenario_tick().await.unwrap();

    let paused = h.engine.pause_scenario().await.unwrap();
    assert_eq!(paused.status, RunStatus::Paused);
    let cursor = paused.cursor_ts;

    // Ticks are no-ops while paused.
    h.engine.scenario_tick().await.unwrap();
    assert_eq!(h.engine.active_run().await.unwrap().cursor_ts, cursor);

    let resumed = h.engine.resume_scenario().await.unwrap();
    assert_eq!(resumed.status, RunStatus::Running);
    assert_eq!(resumed.cursor_ts, cursor);

    h.engine.scenario_tick().await.unwrap();
    assert!(h.engine.active_run().await.unwrap().cursor_ts > cursor);
}

#[tokio::test]
async fn reset_rewinds_cursor_and_frees_the_slot() {
    let h = harness().await;
    let started = h
        .engine
        .start_scenario(definition(), 7, 1.0)
        .await
        .unwrap();
    h.engine.scenario_tick().await.unwrap();
    h.engine.scenario_tick().await.unwrap();

    let reset = h.engine.reset_scenario().await.unwrap();
    assert_eq!(reset.status, RunStatus::Reset);
    assert_eq!(reset.cursor_ts, started.start_ts);

    // Terminal run no longer blocks a fresh start.
    let second = h.engine.start_scenario(definition(), 8, 1.0).await.unwrap();
    assert_ne!(second.id, started.id);

    // The first run's status is durable.
    let stored = h.engine.scenario_run(started.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Reset);
}

#[tokio::test]
async fn completed_run_clears_runtime_pointer() {
    let h = harness().await;
    let mut def = definition();
    def.duration_sec = 2;
    let started = h.engine.start_scenario(def, 7, 1.0).await.unwrap();

    let runtime = h.store.runtime_state().await.unwrap();
    assert_eq!(runtime.active_run_id, Some(started.id));

    let mut status = RunStatus::Running;
    for _ in 0..5 {
        if let Some(run) = h.engine.scenario_tick().await.unwrap() {
            status = run.status;
            if status != RunStatus::Running {
                break;
            }
        } else {
            break;
        }
    }
    assert_eq!(status, RunStatus::Completed);
    assert_eq!(h.store.runtime_state().await.unwrap().active_run_id, None);
}

#[tokio::test]
async fn pause_racing_a_tick_is_never_overwritten_in_the_store() {
    let h = harness().await;
    let started = h
        .engine
        .start_scenario(definition(), 42, 1.0)
        .await
        .unwrap();

    // A pause landing while a tick is mid-ingest must win: the persisted row
    // always reflects the run's actual state, never a pre-ingest snapshot.
    for _ in 0..5 {
        let (tick, pause) = tokio::join!(h.engine.scenario_tick(), h.engine.pause_scenario());
        tick.unwrap();
        pause.unwrap();

        assert_eq!(h.engine.active_run().await.unwrap().status, RunStatus::Paused);
        let stored = h.engine.scenario_run(started.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Paused);
        h.engine.resume_scenario().await.unwrap();
    }
}

#[tokio::test]
async fn persistence_failure_fails_the_run() {
    let h = harness().await;
    let started = h
        .engine
        .start_scenario(definition(), 7, 1.0)
        .await
        .unwrap();
    h.engine.scenario_tick().await.unwrap();

    h.store.fail_next_run_writes(1);
    let run = h.engine.scenario_tick().await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .contains("persistence"));

    // The terminal status is durable once the store recovers, the runtime
    // pointer is released, and a fresh run can start.
    let stored = h.engine.scenario_run(started.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert_eq!(h.store.runtime_state().await.unwrap().active_run_id, None);
    assert!(h.engine.start_scenario(definition(), 8, 1.0).await.is_ok());
}

#[tokio::test]
async fn replay_telemetry_flows_through_rule_engine() {
    let h = harness().await;
    let mut def = definition();
    // Push veh-1 straight into overspeed territory.
    def.vehicles[0].base_speed_kph = 140.0;
    h.engine.start_scenario(def, 42, 1.0).await.unwrap();
    for _ in 0..3 {
        h.engine.scenario_tick().await.unwrap();
    }

    let alerts = h.store.open_alerts("veh-1").await.unwrap();
    assert_eq!(alerts.len(), 1, "replay traffic correlates like live traffic");
    assert!(alerts[0].related_event_ids.len() >= 2);
}
