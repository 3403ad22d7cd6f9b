//! Property tests for ingestion accounting: whatever mix of valid and
//! invalid records a batch carries, accepted + rejected always equals the
//! batch length and every rejection names a real index.

use std::sync::Arc;

use proptest::prelude::*;
use uuid::Uuid;

use fleetsync::clock::FleetClock;
use fleetsync::config::FleetSyncConfig;
use fleetsync::coordinator::FleetEngine;
use fleetsync::fanout::FanoutGateway;
use fleetsync::graph::{GraphSyncEngine, MemoryGraphStore};
use fleetsync::ingest::{IngestBatch, IngestRecord};
use fleetsync::model::{TelemetryPoint, TelemetrySource, Vehicle, VehicleStatus, VehicleType};
use fleetsync::store::{MemoryStateStore, StateStore};

#[derive(Debug, Clone)]
struct RawRecord {
    known_vehicle: bool,
    ts: i64,
    speed_kph: f64,
    fuel_pct: f64,
    odometer_km: f64,
}

fn record_strategy() -> impl Strategy<Value = RawRecord> {
    (
        any::<bool>(),
        0_i64..10_000_000,
        -50.0_f64..400.0,
        -20.0_f64..140.0,
        -100.0_f64..100_000.0,
    )
        .prop_map(|(known_vehicle, ts, speed_kph, fuel_pct, odometer_km)| RawRecord {
            known_vehicle,
            ts,
            speed_kph,
            fuel_pct,
            odometer_km,
        })
}

fn to_point(raw: &RawRecord) -> TelemetryPoint {
    TelemetryPoint {
        id: Uuid::new_v4(),
        vehicle_id: if raw.known_vehicle {
            "veh-1".into()
        } else {
            "ghost".into()
        },
        ts: raw.ts,
        lat: 51.5,
        lon: -0.12,
        speed_kph: raw.speed_kph,
        fuel_pct: raw.fuel_pct,
        odometer_km: raw.odometer_km,
        ignition: true,
        idling: false,
        engine_temp_c: None,
        battery_v: None,
        rpm: None,
        source: TelemetrySource::Replay,
        provenance: "prop".into(),
    }
}

async fn run_batch(raws: Vec<RawRecord>) -> (usize, fleetsync::ingest::IngestReport) {
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

    store
        .upsert_vehicle(&Vehicle {
            id: "veh-1".into(),
            registration: "REG-1".into(),
            vehicle_type: VehicleType::Truck,
            depot: "north".into(),
            status: VehicleStatus::Parked,
            geofence: None,
            updated_ts: 0,
        })
        .await
        .unwrap();

    let len = raws.len();
    let records = raws.iter().map(|r| IngestRecord::Telemetry(to_point(r))).collect();
    let report = engine
        .ingest_batch(IngestBatch {
            emitter_id: "prop".into(),
            vehicle_type: None,
            source: TelemetrySource::Replay,
            records,
        })
        .await;
    (len, report)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn accounting_always_balances(raws in prop::collection::vec(record_strategy(), 0..32)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (len, report) = rt.block_on(run_batch(raws));

        prop_assert_eq!(report.accepted + report.rejected, len);
        prop_assert_eq!(report.rejections.len(), report.rejected);
        for rejection in &report.rejections {
            prop_assert!(rejection.index < len);
            prop_assert!(!rejection.reason.is_empty());
        }
    }

    #[test]
    fn unknown_vehicles_never_accepted(raws in prop::collection::vec(record_strategy(), 1..16)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let unknown = raws.iter().filter(|r| !r.known_vehicle).count();
        let (_, report) = rt.block_on(run_batch(raws));
        prop_assert!(report.rejected >= unknown);
    }
}
