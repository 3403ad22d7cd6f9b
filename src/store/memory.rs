use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use super::traits::{StateStore, StoreError, VehicleFilter, VehiclePage, WriteUnit};
use crate::model::{
    Alert, AlertStatus, Driver, EmitterHeartbeat, FleetEvent, FleetRuntimeState, ScenarioRun,
    TelemetryPoint, Trip, TripStatus, Vehicle, VehicleLatestState, WorkOrder,
};

/// In-memory primary store.
///
/// Backs the test suite and embedded deployments. A write unit is applied
/// under a store-wide mutex after validation, so concurrent units never
/// interleave and validation failures leave nothing behind.
#[derive(Default)]
pub struct MemoryStateStore {
    vehicles: DashMap<String, Vehicle>,
    drivers: DashMap<String, Driver>,
    trips: DashMap<Uuid, Trip>,
    work_orders: DashMap<Uuid, WorkOrder>,
    telemetry: DashMap<String, Vec<TelemetryPoint>>,
    events: DashMap<String, Vec<FleetEvent>>,
    alerts: DashMap<Uuid, Alert>,
    latest: DashMap<String, VehicleLatestState>,
    runtime: Mutex<FleetRuntimeState>,
    runs: DashMap<Uuid, ScenarioRun>,
    heartbeats: DashMap<String, EmitterHeartbeat>,
    write_lock: Mutex<()>,
    /// Fail the next N scenario-run writes, then recover (test hook).
    fail_next_run_writes: AtomicU64,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total telemetry points across all vehicles (test helper).
    #[must_use]
    pub fn telemetry_count(&self) -> usize {
        self.telemetry.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn fail_next_run_writes(&self, n: u64) {
        self.fail_next_run_writes.store(n, Ordering::SeqCst);
    }

    fn check_run_write(&self) -> Result<(), StoreError> {
        let mut remaining = self.fail_next_run_writes.load(Ordering::SeqCst);
        while remaining > 0 {
            match self.fail_next_run_writes.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Err(StoreError::Backend("injected run write failure".into())),
                Err(actual) => remaining = actual,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn upsert_vehicle(&self, vehicle: &Vehicle) -> Result<(), StoreError> {
        self.vehicles.insert(vehicle.id.clone(), vehicle.clone());
        Ok(())
    }

    async fn upsert_driver(&self, driver: &Driver) -> Result<(), StoreError> {
        self.drivers.insert(driver.id.clone(), driver.clone());
        Ok(())
    }

    async fn upsert_trip(&self, trip: &Trip) -> Result<(), StoreError> {
        self.trips.insert(trip.id, trip.clone());
        Ok(())
    }

    async fn upsert_work_order(&self, order: &WorkOrder) -> Result<(), StoreError> {
        self.work_orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn vehicle(&self, id: &str) -> Result<Option<Vehicle>, StoreError> {
        Ok(self.vehicles.get(id).map(|v| v.value().clone()))
    }

    async fn driver(&self, id: &str) -> Result<Option<Driver>, StoreError> {
        Ok(self.drivers.get(id).map(|d| d.value().clone()))
    }

    async fn vehicles(&self) -> Result<Vec<Vehicle>, StoreError> {
        let mut out: Vec<Vehicle> = self.vehicles.iter().map(|v| v.value().clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn drivers(&self) -> Result<Vec<Driver>, StoreError> {
        Ok(self.drivers.iter().map(|d| d.value().clone()).collect())
    }

    async fn trips(&self) -> Result<Vec<Trip>, StoreError> {
        Ok(self.trips.iter().map(|t| t.value().clone()).collect())
    }

    async fn work_orders(&self) -> Result<Vec<WorkOrder>, StoreError> {
        Ok(self.work_orders.iter().map(|w| w.value().clone()).collect())
    }

    async fn apply_unit(&self, unit: WriteUnit) -> Result<(), StoreError> {
        unit.validate()?;
        let _guard = self.write_lock.lock();

        if let Some(point) = unit.telemetry {
            self.telemetry
                .entry(point.vehicle_id.clone())
                .or_default()
                .push(point);
        }
        for event in unit.events {
            self.events
                .entry(event.vehicle_id.clone())
                .or_default()
                .push(event);
        }
        for alert in unit.alert_upserts {
            self.alerts.insert(alert.id, alert);
        }
        if let Some(projection) = unit.projection {
            self.latest
                .insert(projection.vehicle_id.clone(), projection);
        }
        Ok(())
    }

    async fn latest_state(
        &self,
        vehicle_id: &str,
    ) -> Result<Option<VehicleLatestState>, StoreError> {
        Ok(self.latest.get(vehicle_id).map(|s| s.value().clone()))
    }

    async fn open_alerts(&self, vehicle_id: &str) -> Result<Vec<Alert>, StoreError> {
        let mut out: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|a| a.value().vehicle_id == vehicle_id && a.value().status == AlertStatus::Open)
            .map(|a| a.value().clone())
            .collect();
        out.sort_by_key(|a| a.opened_ts);
        Ok(out)
    }

    async fn alerts(&self) -> Result<Vec<Alert>, StoreError> {
        Ok(self.alerts.iter().map(|a| a.value().clone()).collect())
    }

    async fn telemetry_history(
        &self,
        vehicle_id: &str,
        limit: usize,
    ) -> Result<Vec<TelemetryPoint>, StoreError> {
        let mut out = self
            .telemetry
            .get(vehicle_id)
            .map(|v| v.value().clone())
            .unwrap_or_default();
        out.sort_by_key(|p| std::cmp::Reverse(p.ts));
        out.truncate(limit);
        Ok(out)
    }

    async fn recent_events(
        &self,
        vehicle_id: &str,
        limit: usize,
    ) -> Result<Vec<FleetEvent>, StoreError> {
        let mut out = self
            .events
            .get(vehicle_id)
            .map(|v| v.value().clone())
            .unwrap_or_default();
        out.sort_by_key(|e| std::cmp::Reverse(e.ts));
        out.truncate(limit);
        Ok(out)
    }

    async fn list_vehicles(
        &self,
        filter: &VehicleFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<VehiclePage, StoreError> {
        let mut all: Vec<Vehicle> = self
            .vehicles
            .iter()
            .map(|v| v.value().clone())
            .filter(|v| {
                filter.status.is_none_or(|s| v.status == s)
                    && filter.depot.as_deref().is_none_or(|d| v.depot == d)
                    && filter.vehicle_type.is_none_or(|t| v.vehicle_type == t)
            })
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(cursor) = cursor {
            all.retain(|v| v.id.as_str() > cursor);
        }
        let has_more = all.len() > limit;
        all.truncate(limit);
        let next_cursor = if has_more {
            all.last().map(|v| v.id.clone())
        } else {
            None
        };
        Ok(VehiclePage {
            vehicles: all,
            next_cursor,
        })
    }

    async fn current_trip(&self, vehicle_id: &str) -> Result<Option<Trip>, StoreError> {
        Ok(self
            .trips
            .iter()
            .find(|t| t.value().vehicle_id == vehicle_id && t.value().status == TripStatus::Active)
            .map(|t| t.value().clone()))
    }

    async fn runtime_state(&self) -> Result<FleetRuntimeState, StoreError> {
        Ok(self.runtime.lock().clone())
    }

    async fn set_runtime_state(&self, state: &FleetRuntimeState) -> Result<(), StoreError> {
        *self.runtime.lock() = state.clone();
        Ok(())
    }

    async fn upsert_scenario_run(&self, run: &ScenarioRun) -> Result<(), StoreError> {
        self.check_run_write()?;
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn scenario_run(&self, id: Uuid) -> Result<Option<ScenarioRun>, StoreError> {
        Ok(self.runs.get(&id).map(|r| r.value().clone()))
    }

    async fn upsert_heartbeat(&self, heartbeat: &EmitterHeartbeat) -> Result<(), StoreError> {
        self.heartbeats
            .insert(heartbeat.emitter_id.clone(), heartbeat.clone());
        Ok(())
    }

    async fn heartbeats(&self) -> Result<Vec<EmitterHeartbeat>, StoreError> {
        Ok(self.heartbeats.iter().map(|h| h.value().clone()).collect())
    }

    async fn vehicles_updated_since(&self, ts_ms: i64) -> Result<Vec<Vehicle>, StoreError> {
        Ok(self
            .vehicles
            .iter()
            .filter(|v| v.value().updated_ts >= ts_ms)
            .map(|v| v.value().clone())
            .collect())
    }

    async fn drivers_updated_since(&self, ts_ms: i64) -> Result<Vec<Driver>, StoreError> {
        Ok(self
            .drivers
            .iter()
            .filter(|d| d.value().updated_ts >= ts_ms)
            .map(|d| d.value().clone())
            .collect())
    }

    async fn trips_updated_since(&self, ts_ms: i64) -> Result<Vec<Trip>, StoreError> {
        Ok(self
            .trips
            .iter()
            .filter(|t| t.value().updated_ts >= ts_ms)
            .map(|t| t.value().clone())
            .collect())
    }

    async fn work_orders_updated_since(&self, ts_ms: i64) -> Result<Vec<WorkOrder>, StoreError> {
        Ok(self
            .work_orders
            .iter()
            .filter(|w| w.value().updated_ts >= ts_ms)
            .map(|w| w.value().clone())
            .collect())
    }

    async fn alerts_updated_since(&self, ts_ms: i64) -> Result<Vec<Alert>, StoreError> {
        Ok(self
            .alerts
            .iter()
            .filter(|a| a.value().updated_ts >= ts_ms)
            .map(|a| a.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventSource, Severity, TelemetrySource, VehicleStatus, VehicleType};

    fn vehicle(id: &str) -> Vehicle {
        Vehicle {
            id: id.to_string(),
            registration: format!("REG-{id}"),
            vehicle_type: VehicleType::Truck,
            depot: "north".into(),
            status: VehicleStatus::Parked,
            geofence: None,
            updated_ts: 1_000,
        }
    }

    fn point(vehicle_id: &str, ts: i64) -> TelemetryPoint {
        TelemetryPoint {
            id: Uuid::new_v4(),
            vehicle_id: vehicle_id.to_string(),
            ts,
            lat: 51.5,
            lon: -0.12,
            speed_kph: 60.0,
            fuel_pct: 80.0,
            odometer_km: 1_000.0,
            ignition: true,
            idling: false,
            engine_temp_c: None,
            battery_v: None,
            rpm: None,
            source: TelemetrySource::Replay,
            provenance: "test".into(),
        }
    }

    #[tokio::test]
    async fn apply_unit_persists_everything() {
        let store = MemoryStateStore::new();
        let p = point("veh-1", 1_000);
        let event = FleetEvent {
            id: Uuid::new_v4(),
            vehicle_id: "veh-1".into(),
            kind: crate::model::EventKind::Overspeed,
            severity: Severity::High,
            ts: 1_000,
            message: "fast".into(),
            source: EventSource::RuleEngine,
            telemetry_id: Some(p.id),
        };
        let alert = Alert::open(&event, 1_000);
        let mut projection = VehicleLatestState::empty("veh-1");
        projection.last_ts = 1_000;
        projection.active_alert_count = 1;

        store
            .apply_unit(WriteUnit {
                telemetry: Some(p),
                events: vec![event],
                alert_upserts: vec![alert],
                projection: Some(projection),
            })
            .await
            .unwrap();

        assert_eq!(store.telemetry_count(), 1);
        assert_eq!(store.open_alerts("veh-1").await.unwrap().len(), 1);
        assert_eq!(
            store.latest_state("veh-1").await.unwrap().unwrap().last_ts,
            1_000
        );
    }

    #[tokio::test]
    async fn apply_unit_rejects_alert_without_events() {
        let store = MemoryStateStore::new();
        let mut alert = Alert {
            id: Uuid::new_v4(),
            vehicle_id: "veh-1".into(),
            kind: crate::model::EventKind::Overspeed,
            severity: Severity::Low,
            status: AlertStatus::Open,
            related_event_ids: vec![Uuid::new_v4()],
            opened_ts: 0,
            updated_ts: 0,
            closed_ts: None,
        };
        alert.related_event_ids.clear();

        let result = store
            .apply_unit(WriteUnit {
                alert_upserts: vec![alert],
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(StoreError::InvalidUnit(_))));
        assert!(store.alerts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn driver_point_lookup() {
        let store = MemoryStateStore::new();
        store
            .upsert_driver(&Driver {
                id: "drv-1".into(),
                name: "Sam Field".into(),
                updated_ts: 0,
            })
            .await
            .unwrap();
        assert!(store.driver("drv-1").await.unwrap().is_some());
        assert!(store.driver("drv-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_vehicles_paginates_by_id() {
        let store = MemoryStateStore::new();
        for i in 0..5 {
            store.upsert_vehicle(&vehicle(&format!("veh-{i}"))).await.unwrap();
        }
        let filter = VehicleFilter::default();
        let page1 = store.list_vehicles(&filter, None, 2).await.unwrap();
        assert_eq!(page1.vehicles.len(), 2);
        let cursor = page1.next_cursor.expect("more pages");
        assert_eq!(cursor, "veh-1");

        let page2 = store.list_vehicles(&filter, Some(&cursor), 2).await.unwrap();
        assert_eq!(page2.vehicles[0].id, "veh-2");

        let page3 = store.list_vehicles(&filter, Some("veh-3"), 2).await.unwrap();
        assert_eq!(page3.vehicles.len(), 1);
        assert!(page3.next_cursor.is_none());
    }

    #[tokio::test]
    async fn history_is_newest_first_and_bounded() {
        let store = MemoryStateStore::new();
        for ts in [1_000, 3_000, 2_000] {
            store
                .apply_unit(WriteUnit {
                    telemetry: Some(point("veh-1", ts)),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let history = store.telemetry_history("veh-1", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].ts, 3_000);
        assert_eq!(history[1].ts, 2_000);
    }
}
