use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    Alert, Driver, EmitterHeartbeat, FleetEvent, FleetRuntimeState, ScenarioRun, TelemetryPoint,
    Trip, Vehicle, VehicleLatestState, VehicleStatus, VehicleType, WorkOrder,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Vehicle not found: {0}")]
    VehicleNotFound(String),
    #[error("Invalid write unit: {0}")]
    InvalidUnit(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// One ingested record's writes, committed as a single atomic unit.
///
/// A rule-engine-triggered alert must never be durable without its triggering
/// event, and vice versa - the store either applies everything here or
/// nothing.
#[derive(Debug, Clone, Default)]
pub struct WriteUnit {
    pub telemetry: Option<TelemetryPoint>,
    pub events: Vec<FleetEvent>,
    pub alert_upserts: Vec<Alert>,
    pub projection: Option<VehicleLatestState>,
}

impl WriteUnit {
    /// Validate internal invariants before any write happens.
    pub fn validate(&self) -> Result<(), StoreError> {
        for alert in &self.alert_upserts {
            if alert.related_event_ids.is_empty() {
                return Err(StoreError::InvalidUnit(format!(
                    "alert {} has no related events",
                    alert.id
                )));
            }
        }
        Ok(())
    }
}

/// Filters for the vehicle list query.
#[derive(Debug, Clone, Default)]
pub struct VehicleFilter {
    pub status: Option<VehicleStatus>,
    pub depot: Option<String>,
    pub vehicle_type: Option<VehicleType>,
}

/// One page of vehicles, ordered by id. `next_cursor` is the last id of the
/// page when more rows remain.
#[derive(Debug, Clone)]
pub struct VehiclePage {
    pub vehicles: Vec<Vehicle>,
    pub next_cursor: Option<String>,
}

/// The primary store: single source of truth for every entity.
///
/// Backends must provide transactional multi-statement writes for
/// [`StateStore::apply_unit`]; everything else is plain reads and single-row
/// upserts.
#[async_trait]
pub trait StateStore: Send + Sync {
    // ── Provisioning (fleet setup; out-of-scope workflows write through these) ──
    async fn upsert_vehicle(&self, vehicle: &Vehicle) -> Result<(), StoreError>;
    async fn upsert_driver(&self, driver: &Driver) -> Result<(), StoreError>;
    async fn upsert_trip(&self, trip: &Trip) -> Result<(), StoreError>;
    async fn upsert_work_order(&self, order: &WorkOrder) -> Result<(), StoreError>;

    async fn vehicle(&self, id: &str) -> Result<Option<Vehicle>, StoreError>;
    async fn driver(&self, id: &str) -> Result<Option<Driver>, StoreError>;
    async fn vehicles(&self) -> Result<Vec<Vehicle>, StoreError>;
    async fn drivers(&self) -> Result<Vec<Driver>, StoreError>;
    async fn trips(&self) -> Result<Vec<Trip>, StoreError>;
    async fn work_orders(&self) -> Result<Vec<WorkOrder>, StoreError>;

    // ── Ingestion write path ──
    /// Apply one record's writes atomically: telemetry insert, event inserts,
    /// alert upserts, projection update. All or nothing.
    async fn apply_unit(&self, unit: WriteUnit) -> Result<(), StoreError>;

    // ── Reads ──
    async fn latest_state(&self, vehicle_id: &str)
        -> Result<Option<VehicleLatestState>, StoreError>;
    async fn open_alerts(&self, vehicle_id: &str) -> Result<Vec<Alert>, StoreError>;
    async fn alerts(&self) -> Result<Vec<Alert>, StoreError>;
    /// Most recent telemetry for a vehicle, newest first.
    async fn telemetry_history(
        &self,
        vehicle_id: &str,
        limit: usize,
    ) -> Result<Vec<TelemetryPoint>, StoreError>;
    /// Most recent events for a vehicle, newest first.
    async fn recent_events(
        &self,
        vehicle_id: &str,
        limit: usize,
    ) -> Result<Vec<FleetEvent>, StoreError>;
    async fn list_vehicles(
        &self,
        filter: &VehicleFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<VehiclePage, StoreError>;
    /// The vehicle's active trip, if one is underway.
    async fn current_trip(&self, vehicle_id: &str) -> Result<Option<Trip>, StoreError>;

    // ── Fleet runtime singleton ──
    async fn runtime_state(&self) -> Result<FleetRuntimeState, StoreError>;
    async fn set_runtime_state(&self, state: &FleetRuntimeState) -> Result<(), StoreError>;

    // ── Scenario runs ──
    async fn upsert_scenario_run(&self, run: &ScenarioRun) -> Result<(), StoreError>;
    async fn scenario_run(&self, id: Uuid) -> Result<Option<ScenarioRun>, StoreError>;

    // ── Emitter heartbeats ──
    async fn upsert_heartbeat(&self, heartbeat: &EmitterHeartbeat) -> Result<(), StoreError>;
    async fn heartbeats(&self) -> Result<Vec<EmitterHeartbeat>, StoreError>;

    // ── Delta sync scoping (trailing update-timestamp windows) ──
    async fn vehicles_updated_since(&self, ts_ms: i64) -> Result<Vec<Vehicle>, StoreError>;
    async fn drivers_updated_since(&self, ts_ms: i64) -> Result<Vec<Driver>, StoreError>;
    async fn trips_updated_since(&self, ts_ms: i64) -> Result<Vec<Trip>, StoreError>;
    async fn work_orders_updated_since(&self, ts_ms: i64) -> Result<Vec<WorkOrder>, StoreError>;
    async fn alerts_updated_since(&self, ts_ms: i64) -> Result<Vec<Alert>, StoreError>;
}
