//! Domain model for the fleet pipeline.
//!
//! The primary store owns the canonical value of every entity here. Telemetry
//! and events are immutable, append-only facts; alerts and the per-vehicle
//! projection are mutable aggregates derived from them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derived operational status of a vehicle. Never set directly by ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    OnTrip,
    Idle,
    Parked,
    OffRoute,
    Alerting,
    MaintenanceDue,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnTrip => "on_trip",
            Self::Idle => "idle",
            Self::Parked => "parked",
            Self::OffRoute => "off_route",
            Self::Alerting => "alerting",
            Self::MaintenanceDue => "maintenance_due",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Bus,
    Truck,
    Van,
    Car,
}

/// Circular geofence around a depot or route anchor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_m: f64,
}

impl Geofence {
    /// Whether a position falls inside the fence.
    ///
    /// Equirectangular approximation - fine at depot scale.
    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let mean_lat = ((lat + self.center_lat) / 2.0).to_radians();
        let dx = (lon - self.center_lon).to_radians() * mean_lat.cos();
        let dy = (lat - self.center_lat).to_radians();
        let dist_m = EARTH_RADIUS_M * (dx * dx + dy * dy).sqrt();
        dist_m <= self.radius_m
    }
}

/// A fleet vehicle. Created by provisioning; status is derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    pub registration: String,
    pub vehicle_type: VehicleType,
    pub depot: String,
    pub status: VehicleStatus,
    /// Assigned depot/route geofence, if any.
    pub geofence: Option<Geofence>,
    pub updated_ts: i64,
}

/// Where a telemetry record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySource {
    Live,
    Replay,
}

/// Immutable telemetry fact, keyed by `(vehicle_id, ts)`. Never mutated or
/// deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub id: Uuid,
    pub vehicle_id: String,
    /// Epoch millis.
    pub ts: i64,
    pub lat: f64,
    pub lon: f64,
    pub speed_kph: f64,
    pub fuel_pct: f64,
    pub odometer_km: f64,
    pub ignition: bool,
    pub idling: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_temp_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_v: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpm: Option<u32>,
    pub source: TelemetrySource,
    /// Emitter or scenario that produced the point.
    pub provenance: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Overspeed,
    HarshBrake,
    GeofenceBreach,
    FuelAnomaly,
    Fault,
    OffRoute,
    Fatigue,
    MaintenanceDue,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overspeed => "overspeed",
            Self::HarshBrake => "harsh_brake",
            Self::GeofenceBreach => "geofence_breach",
            Self::FuelAnomaly => "fuel_anomaly",
            Self::Fault => "fault",
            Self::OffRoute => "off_route",
            Self::Fatigue => "fatigue",
            Self::MaintenanceDue => "maintenance_due",
        }
    }

    /// Whether alerts of this kind auto-close after consecutive clear points.
    ///
    /// Maintenance and faults clear through the workshop, not by driving.
    #[must_use]
    pub fn auto_closes(&self) -> bool {
        !matches!(self, Self::MaintenanceDue | Self::Fault)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    RuleEngine,
    ScenarioScript,
    Emitter,
    Manual,
}

/// Immutable derived fact - one rule firing produces zero or one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetEvent {
    pub id: Uuid,
    pub vehicle_id: String,
    pub kind: EventKind,
    pub severity: Severity,
    pub ts: i64,
    pub message: String,
    pub source: EventSource,
    /// Telemetry point that triggered the rule, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_id: Option<Uuid>,
}

/// Alert lifecycle: OPEN → ACK → CLOSED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Open,
    Ack,
    Closed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Ack => "ACK",
            Self::Closed => "CLOSED",
        }
    }
}

/// Mutable aggregate over one or more related events.
///
/// Invariant: `related_event_ids` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub vehicle_id: String,
    pub kind: EventKind,
    pub severity: Severity,
    pub status: AlertStatus,
    pub related_event_ids: Vec<Uuid>,
    pub opened_ts: i64,
    pub updated_ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_ts: Option<i64>,
}

impl Alert {
    /// Open a new alert around its first event.
    #[must_use]
    pub fn open(event: &FleetEvent, now_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            vehicle_id: event.vehicle_id.clone(),
            kind: event.kind,
            severity: event.severity,
            status: AlertStatus::Open,
            related_event_ids: vec![event.id],
            opened_ts: now_ms,
            updated_ts: now_ms,
            closed_ts: None,
        }
    }

    /// Attach a further event of the same kind, bumping `updated_ts` and
    /// keeping the highest severity seen.
    pub fn attach(&mut self, event: &FleetEvent, now_ms: i64) {
        self.related_event_ids.push(event.id);
        self.severity = self.severity.max(event.severity);
        self.updated_ts = now_ms;
    }

    /// Close the alert (automatic clear or external acknowledgement flow).
    pub fn close(&mut self, now_ms: i64) {
        self.status = AlertStatus::Closed;
        self.closed_ts = Some(now_ms);
        self.updated_ts = now_ms;
    }
}

/// Current-state projection: one mutable row per vehicle.
///
/// `last_ts`/`last_telemetry_id` are monotone - an out-of-order point updates
/// history but never regresses this row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleLatestState {
    pub vehicle_id: String,
    pub last_telemetry_id: Option<Uuid>,
    pub last_ts: i64,
    pub lat: f64,
    pub lon: f64,
    pub speed_kph: f64,
    pub fuel_pct: f64,
    pub odometer_km: f64,
    pub ignition: bool,
    pub idling: bool,
    /// Always recomputed from the OPEN-alert count, never incremented.
    pub active_alert_count: u32,
    pub maintenance_due: bool,
    pub status: VehicleStatus,
    /// Consecutive clear-point streak per event kind, for alert auto-close.
    #[serde(default)]
    pub clear_streaks: HashMap<EventKind, u32>,
    pub updated_ts: i64,
}

impl VehicleLatestState {
    /// Empty projection for a vehicle that has not reported yet.
    #[must_use]
    pub fn empty(vehicle_id: &str) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            last_telemetry_id: None,
            last_ts: 0,
            lat: 0.0,
            lon: 0.0,
            speed_kph: 0.0,
            fuel_pct: 0.0,
            odometer_km: 0.0,
            ignition: false,
            idling: false,
            active_alert_count: 0,
            maintenance_due: false,
            status: VehicleStatus::Parked,
            clear_streaks: HashMap::new(),
            updated_ts: 0,
        }
    }
}

/// Fleet-wide operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetMode {
    Replay,
    Live,
}

/// Singleton row: fleet mode plus the active scenario run, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetRuntimeState {
    pub mode: FleetMode,
    pub active_run_id: Option<Uuid>,
    pub updated_ts: i64,
}

impl Default for FleetRuntimeState {
    fn default() -> Self {
        Self {
            mode: FleetMode::Replay,
            active_run_id: None,
            updated_ts: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
    Reset,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Reset => "RESET",
            Self::Failed => "FAILED",
        }
    }

    /// A run in this status still owns the "one active run" slot.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

/// One replay execution. `cursor_ts` advances monotonically while RUNNING.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRun {
    pub id: Uuid,
    pub scenario: String,
    pub seed: u32,
    pub status: RunStatus,
    pub speed_factor: f64,
    pub start_ts: i64,
    pub cursor_ts: i64,
    pub updated_ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitterStatus {
    Online,
    Offline,
    Degraded,
}

/// Liveness record for one live-emitter replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitterHeartbeat {
    pub emitter_id: String,
    pub vehicle_type: VehicleType,
    pub replica_index: u32,
    pub status: EmitterStatus,
    pub ts: i64,
}

impl EmitterHeartbeat {
    /// Staleness beyond the timeout implies offline. Derivation rule, not a
    /// stored transition.
    #[must_use]
    pub fn effective_status(&self, now_ms: i64, offline_after_ms: i64) -> EmitterStatus {
        if now_ms.saturating_sub(self.ts) > offline_after_ms {
            EmitterStatus::Offline
        } else {
            self.status
        }
    }
}

/// A provisioned driver, mirrored into the graph store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: String,
    pub name: String,
    pub updated_ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Planned,
    Active,
    Completed,
}

/// A trip assignment linking a vehicle and (optionally) a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub vehicle_id: String,
    pub driver_id: Option<String>,
    pub status: TripStatus,
    pub started_ts: i64,
    pub updated_ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Open,
    InProgress,
    Done,
}

/// A maintenance work order against a vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: Uuid,
    pub vehicle_id: String,
    pub description: String,
    pub status: WorkOrderStatus,
    pub updated_ts: i64,
}
