// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Scenario definitions and the deterministic replay driver.
//!
//! A scenario names a set of vehicle profiles and a timeline of actions.
//! [`ActiveRun::step`] is synchronous and a pure function of the run's seed
//! and step count: the same seed stepped the same number of times yields a
//! byte-identical telemetry sequence. Wall-time pacing and speed factor live
//! in the coordinator's driver task, never here.
//!
//! Synthesized records feed the ordinary ingestion path, so replay traffic is
//! indistinguishable from a live emitter downstream.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::clock::{SimClock, SimRng};
use crate::ingest::{IngestBatch, IngestRecord};
use crate::model::{
    EventKind, EventSource, FleetEvent, RunStatus, ScenarioRun, Severity, TelemetryPoint,
    TelemetrySource,
};

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("A run is already active: {0}")]
    RunActive(Uuid),
    #[error("No active run")]
    NoActiveRun,
    #[error("Invalid transition: cannot {action} a {status} run")]
    InvalidTransition {
        action: &'static str,
        status: &'static str,
    },
    #[error("Scenario definition invalid: {0}")]
    InvalidDefinition(String),
}

/// Starting conditions for one simulated vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleProfile {
    pub vehicle_id: String,
    pub start_lat: f64,
    pub start_lon: f64,
    /// Degrees clockwise from north.
    pub heading_deg: f64,
    pub base_speed_kph: f64,
    pub start_fuel_pct: f64,
    pub start_odometer_km: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineAction {
    pub at_sec: u32,
    #[serde(flatten)]
    pub action: ScenarioAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum ScenarioAction {
    SetSpeed { vehicle_id: String, speed_kph: f64 },
    SetFuel { vehicle_id: String, fuel_pct: f64 },
    Teleport { vehicle_id: String, lat: f64, lon: f64 },
    Ignition { vehicle_id: String, on: bool },
    InjectEvent {
        vehicle_id: String,
        kind: EventKind,
        severity: Severity,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub name: String,
    pub tick_ms: i64,
    pub duration_sec: u32,
    pub vehicles: Vec<VehicleProfile>,
    #[serde(default)]
    pub actions: Vec<TimelineAction>,
}

impl ScenarioDefinition {
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.vehicles.is_empty() {
            return Err(ScenarioError::InvalidDefinition(
                "scenario has no vehicle profiles".into(),
            ));
        }
        if self.tick_ms <= 0 {
            return Err(ScenarioError::InvalidDefinition(format!(
                "tick_ms must be positive, got {}",
                self.tick_ms
            )));
        }
        Ok(())
    }
}

/// Mutable per-vehicle simulation state inside a run.
#[derive(Debug, Clone)]
struct VehicleSim {
    lat: f64,
    lon: f64,
    heading_deg: f64,
    speed_kph: f64,
    fuel_pct: f64,
    odometer_km: f64,
    ignition: bool,
}

impl VehicleSim {
    fn from_profile(p: &VehicleProfile) -> Self {
        Self {
            lat: p.start_lat,
            lon: p.start_lon,
            heading_deg: p.heading_deg,
            speed_kph: p.base_speed_kph,
            fuel_pct: p.start_fuel_pct,
            odometer_km: p.start_odometer_km,
            ignition: true,
        }
    }
}

/// Output of one step: the synthesized batch plus the run status after it.
pub struct StepOutput {
    pub batch: IngestBatch,
    pub status: RunStatus,
    pub cursor_ts: i64,
}

/// One replay execution in progress.
pub struct ActiveRun {
    pub run: ScenarioRun,
    definition: ScenarioDefinition,
    clock: SimClock,
    rng: SimRng,
    vehicles: HashMap<String, VehicleSim>,
    step_index: u32,
    next_action: usize,
}

impl ActiveRun {
    pub fn start(
        definition: ScenarioDefinition,
        seed: u32,
        speed_factor: f64,
        start_ts: i64,
    ) -> Result<Self, ScenarioError> {
        definition.validate()?;
        let mut definition = definition;
        definition.actions.sort_by_key(|a| a.at_sec);

        let run = ScenarioRun {
            id: Uuid::new_v4(),
            scenario: definition.name.clone(),
            seed,
            status: RunStatus::Running,
            speed_factor: if speed_factor > 0.0 { speed_factor } else { 1.0 },
            start_ts,
            cursor_ts: start_ts,
            updated_ts: start_ts,
            failure_reason: None,
        };
        let vehicles = definition
            .vehicles
            .iter()
            .map(|p| (p.vehicle_id.clone(), VehicleSim::from_profile(p)))
            .collect();
        Ok(Self {
            clock: SimClock::new(start_ts, definition.tick_ms),
            rng: SimRng::new(seed),
            vehicles,
            step_index: 0,
            next_action: 0,
            definition,
            run,
        })
    }

    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    pub fn pause(&mut self, now_ms: i64) -> Result<(), ScenarioError> {
        if self.run.status != RunStatus::Running {
            return Err(self.bad_transition("pause"));
        }
        self.run.status = RunStatus::Paused;
        self.run.updated_ts = now_ms;
        Ok(())
    }

    /// Resume continues from the persisted cursor; no step is skipped or
    /// replayed.
    pub fn resume(&mut self, now_ms: i64) -> Result<(), ScenarioError> {
        if self.run.status != RunStatus::Paused {
            return Err(self.bad_transition("resume"));
        }
        self.run.status = RunStatus::Running;
        self.run.updated_ts = now_ms;
        Ok(())
    }

    /// Operator abort: cursor rewinds to the start and the run terminates.
    pub fn reset(&mut self, now_ms: i64) -> Result<(), ScenarioError> {
        if !self.run.status.is_active() {
            return Err(self.bad_transition("reset"));
        }
        self.run.status = RunStatus::Reset;
        self.run.cursor_ts = self.run.start_ts;
        self.run.updated_ts = now_ms;
        Ok(())
    }

    /// Unrecoverable failure mid-run. Already-emitted writes stay durable.
    pub fn fail(&mut self, reason: String, now_ms: i64) {
        self.run.status = RunStatus::Failed;
        self.run.failure_reason = Some(reason);
        self.run.updated_ts = now_ms;
    }

    /// Advance one tick: apply timeline actions due at this step, then
    /// synthesize one telemetry point per vehicle.
    pub fn step(&mut self) -> Result<Option<StepOutput>, ScenarioError> {
        if self.run.status != RunStatus::Running {
            return Err(self.bad_transition("step"));
        }

        let elapsed_sec = (self.step_index as i64 * self.definition.tick_ms) / 1_000;
        let mut records: Vec<IngestRecord> = Vec::new();

        while self.next_action < self.definition.actions.len()
            && i64::from(self.definition.actions[self.next_action].at_sec) <= elapsed_sec
        {
            let action = self.definition.actions[self.next_action].action.clone();
            self.next_action += 1;
            self.apply_action(action, &mut records);
        }

        let tick_ts = self.clock.now_ms();
        let vehicle_ids: Vec<String> = {
            let mut ids: Vec<String> = self.vehicles.keys().cloned().collect();
            ids.sort(); // fixed iteration order keeps the rng sequence stable
            ids
        };
        for id in vehicle_ids {
            if let Some(point) = self.synthesize(&id, tick_ts) {
                records.push(IngestRecord::Telemetry(point));
            }
        }

        self.step_index += 1;
        self.run.cursor_ts = tick_ts;
        if elapsed_sec >= i64::from(self.definition.duration_sec) {
            self.run.status = RunStatus::Completed;
        }
        self.run.updated_ts = tick_ts;

        Ok(Some(StepOutput {
            batch: IngestBatch {
                emitter_id: format!("scenario:{}", self.definition.name),
                vehicle_type: None,
                source: TelemetrySource::Replay,
                records,
            },
            status: self.run.status,
            cursor_ts: self.run.cursor_ts,
        }))
    }

    fn apply_action(&mut self, action: ScenarioAction, records: &mut Vec<IngestRecord>) {
        match action {
            ScenarioAction::SetSpeed {
                vehicle_id,
                speed_kph,
            } => {
                if let Some(sim) = self.vehicles.get_mut(&vehicle_id) {
                    sim.speed_kph = speed_kph;
                }
            }
            ScenarioAction::SetFuel {
                vehicle_id,
                fuel_pct,
            } => {
                if let Some(sim) = self.vehicles.get_mut(&vehicle_id) {
                    sim.fuel_pct = fuel_pct.clamp(0.0, 100.0);
                }
            }
            ScenarioAction::Teleport {
                vehicle_id,
                lat,
                lon,
            } => {
                if let Some(sim) = self.vehicles.get_mut(&vehicle_id) {
                    sim.lat = lat;
                    sim.lon = lon;
                }
            }
            ScenarioAction::Ignition { vehicle_id, on } => {
                if let Some(sim) = self.vehicles.get_mut(&vehicle_id) {
                    sim.ignition = on;
                    if !on {
                        sim.speed_kph = 0.0;
                    }
                }
            }
            ScenarioAction::InjectEvent {
                vehicle_id,
                kind,
                severity,
                message,
            } => {
                records.push(IngestRecord::Event(FleetEvent {
                    id: self.deterministic_id(),
                    vehicle_id,
                    kind,
                    severity,
                    ts: self.clock.peek_ms(),
                    message,
                    source: EventSource::ScenarioScript,
                    telemetry_id: None,
                }));
            }
        }
    }

    fn synthesize(&mut self, vehicle_id: &str, ts: i64) -> Option<TelemetryPoint> {
        // The id draws from the rng before the sim lookup so the sequence
        // stays stable regardless of map contents.
        let id = self.deterministic_id();
        let sim = self.vehicles.get_mut(vehicle_id)?;
        let tick_s = self.definition.tick_ms as f64 / 1_000.0;

        let speed = if sim.ignition {
            (sim.speed_kph + self.rng.next_f64_in(-3.0, 3.0)).max(0.0)
        } else {
            0.0
        };
        let dist_km = speed * tick_s / 3_600.0;
        let heading = sim.heading_deg.to_radians();
        // Small-displacement great-circle step.
        sim.lat += (dist_km * heading.cos()) / 111.32;
        sim.lon += (dist_km * heading.sin()) / (111.32 * sim.lat.to_radians().cos().max(1e-6));
        sim.odometer_km += dist_km;
        sim.fuel_pct = (sim.fuel_pct - dist_km * 0.3).max(0.0);
        sim.speed_kph = if sim.ignition { sim.speed_kph } else { 0.0 };

        Some(TelemetryPoint {
            id,
            vehicle_id: vehicle_id.to_string(),
            ts,
            lat: sim.lat,
            lon: sim.lon,
            speed_kph: speed,
            fuel_pct: sim.fuel_pct,
            odometer_km: sim.odometer_km,
            ignition: sim.ignition,
            idling: sim.ignition && speed < 1.0,
            engine_temp_c: None,
            battery_v: None,
            rpm: None,
            source: TelemetrySource::Replay,
            provenance: format!("scenario:{}", self.definition.name),
        })
    }

    /// Record ids derive from the run rng so replays reproduce them exactly.
    fn deterministic_id(&mut self) -> Uuid {
        let hi = (u64::from(self.rng.next_u32()) << 32) | u64::from(self.rng.next_u32());
        let lo = (u64::from(self.rng.next_u32()) << 32) | u64::from(self.rng.next_u32());
        Uuid::from_u64_pair(hi, lo)
    }

    fn bad_transition(&self, action: &'static str) -> ScenarioError {
        ScenarioError::InvalidTransition {
            action,
            status: self.run.status.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
            actions: vec![TimelineAction {
                at_sec: 5,
                action: ScenarioAction::SetSpeed {
                    vehicle_id: "veh-1".into(),
                    speed_kph: 140.0,
                },
            }],
        }
    }

    fn collect_points(run: &mut ActiveRun, steps: usize) -> Vec<TelemetryPoint> {
        let mut points = Vec::new();
        for _ in 0..steps {
            let out = run.step().unwrap().unwrap();
            for record in out.batch.records {
                if let IngestRecord::Telemetry(p) = record {
                    points.push(p);
                }
            }
        }
        points
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = ActiveRun::start(definition(), 42, 1.0, 1_700_000_000_000).unwrap();
        let mut b = ActiveRun::start(definition(), 42, 1.0, 1_700_000_000_000).unwrap();

        let pa = collect_points(&mut a, 100);
        let pb = collect_points(&mut b, 100);
        assert_eq!(
            serde_json::to_string(&pa).unwrap(),
            serde_json::to_string(&pb).unwrap()
        );
    }

    #[test]
    fn different_seed_diverges() {
        let mut a = ActiveRun::start(definition(), 42, 1.0, 0).unwrap();
        let mut b = ActiveRun::start(definition(), 43, 1.0, 0).unwrap();
        let pa = collect_points(&mut a, 10);
        let pb = collect_points(&mut b, 10);
        assert_ne!(
            serde_json::to_string(&pa).unwrap(),
            serde_json::to_string(&pb).unwrap()
        );
    }

    #[test]
    fn step_emits_one_point_per_profile() {
        let mut run = ActiveRun::start(definition(), 7, 1.0, 0).unwrap();
        let out = run.step().unwrap().unwrap();
        let points = out
            .batch
            .records
            .iter()
            .filter(|r| matches!(r, IngestRecord::Telemetry(_)))
            .count();
        assert_eq!(points, 2);
    }

    #[test]
    fn pause_resume_preserves_cursor() {
        let mut run = ActiveRun::start(definition(), 7, 1.0, 0).unwrap();
        run.step().unwrap();
        run.step().unwrap();
        let cursor = run.run.cursor_ts;

        run.pause(cursor).unwrap();
        assert!(matches!(run.step(), Err(ScenarioError::InvalidTransition { .. })));
        assert_eq!(run.run.cursor_ts, cursor);

        run.resume(cursor).unwrap();
        let out = run.step().unwrap().unwrap();
        assert!(out.cursor_ts > cursor);
    }

    #[test]
    fn reset_rewinds_cursor_to_start() {
        let mut run = ActiveRun::start(definition(), 7, 1.0, 5_000).unwrap();
        run.step().unwrap();
        run.step().unwrap();
        assert!(run.run.cursor_ts > 5_000);

        run.reset(run.run.cursor_ts).unwrap();
        assert_eq!(run.run.status, RunStatus::Reset);
        assert_eq!(run.run.cursor_ts, 5_000);
        assert!(run.step().is_err());
    }

    #[test]
    fn timeline_action_changes_speed_at_due_time() {
        let mut run = ActiveRun::start(definition(), 7, 1.0, 0).unwrap();
        // Steps 0..=4 at base speed, step 5 applies SetSpeed 140.
        let mut last_speed = 0.0;
        for _ in 0..7 {
            let out = run.step().unwrap().unwrap();
            for record in out.batch.records {
                if let IngestRecord::Telemetry(p) = record {
                    if p.vehicle_id == "veh-1" {
                        last_speed = p.speed_kph;
                    }
                }
            }
        }
        assert!(last_speed > 130.0, "expected overspeed, got {last_speed}");
    }

    #[test]
    fn run_completes_when_timeline_exhausted() {
        let mut def = definition();
        def.duration_sec = 2;
        let mut run = ActiveRun::start(def, 7, 1.0, 0).unwrap();
        let mut status = RunStatus::Running;
        for _ in 0..4 {
            match run.step() {
                Ok(Some(out)) => status = out.status,
                _ => break,
            }
        }
        assert_eq!(status, RunStatus::Completed);
    }

    #[test]
    fn failed_run_is_terminal() {
        let mut run = ActiveRun::start(definition(), 7, 1.0, 0).unwrap();
        run.fail("store write failed".into(), 1_000);
        assert_eq!(run.run.status, RunStatus::Failed);
        assert!(run.step().is_err());
        assert!(run.resume(2_000).is_err());
    }

    #[test]
    fn empty_definition_rejected() {
        let def = ScenarioDefinition {
            name: "empty".into(),
            tick_ms: 1_000,
            duration_sec: 10,
            vehicles: vec![],
            actions: vec![],
        };
        assert!(matches!(
            ActiveRun::start(def, 1, 1.0, 0),
            Err(ScenarioError::InvalidDefinition(_))
        ));
    }
}
