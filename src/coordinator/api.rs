//! Query and command surface of the fleet engine.

use tracing::{info, warn};
use uuid::Uuid;

use crate::fanout::Broadcast;
use crate::model::{
    EmitterHeartbeat, EmitterStatus, FleetMode, FleetRuntimeState, ScenarioRun,
};
use crate::scenario::{ActiveRun, ScenarioDefinition, ScenarioError};
use crate::store::{StoreError, VehicleFilter, VehiclePage};

use super::{EngineError, FleetEngine, VehicleDetail};

impl FleetEngine {
    // ── Queries ──

    pub async fn list_vehicles(
        &self,
        filter: &VehicleFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<VehiclePage, StoreError> {
        self.store.list_vehicles(filter, cursor, limit).await
    }

    pub async fn vehicle_detail(&self, id: &str) -> Result<Option<VehicleDetail>, StoreError> {
        let Some(vehicle) = self.store.vehicle(id).await? else {
            return Ok(None);
        };
        Ok(Some(VehicleDetail {
            latest: self.store.latest_state(id).await?,
            telemetry: self
                .store
                .telemetry_history(id, self.config.telemetry_buffer_len)
                .await?,
            recent_events: self
                .store
                .recent_events(id, self.config.event_buffer_len)
                .await?,
            open_alerts: self.store.open_alerts(id).await?,
            current_trip: self.store.current_trip(id).await?,
            vehicle,
        }))
    }

    pub async fn fleet_mode(&self) -> Result<FleetRuntimeState, StoreError> {
        self.store.runtime_state().await
    }

    pub async fn set_fleet_mode(&self, mode: FleetMode) -> Result<FleetRuntimeState, StoreError> {
        let mut state = self.store.runtime_state().await?;
        state.mode = mode;
        state.updated_ts = self.clock.peek_ms();
        self.store.set_runtime_state(&state).await?;
        self.gateway.publish(Broadcast::FleetState(state.clone()));
        Ok(state)
    }

    /// Heartbeats with offline status derived from staleness at read time.
    pub async fn emitter_heartbeats(&self) -> Result<Vec<EmitterHeartbeat>, StoreError> {
        let now_ms = self.clock.peek_ms();
        let mut heartbeats = self.store.heartbeats().await?;
        for hb in &mut heartbeats {
            if hb.effective_status(now_ms, self.config.heartbeat_offline_ms)
                == EmitterStatus::Offline
            {
                hb.status = EmitterStatus::Offline;
            }
        }
        Ok(heartbeats)
    }

    // ── Scenario commands ──

    /// Start a replay run. Rejected while another run is RUNNING or PAUSED.
    pub async fn start_scenario(
        &self,
        definition: ScenarioDefinition,
        seed: u32,
        speed_factor: f64,
    ) -> Result<ScenarioRun, EngineError> {
        let mut slot = self.active_run.lock().await;
        if let Some(active) = slot.as_ref() {
            if active.status().is_active() {
                return Err(ScenarioError::RunActive(active.run.id).into());
            }
        }

        let start_ts = self.clock.peek_ms();
        let run = ActiveRun::start(definition, seed, speed_factor, start_ts)?;
        let snapshot = run.run.clone();
        self.store.upsert_scenario_run(&snapshot).await?;

        let mut runtime = self.store.runtime_state().await?;
        runtime.active_run_id = Some(snapshot.id);
        runtime.updated_ts = start_ts;
        self.store.set_runtime_state(&runtime).await?;

        *slot = Some(run);
        info!(run_id = %snapshot.id, scenario = %snapshot.scenario, seed, "scenario run started");
        self.gateway.publish(Broadcast::ReplayStatus(snapshot.clone()));
        Ok(snapshot)
    }

    pub async fn pause_scenario(&self) -> Result<ScenarioRun, EngineError> {
        self.transition(|run, now| run.pause(now)).await
    }

    pub async fn resume_scenario(&self) -> Result<ScenarioRun, EngineError> {
        self.transition(|run, now| run.resume(now)).await
    }

    /// Abort the active run; its cursor rewinds to the start.
    pub async fn reset_scenario(&self) -> Result<ScenarioRun, EngineError> {
        let snapshot = self.transition(|run, now| run.reset(now)).await?;
        let mut runtime = self.store.runtime_state().await?;
        runtime.active_run_id = None;
        runtime.updated_ts = self.clock.peek_ms();
        self.store.set_runtime_state(&runtime).await?;
        Ok(snapshot)
    }

    pub async fn active_run(&self) -> Option<ScenarioRun> {
        self.active_run.lock().await.as_ref().map(|r| r.run.clone())
    }

    pub async fn scenario_run(&self, id: Uuid) -> Result<Option<ScenarioRun>, StoreError> {
        self.store.scenario_run(id).await
    }

    async fn transition(
        &self,
        apply: impl FnOnce(&mut ActiveRun, i64) -> Result<(), ScenarioError>,
    ) -> Result<ScenarioRun, EngineError> {
        let mut slot = self.active_run.lock().await;
        let run = slot.as_mut().ok_or(ScenarioError::NoActiveRun)?;
        apply(run, self.clock.peek_ms())?;
        let snapshot = run.run.clone();
        self.store.upsert_scenario_run(&snapshot).await?;
        self.gateway.publish(Broadcast::ReplayStatus(snapshot.clone()));
        Ok(snapshot)
    }

    /// Advance the active run by one deterministic step and feed the output
    /// through the ordinary ingestion path. Returns the run snapshot, or
    /// `None` when no run is currently RUNNING.
    pub async fn scenario_tick(&self) -> Result<Option<ScenarioRun>, EngineError> {
        let batch = {
            let mut slot = self.active_run.lock().await;
            let Some(run) = slot.as_mut() else {
                return Ok(None);
            };
            if run.status() != crate::model::RunStatus::Running {
                return Ok(None);
            }
            let output = match run.step() {
                Ok(Some(output)) => output,
                Ok(None) => return Ok(Some(run.run.clone())),
                Err(e) => {
                    drop(slot);
                    return Ok(self.fail_active_run(e.to_string()).await);
                }
            };
            crate::metrics::scenario_step(&run.run.scenario);
            output.batch
        }; // ingest below re-enters the engine; don't hold the run lock

        self.ingest_batch(batch).await;

        // Re-read and persist under the lock: a pause or reset that landed
        // while ingest held no lock must not be overwritten by the pre-ingest
        // snapshot, in the store or on the wire.
        let slot = self.active_run.lock().await;
        let Some(run) = slot.as_ref() else {
            return Ok(None);
        };
        let snapshot = run.run.clone();
        if let Err(err) = self.store.upsert_scenario_run(&snapshot).await {
            drop(slot);
            return Ok(self
                .fail_active_run(format!("run persistence failed: {err}"))
                .await);
        }
        if snapshot.status == crate::model::RunStatus::Completed {
            info!(run_id = %snapshot.id, "scenario run completed");
            let mut runtime = self.store.runtime_state().await?;
            runtime.active_run_id = None;
            runtime.updated_ts = self.clock.peek_ms();
            self.store.set_runtime_state(&runtime).await?;
        }
        self.gateway.publish(Broadcast::ReplayStatus(snapshot.clone()));
        Ok(Some(snapshot))
    }

    /// Terminal failure path: mark the run FAILED, release the runtime run
    /// pointer and announce the final status. Persistence here is
    /// best-effort; the in-memory run is already terminal either way.
    async fn fail_active_run(&self, reason: String) -> Option<ScenarioRun> {
        let mut slot = self.active_run.lock().await;
        let run = slot.as_mut()?;
        if !run.status().is_active() {
            return Some(run.run.clone());
        }
        run.fail(reason.clone(), self.clock.peek_ms());
        let snapshot = run.run.clone();
        warn!(run_id = %snapshot.id, %reason, "scenario run failed");
        if let Err(err) = self.store.upsert_scenario_run(&snapshot).await {
            warn!(run_id = %snapshot.id, error = %err, "could not persist failed run status");
        }
        match self.store.runtime_state().await {
            Ok(mut runtime) => {
                runtime.active_run_id = None;
                runtime.updated_ts = self.clock.peek_ms();
                if let Err(err) = self.store.set_runtime_state(&runtime).await {
                    warn!(error = %err, "could not release active run pointer");
                }
            }
            Err(err) => warn!(error = %err, "could not release active run pointer"),
        }
        drop(slot);
        self.gateway.publish(Broadcast::ReplayStatus(snapshot.clone()));
        Some(snapshot)
    }
}
