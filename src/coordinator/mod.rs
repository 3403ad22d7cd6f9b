// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The fleet engine: ingestion, queries, scenario control, lifecycle.
//!
//! Every dependency is injected at construction; there are no globals. The
//! write path holds a per-vehicle lock so records for one vehicle apply in
//! batch order, while different vehicles proceed in parallel. Fan-out and
//! graph sync hang off the committed write asynchronously and can never fail
//! an ingest.

mod api;
mod lifecycle;
mod types;

pub use types::{EngineError, EngineState, VehicleDetail};

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::clock::FleetClock;
use crate::config::FleetSyncConfig;
use crate::fanout::{Broadcast, FanoutGateway};
use crate::graph::GraphSyncEngine;
use crate::ingest::{IngestBatch, IngestRecord, IngestReport, RecordValidator, RejectReason};
use crate::model::{AlertStatus, EmitterHeartbeat, Vehicle};
use crate::rules::RuleEngine;
use crate::scenario::ActiveRun;
use crate::store::{StateStore, WriteUnit};

pub struct FleetEngine {
    pub(crate) config: FleetSyncConfig,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) graph: Arc<GraphSyncEngine>,
    pub(crate) gateway: Arc<FanoutGateway>,
    pub(crate) clock: Arc<FleetClock>,
    rules: RuleEngine,
    validator: RecordValidator,
    /// One async mutex per vehicle serializes that vehicle's write path.
    vehicle_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    pub(crate) active_run: AsyncMutex<Option<ActiveRun>>,
    pub(crate) state: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) sync_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) driver_task: Mutex<Option<JoinHandle<()>>>,
}

impl FleetEngine {
    pub fn new(
        config: FleetSyncConfig,
        store: Arc<dyn StateStore>,
        graph: Arc<GraphSyncEngine>,
        gateway: Arc<FanoutGateway>,
        clock: Arc<FleetClock>,
    ) -> Self {
        let (state, state_rx) = watch::channel(EngineState::Created);
        let (shutdown, _) = watch::channel(false);
        Self {
            rules: RuleEngine::new(&config),
            validator: RecordValidator::new(&config),
            config,
            store,
            graph,
            gateway,
            clock,
            vehicle_locks: DashMap::new(),
            active_run: AsyncMutex::new(None),
            state,
            state_rx,
            shutdown,
            sync_task: Mutex::new(None),
            driver_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Ingest a batch. Records validate and apply independently; the report
    /// always satisfies `accepted + rejected == records.len()`.
    pub async fn ingest_batch(&self, batch: IngestBatch) -> IngestReport {
        let mut report = IngestReport::default();
        let now_ms = self.clock.peek_ms();

        for (index, record) in batch.records.into_iter().enumerate() {
            match self.ingest_record(record, now_ms).await {
                Ok(()) => report.accept(),
                Err(reason) => {
                    crate::metrics::ingest_rejected(reason.category());
                    report.reject(index, reason);
                }
            }
        }

        crate::metrics::ingest_accepted(report.accepted);
        report
    }

    async fn ingest_record(&self, record: IngestRecord, now_ms: i64) -> Result<(), RejectReason> {
        let vehicle = self.resolve_vehicle(record.vehicle_id()).await?;

        if let IngestRecord::Telemetry(point) = &record {
            self.validator.check_telemetry(point, now_ms)?;
        }

        // Per-vehicle lock: one vehicle's records apply strictly in order.
        let lock = self
            .vehicle_locks
            .entry(vehicle.id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let prev = self
            .store
            .latest_state(&vehicle.id)
            .await
            .map_err(|e| RejectReason::Storage(e.to_string()))?;
        let open_alerts = self
            .store
            .open_alerts(&vehicle.id)
            .await
            .map_err(|e| RejectReason::Storage(e.to_string()))?;

        let (unit, frames) = match record {
            IngestRecord::Telemetry(point) => {
                let eval =
                    self.rules
                        .evaluate_telemetry(&vehicle, prev.as_ref(), &open_alerts, &point, now_ms);
                for event in &eval.events {
                    crate::metrics::rule_event(event.kind.as_str());
                }
                let mut frames = vec![Broadcast::Telemetry(point.clone())];
                frames.extend(eval.events.iter().cloned().map(Broadcast::Event));
                frames.extend(eval.alert_upserts.iter().cloned().map(Broadcast::Alert));
                if let Some(projection) = &eval.projection {
                    frames.push(Broadcast::VehicleState(projection.clone()));
                }
                (
                    WriteUnit {
                        telemetry: Some(point),
                        events: eval.events,
                        alert_upserts: eval.alert_upserts,
                        projection: eval.projection,
                    },
                    frames,
                )
            }
            IngestRecord::Event(event) => {
                let eval = self
                    .rules
                    .evaluate_event(prev.as_ref(), &open_alerts, event, now_ms);
                let mut frames: Vec<Broadcast> =
                    eval.events.iter().cloned().map(Broadcast::Event).collect();
                frames.extend(eval.alert_upserts.iter().cloned().map(Broadcast::Alert));
                if let Some(projection) = &eval.projection {
                    frames.push(Broadcast::VehicleState(projection.clone()));
                }
                (
                    WriteUnit {
                        telemetry: None,
                        events: eval.events,
                        alert_upserts: eval.alert_upserts,
                        projection: eval.projection,
                    },
                    frames,
                )
            }
        };

        let alerts_touched = !unit.alert_upserts.is_empty();
        self.store
            .apply_unit(unit)
            .await
            .map_err(|e| RejectReason::Storage(e.to_string()))?;

        // Best-effort fan-out after the commit, never before.
        for frame in frames {
            self.gateway.publish(frame);
        }
        if alerts_touched {
            self.refresh_open_alert_gauge().await;
        }
        Ok(())
    }

    async fn resolve_vehicle(&self, id: &str) -> Result<Vehicle, RejectReason> {
        match self.store.vehicle(id).await {
            Ok(Some(vehicle)) => Ok(vehicle),
            Ok(None) => Err(RejectReason::UnknownVehicle(id.to_string())),
            Err(e) => Err(RejectReason::Storage(e.to_string())),
        }
    }

    /// Record an emitter heartbeat and broadcast it.
    pub async fn record_heartbeat(&self, heartbeat: EmitterHeartbeat) -> Result<(), EngineError> {
        self.store.upsert_heartbeat(&heartbeat).await?;
        self.gateway.publish(Broadcast::Heartbeat(heartbeat));
        Ok(())
    }

    async fn refresh_open_alert_gauge(&self) {
        match self.store.alerts().await {
            Ok(alerts) => {
                let open = alerts
                    .iter()
                    .filter(|a| a.status == AlertStatus::Open)
                    .count();
                crate::metrics::open_alerts(open);
            }
            Err(e) => warn!(error = %e, "could not refresh open alert gauge"),
        }
    }
}
