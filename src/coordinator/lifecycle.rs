// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle: startup sequence, background tasks, shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::model::RunStatus;

use super::{EngineState, FleetEngine};

impl FleetEngine {
    /// Start the engine.
    ///
    /// Startup flow:
    /// 1. Probe the graph store (fail-open: an unreachable graph never blocks
    ///    startup).
    /// 2. Run one full graph sync if the probe succeeded.
    /// 3. Spawn the delta sync timer and the scenario driver task.
    /// 4. Ready.
    pub async fn start(self: &Arc<Self>) {
        info!("Starting fleet engine...");
        self.set_state(EngineState::Connecting);

        let graph_up = self.graph.probe().await;
        self.set_state(EngineState::Syncing);
        if graph_up {
            self.graph.full_sync().await;
        } else {
            warn!("graph store unavailable at startup, continuing without it");
        }

        self.spawn_sync_timer();
        self.spawn_scenario_driver();

        self.set_state(EngineState::Ready);
        info!("Fleet engine ready");
    }

    /// Graceful shutdown: stop the timers, close fan-out clients, release the
    /// graph store. In that order, after in-flight writes complete.
    pub async fn shutdown(&self) {
        info!("Shutting down fleet engine...");
        self.set_state(EngineState::ShuttingDown);
        let _ = self.shutdown.send(true);

        let sync = self.sync_task.lock().take();
        if let Some(handle) = sync {
            let _ = handle.await;
        }
        let driver = self.driver_task.lock().take();
        if let Some(handle) = driver {
            let _ = handle.await;
        }

        self.gateway.close_all();
        info!("Fleet engine shut down");
    }

    fn set_state(&self, state: EngineState) {
        crate::metrics::engine_state(&state.to_string());
        let _ = self.state.send(state);
    }

    /// Periodic delta sync. Single-flight is enforced inside the graph
    /// engine; an unavailable backend is re-probed on the next tick.
    fn spawn_sync_timer(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let mut shutdown_rx = self.subscribe_shutdown();
        let interval = Duration::from_secs(self.config.graph_sync_interval_secs);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick completes immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now_ms = engine.clock.peek_ms();
                        engine.graph.delta_sync(now_ms).await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("delta sync timer stopping");
                        break;
                    }
                }
            }
        });
        *self.sync_task.lock() = Some(handle);
    }

    /// Paces the active scenario run in wall time: one deterministic step per
    /// `tick_ms / speed_factor`. The step itself stays synchronous and
    /// seed-reproducible; only the pacing lives here.
    fn spawn_scenario_driver(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let mut shutdown_rx = self.subscribe_shutdown();
        let idle = Duration::from_millis(self.config.sim_tick_ms.max(1) as u64);

        let handle = tokio::spawn(async move {
            loop {
                let pace = match engine.active_run().await {
                    Some(run) if run.status == RunStatus::Running => {
                        if let Err(e) = engine.scenario_tick().await {
                            warn!(error = %e, "scenario tick failed");
                        }
                        let tick_ms = engine.config.sim_tick_ms.max(1) as f64;
                        Duration::from_millis((tick_ms / run.speed_factor.max(0.01)) as u64)
                    }
                    _ => idle,
                };
                tokio::select! {
                    _ = tokio::time::sleep(pace) => {}
                    _ = shutdown_rx.changed() => {
                        debug!("scenario driver stopping");
                        break;
                    }
                }
            }
        });
        *self.driver_task.lock() = Some(handle);
    }

    fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
