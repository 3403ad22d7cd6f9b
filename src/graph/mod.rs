// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Eventually-consistent graph projection of the primary store.
//!
//! The sync engine copies entities into the secondary graph store as nodes
//! and relationship edges:
//!
//! ```text
//! (Alert)    -RAISED_FOR->  (Vehicle)
//! (Trip)     -ASSIGNED_TO-> (Vehicle)
//! (Driver)   -DRIVES->      (Vehicle)
//! (WorkOrder)-MAINTAINS->   (Vehicle)
//! ```
//!
//! Cycles are single-flight (an overlapping trigger is skipped, not queued)
//! and fail open: when the graph backend is unreachable the engine marks
//! itself unavailable and the primary pipeline keeps running untouched. The
//! delta cycle re-syncs everything updated inside a trailing lookback window
//! that overlaps the sync interval, so a missed cycle is repaired by the next
//! one rather than lost.

pub mod memory;
pub mod redis;
pub mod store;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::model::{TripStatus, Vehicle};
use crate::store::{StateStore, StoreError};
use store::{GraphError, GraphStore, NodeRef};

pub use memory::MemoryGraphStore;
pub use redis::RedisGraphStore;

/// Result of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed {
        nodes: u64,
        edges: u64,
        statement_failures: u64,
    },
    /// Another cycle was already in flight.
    Skipped,
    /// Backend unreachable; engine is now marked unavailable.
    Unavailable,
}

/// Everything one cycle intends to write, nodes before edges.
#[derive(Default)]
struct SyncPlan {
    nodes: Vec<(NodeRef, serde_json::Value)>,
    edges: Vec<(&'static str, NodeRef, NodeRef)>,
    seen: HashSet<(String, String)>,
}

impl SyncPlan {
    fn push_node(&mut self, node: NodeRef, props: serde_json::Value) {
        if self.seen.insert((node.label.clone(), node.key.clone())) {
            self.nodes.push((node, props));
        }
    }

    fn push_edge(&mut self, rel: &'static str, from: NodeRef, to: NodeRef) {
        self.edges.push((rel, from, to));
    }

    fn has_node(&self, node: &NodeRef) -> bool {
        self.seen.contains(&(node.label.clone(), node.key.clone()))
    }
}

pub struct GraphSyncEngine {
    store: Arc<dyn StateStore>,
    graph: Arc<dyn GraphStore>,
    lookback_ms: i64,
    available: AtomicBool,
    in_flight: AtomicBool,
}

impl GraphSyncEngine {
    pub fn new(store: Arc<dyn StateStore>, graph: Arc<dyn GraphStore>, lookback_ms: i64) -> Self {
        Self {
            store,
            graph,
            lookback_ms,
            available: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Whether the last probe or cycle found the backend reachable.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Probe the backend and update availability. Safe to call any time;
    /// this is how an unavailable engine comes back.
    pub async fn probe(&self) -> bool {
        let up = self.graph.probe().await.is_ok();
        let was = self.available.swap(up, Ordering::SeqCst);
        if up && !was {
            info!("graph store reachable, sync enabled");
        } else if !up && was {
            warn!("graph store unreachable, sync disabled");
        }
        up
    }

    /// Full sync: every entity, every edge.
    pub async fn full_sync(&self) -> SyncOutcome {
        self.run_cycle("full", None).await
    }

    /// Delta sync: entities updated within the trailing lookback window
    /// ending at `now_ms`.
    pub async fn delta_sync(&self, now_ms: i64) -> SyncOutcome {
        self.run_cycle("delta", Some(now_ms - self.lookback_ms)).await
    }

    async fn run_cycle(&self, kind: &str, since_ms: Option<i64>) -> SyncOutcome {
        if !self.is_available() && !self.probe().await {
            crate::metrics::graph_sync_unavailable();
            return SyncOutcome::Unavailable;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(kind, "graph sync already in flight, skipping");
            crate::metrics::graph_sync_skipped();
            return SyncOutcome::Skipped;
        }

        let outcome = self.run_cycle_inner(kind, since_ms).await;
        self.in_flight.store(false, Ordering::SeqCst);

        match &outcome {
            SyncOutcome::Completed {
                nodes,
                edges,
                statement_failures,
            } => {
                info!(
                    kind,
                    nodes, edges, statement_failures, "graph sync cycle completed"
                );
                crate::metrics::graph_sync_completed(kind, *nodes, *edges);
            }
            SyncOutcome::Unavailable => {
                self.available.store(false, Ordering::SeqCst);
                warn!(kind, "graph sync cycle aborted, backend unavailable");
                crate::metrics::graph_sync_unavailable();
            }
            SyncOutcome::Skipped => {}
        }
        outcome
    }

    async fn run_cycle_inner(&self, kind: &str, since_ms: Option<i64>) -> SyncOutcome {
        let plan = match self.build_plan(since_ms).await {
            Ok(plan) => plan,
            Err(err) => {
                // A primary-store read failure is not a graph outage; report
                // the cycle as failed statements, stay available.
                warn!(kind, error = %err, "graph sync could not read primary store");
                return SyncOutcome::Completed {
                    nodes: 0,
                    edges: 0,
                    statement_failures: 1,
                };
            }
        };

        let mut nodes_written = 0u64;
        let mut edges_written = 0u64;
        let mut failures = 0u64;
        let mut failed_nodes: HashSet<(String, String)> = HashSet::new();

        for (node, props) in &plan.nodes {
            match self.graph.merge_node(node, props).await {
                Ok(()) => nodes_written += 1,
                Err(GraphError::Unavailable(_)) => return SyncOutcome::Unavailable,
                Err(GraphError::Statement(reason)) => {
                    warn!(label = %node.label, key = %node.key, %reason, "node merge failed");
                    failed_nodes.insert((node.label.clone(), node.key.clone()));
                    failures += 1;
                    crate::metrics::graph_statement_failure();
                }
            }
        }

        for (rel, from, to) in &plan.edges {
            // Never write an edge whose endpoint merge failed this cycle.
            if failed_nodes.contains(&(from.label.clone(), from.key.clone()))
                || failed_nodes.contains(&(to.label.clone(), to.key.clone()))
            {
                failures += 1;
                continue;
            }
            match self.graph.merge_edge(rel, from, to).await {
                Ok(()) => edges_written += 1,
                Err(GraphError::Unavailable(_)) => return SyncOutcome::Unavailable,
                Err(GraphError::Statement(reason)) => {
                    warn!(rel, %reason, "edge merge failed");
                    failures += 1;
                    crate::metrics::graph_statement_failure();
                }
            }
        }

        SyncOutcome::Completed {
            nodes: nodes_written,
            edges: edges_written,
            statement_failures: failures,
        }
    }

    async fn build_plan(&self, since_ms: Option<i64>) -> Result<SyncPlan, StoreError> {
        let (vehicles, drivers, trips, work_orders, alerts) = match since_ms {
            None => (
                self.store.vehicles().await?,
                self.store.drivers().await?,
                self.store.trips().await?,
                self.store.work_orders().await?,
                self.store.alerts().await?,
            ),
            Some(since) => (
                self.store.vehicles_updated_since(since).await?,
                self.store.drivers_updated_since(since).await?,
                self.store.trips_updated_since(since).await?,
                self.store.work_orders_updated_since(since).await?,
                self.store.alerts_updated_since(since).await?,
            ),
        };

        let mut plan = SyncPlan::default();
        for v in &vehicles {
            plan.push_node(vehicle_ref(&v.id), vehicle_props(v));
        }
        for d in &drivers {
            plan.push_node(NodeRef::new("Driver", &d.id), entity_props(d));
        }
        for t in &trips {
            self.ensure_vehicle(&mut plan, &t.vehicle_id).await?;
            let trip_ref = NodeRef::new("Trip", &t.id.to_string());
            plan.push_node(trip_ref.clone(), entity_props(t));
            plan.push_edge("ASSIGNED_TO", trip_ref, vehicle_ref(&t.vehicle_id));
            if let Some(driver_id) = &t.driver_id {
                self.ensure_driver(&mut plan, driver_id).await?;
                if t.status == TripStatus::Active {
                    plan.push_edge(
                        "DRIVES",
                        NodeRef::new("Driver", driver_id),
                        vehicle_ref(&t.vehicle_id),
                    );
                }
            }
        }
        for w in &work_orders {
            self.ensure_vehicle(&mut plan, &w.vehicle_id).await?;
            let order_ref = NodeRef::new("WorkOrder", &w.id.to_string());
            plan.push_node(order_ref.clone(), entity_props(w));
            plan.push_edge("MAINTAINS", order_ref, vehicle_ref(&w.vehicle_id));
        }
        for a in &alerts {
            self.ensure_vehicle(&mut plan, &a.vehicle_id).await?;
            let alert_ref = NodeRef::new("Alert", &a.id.to_string());
            plan.push_node(alert_ref.clone(), entity_props(a));
            plan.push_edge("RAISED_FOR", alert_ref, vehicle_ref(&a.vehicle_id));
        }
        Ok(plan)
    }

    /// A delta batch can reference a vehicle outside the window; merge its
    /// node anyway so no edge dangles.
    async fn ensure_vehicle(&self, plan: &mut SyncPlan, id: &str) -> Result<(), StoreError> {
        if plan.has_node(&vehicle_ref(id)) {
            return Ok(());
        }
        if let Some(v) = self.store.vehicle(id).await? {
            plan.push_node(vehicle_ref(id), vehicle_props(&v));
        }
        Ok(())
    }

    async fn ensure_driver(&self, plan: &mut SyncPlan, id: &str) -> Result<(), StoreError> {
        let node = NodeRef::new("Driver", id);
        if plan.has_node(&node) {
            return Ok(());
        }
        if let Some(d) = self.store.driver(id).await? {
            plan.push_node(node, entity_props(&d));
        }
        Ok(())
    }
}

fn vehicle_ref(id: &str) -> NodeRef {
    NodeRef::new("Vehicle", id)
}

fn vehicle_props(v: &Vehicle) -> serde_json::Value {
    entity_props(v)
}

fn entity_props<T: serde::Serialize>(entity: &T) -> serde_json::Value {
    serde_json::to_value(entity).unwrap_or(serde_json::Value::Null)
}
