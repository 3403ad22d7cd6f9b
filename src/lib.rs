//! # FleetSync
//!
//! A real-time fleet state synchronization and alerting pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Ingest Layer                           │
//! │  • Live emitter batches and scenario replay batches        │
//! │  • Per-record validation, partial batch acceptance         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Rule Engine                            │
//! │  • Overspeed, harsh brake, fuel anomaly, geofence,         │
//! │    maintenance interval                                    │
//! │  • Alert correlation: attach-or-open, streak auto-close    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                    (one atomic write unit)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Primary Store (SQL / memory)                │
//! │  • Telemetry + events append-only, alerts, projection      │
//! │  • Single source of truth                                  │
//! └─────────────────────────────────────────────────────────────┘
//!                │                             │
//!      (async, best-effort)          (periodic, fail-open)
//!                ▼                             ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │     Fan-out Gateway      │   │     Graph Sync Engine        │
//! │  • Tagged broadcasts     │   │  • Full + delta cycles       │
//! │  • Slow clients dropped  │   │  • Single-flight, idempotent │
//! └──────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fleetsync::{
//!     clock::FleetClock,
//!     config::FleetSyncConfig,
//!     coordinator::FleetEngine,
//!     fanout::FanoutGateway,
//!     graph::{GraphSyncEngine, MemoryGraphStore},
//!     store::MemoryStateStore,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = FleetSyncConfig::default();
//!     let store = Arc::new(MemoryStateStore::new());
//!     let graph = Arc::new(GraphSyncEngine::new(
//!         store.clone(),
//!         Arc::new(MemoryGraphStore::new()),
//!         config.graph_lookback_ms(),
//!     ));
//!     let gateway = Arc::new(FanoutGateway::new(config.fanout_queue_depth));
//!     let clock = Arc::new(FleetClock::wall());
//!
//!     let engine = Arc::new(FleetEngine::new(config, store, graph, gateway, clock));
//!     engine.start().await;
//!     // ... ingest batches, serve queries ...
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`FleetEngine`](coordinator::FleetEngine) orchestrating all components
//! - [`store`]: Primary store backends (SQL, memory)
//! - [`graph`]: Eventually-consistent graph secondary store and sync engine
//! - [`rules`]: Threshold rules and alert correlation
//! - [`ingest`]: Batch types and record validation
//! - [`fanout`]: Best-effort broadcast gateway
//! - [`scenario`]: Deterministic replay engine
//! - [`clock`]: Seedable clock and RNG for reproducible runs

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod fanout;
pub mod graph;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod rules;
pub mod scenario;
pub mod store;

pub use clock::{FleetClock, SimClock, SimRng};
pub use config::FleetSyncConfig;
pub use coordinator::{EngineError, EngineState, FleetEngine, VehicleDetail};
pub use fanout::{Broadcast, FanoutGateway};
pub use graph::{GraphSyncEngine, MemoryGraphStore, RedisGraphStore, SyncOutcome};
pub use ingest::{IngestBatch, IngestRecord, IngestReport, RejectReason};
pub use rules::RuleEngine;
pub use scenario::{ActiveRun, ScenarioAction, ScenarioDefinition, ScenarioError};
pub use store::{MemoryStateStore, SqlStateStore, StateStore, StoreError, WriteUnit};
