//! Public types for the fleet engine coordinator.

use serde::Serialize;
use thiserror::Error;

use crate::model::{Alert, FleetEvent, TelemetryPoint, Trip, Vehicle, VehicleLatestState};
use crate::scenario::ScenarioError;
use crate::store::StoreError;

/// Engine lifecycle state.
///
/// The engine progresses through states during startup and shutdown.
/// Use [`super::FleetEngine::state()`] to check the current state or
/// [`super::FleetEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Just created, not yet started
    Created,
    /// Connecting to backends
    Connecting,
    /// Initial full graph sync in progress
    Syncing,
    /// Accepting traffic
    Ready,
    /// Graceful shutdown in progress
    ShuttingDown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Syncing => write!(f, "Syncing"),
            Self::Ready => write!(f, "Ready"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
}

/// Everything the detail view needs in one read.
#[derive(Debug, Clone, Serialize)]
pub struct VehicleDetail {
    pub vehicle: Vehicle,
    pub latest: Option<VehicleLatestState>,
    pub telemetry: Vec<TelemetryPoint>,
    pub recent_events: Vec<FleetEvent>,
    pub open_alerts: Vec<Alert>,
    pub current_trip: Option<Trip>,
}
