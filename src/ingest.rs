//! Ingestion batch types and per-record validation.
//!
//! Batches are accepted partially: each record validates independently, bad
//! records are rejected with an indexed reason, and good records continue
//! through the rule engine and store. The report always satisfies
//! `accepted + rejected == records.len()`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::FleetSyncConfig;
use crate::model::{FleetEvent, TelemetryPoint, TelemetrySource, VehicleType};

/// One submission from an emitter: telemetry points and/or event records.
///
/// Live emitters are sharded per vehicle type and tag their batches with it;
/// replay batches span types and leave it unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestBatch {
    pub emitter_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_type: Option<VehicleType>,
    pub source: TelemetrySource,
    pub records: Vec<IngestRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "record", rename_all = "camelCase")]
pub enum IngestRecord {
    Telemetry(TelemetryPoint),
    Event(FleetEvent),
}

impl IngestRecord {
    pub fn vehicle_id(&self) -> &str {
        match self {
            IngestRecord::Telemetry(p) => &p.vehicle_id,
            IngestRecord::Event(e) => &e.vehicle_id,
        }
    }
}

/// Why a single record was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("unknown vehicle: {0}")]
    UnknownVehicle(String),
    #[error("implausible speed: {0} km/h")]
    ImplausibleSpeed(String),
    #[error("fuel level out of range: {0}%")]
    FuelOutOfRange(String),
    #[error("negative odometer: {0} km")]
    NegativeOdometer(String),
    #[error("timestamp too far in the future: {0}")]
    FutureTimestamp(i64),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl RejectReason {
    /// Stable label for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            RejectReason::UnknownVehicle(_) => "unknown_vehicle",
            RejectReason::ImplausibleSpeed(_) => "implausible_speed",
            RejectReason::FuelOutOfRange(_) => "fuel_out_of_range",
            RejectReason::NegativeOdometer(_) => "negative_odometer",
            RejectReason::FutureTimestamp(_) => "future_timestamp",
            RejectReason::Storage(_) => "storage",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub index: usize,
    pub reason: String,
}

/// Accounting for one batch. Rejections carry the record index so emitters
/// can resubmit only what failed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: usize,
    pub rejections: Vec<Rejection>,
}

impl IngestReport {
    pub fn accept(&mut self) {
        self.accepted += 1;
    }

    pub fn reject(&mut self, index: usize, reason: RejectReason) {
        self.rejected += 1;
        self.rejections.push(Rejection {
            index,
            reason: reason.to_string(),
        });
    }
}

/// Stateless physical-plausibility checks, thresholds from config.
pub struct RecordValidator {
    max_plausible_speed_kph: f64,
    live_ts_window_ms: i64,
}

impl RecordValidator {
    #[must_use]
    pub fn new(cfg: &FleetSyncConfig) -> Self {
        Self {
            max_plausible_speed_kph: cfg.max_plausible_speed_kph,
            live_ts_window_ms: cfg.live_ts_window_ms,
        }
    }

    /// Validate a telemetry point. `now_ms` bounds the future-timestamp check,
    /// which only applies to live points; replay traffic carries historical
    /// simulated timestamps by design.
    pub fn check_telemetry(
        &self,
        point: &TelemetryPoint,
        now_ms: i64,
    ) -> Result<(), RejectReason> {
        if point.speed_kph < 0.0 || point.speed_kph > self.max_plausible_speed_kph {
            return Err(RejectReason::ImplausibleSpeed(format!(
                "{:.1}",
                point.speed_kph
            )));
        }
        if !(0.0..=100.0).contains(&point.fuel_pct) {
            return Err(RejectReason::FuelOutOfRange(format!("{:.1}", point.fuel_pct)));
        }
        if point.odometer_km < 0.0 {
            return Err(RejectReason::NegativeOdometer(format!(
                "{:.1}",
                point.odometer_km
            )));
        }
        if point.source == TelemetrySource::Live && point.ts > now_ms + self.live_ts_window_ms {
            return Err(RejectReason::FutureTimestamp(point.ts));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn point(source: TelemetrySource) -> TelemetryPoint {
        TelemetryPoint {
            id: Uuid::new_v4(),
            vehicle_id: "veh-1".into(),
            ts: 10_000,
            lat: 51.5,
            lon: -0.12,
            speed_kph: 50.0,
            fuel_pct: 80.0,
            odometer_km: 1_000.0,
            ignition: true,
            idling: false,
            engine_temp_c: None,
            battery_v: None,
            rpm: None,
            source,
            provenance: "test".into(),
        }
    }

    #[test]
    fn plausible_point_passes() {
        let validator = RecordValidator::new(&FleetSyncConfig::default());
        assert!(validator.check_telemetry(&point(TelemetrySource::Live), 10_000).is_ok());
    }

    #[test]
    fn implausible_speed_rejected() {
        let validator = RecordValidator::new(&FleetSyncConfig::default());
        let mut p = point(TelemetrySource::Live);
        p.speed_kph = 500.0;
        assert!(matches!(
            validator.check_telemetry(&p, 10_000),
            Err(RejectReason::ImplausibleSpeed(_))
        ));
        p.speed_kph = -1.0;
        assert!(validator.check_telemetry(&p, 10_000).is_err());
    }

    #[test]
    fn fuel_and_odometer_bounds() {
        let validator = RecordValidator::new(&FleetSyncConfig::default());
        let mut p = point(TelemetrySource::Live);
        p.fuel_pct = 101.0;
        assert!(matches!(
            validator.check_telemetry(&p, 10_000),
            Err(RejectReason::FuelOutOfRange(_))
        ));
        p.fuel_pct = 50.0;
        p.odometer_km = -5.0;
        assert!(matches!(
            validator.check_telemetry(&p, 10_000),
            Err(RejectReason::NegativeOdometer(_))
        ));
    }

    #[test]
    fn far_future_live_point_rejected_but_replay_allowed() {
        let cfg = FleetSyncConfig::default();
        let validator = RecordValidator::new(&cfg);
        let mut p = point(TelemetrySource::Live);
        p.ts = 10_000 + cfg.live_ts_window_ms + 1;
        assert!(matches!(
            validator.check_telemetry(&p, 10_000),
            Err(RejectReason::FutureTimestamp(_))
        ));

        p.source = TelemetrySource::Replay;
        assert!(validator.check_telemetry(&p, 10_000).is_ok());
    }

    #[test]
    fn report_accounting_balances() {
        let mut report = IngestReport::default();
        report.accept();
        report.accept();
        report.reject(2, RejectReason::UnknownVehicle("ghost".into()));
        assert_eq!(report.accepted + report.rejected, 3);
        assert_eq!(report.rejections[0].index, 2);
    }
}
