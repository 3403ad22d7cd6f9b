// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Rule engine: threshold evaluation, alert correlation, projection update.
//!
//! [`RuleEngine::evaluate_telemetry`] is a pure function from
//! `(previous projection, open alerts, new point)` to `(events, alert
//! mutations, new projection)`. It runs synchronously inside the ingestion
//! write path and its output commits atomically with the triggering telemetry
//! write as one [`WriteUnit`](crate::store::WriteUnit).
//!
//! Correlation policy: a new event attaches to an existing OPEN alert of the
//! same kind for the same vehicle, or opens a new one. Alerts auto-close after
//! `alert_clear_points` consecutive clear points. The projection recomputes
//! `active_alert_count` from the OPEN count every time rather than
//! incrementing, so a missed write can never make the counter drift.

use uuid::Uuid;

use crate::config::FleetSyncConfig;
use crate::model::{
    Alert, AlertStatus, EventKind, EventSource, FleetEvent, Severity, TelemetryPoint, Vehicle,
    VehicleLatestState, VehicleStatus,
};

/// Output of one evaluation, destined for a single atomic write unit.
#[derive(Debug, Default)]
pub struct Evaluation {
    pub events: Vec<FleetEvent>,
    pub alert_upserts: Vec<Alert>,
    /// `None` means the projection must not change (stale point).
    pub projection: Option<VehicleLatestState>,
}

/// A rule firing: kind, severity, human-readable cause.
struct Firing {
    kind: EventKind,
    severity: Severity,
    message: String,
}

pub struct RuleEngine {
    cfg: FleetSyncConfig,
}

impl RuleEngine {
    #[must_use]
    pub fn new(cfg: &FleetSyncConfig) -> Self {
        Self { cfg: cfg.clone() }
    }

    /// Evaluate a telemetry point against the previous projection.
    ///
    /// A point older than the stored `last_ts` is stale: it still belongs in
    /// history (the caller persists it), but consecutive-point rules are
    /// meaningless out of order and the projection must not regress, so the
    /// evaluation is empty.
    pub fn evaluate_telemetry(
        &self,
        vehicle: &Vehicle,
        prev: Option<&VehicleLatestState>,
        open_alerts: &[Alert],
        point: &TelemetryPoint,
        now_ms: i64,
    ) -> Evaluation {
        if let Some(prev) = prev {
            if prev.last_telemetry_id.is_some() && point.ts < prev.last_ts {
                return Evaluation::default();
            }
        }

        let firings = self.detect(vehicle, prev, point);
        let events: Vec<FleetEvent> = firings
            .iter()
            .map(|f| FleetEvent {
                id: Uuid::new_v4(),
                vehicle_id: point.vehicle_id.clone(),
                kind: f.kind,
                severity: f.severity,
                ts: point.ts,
                message: f.message.clone(),
                source: EventSource::RuleEngine,
                telemetry_id: Some(point.id),
            })
            .collect();

        let fired_kinds: Vec<EventKind> = firings.iter().map(|f| f.kind).collect();
        let (alert_upserts, open_count, closed_kinds) =
            self.correlate(open_alerts, &events, prev, &fired_kinds, now_ms);

        let maintenance_due = prev.is_some_and(|p| p.maintenance_due)
            || fired_kinds.contains(&EventKind::MaintenanceDue);
        let breach_now = fired_kinds.contains(&EventKind::GeofenceBreach)
            || fired_kinds.contains(&EventKind::OffRoute);

        let mut projection = VehicleLatestState {
            vehicle_id: point.vehicle_id.clone(),
            last_telemetry_id: Some(point.id),
            last_ts: point.ts,
            lat: point.lat,
            lon: point.lon,
            speed_kph: point.speed_kph,
            fuel_pct: point.fuel_pct,
            odometer_km: point.odometer_km,
            ignition: point.ignition,
            idling: point.idling,
            active_alert_count: open_count,
            maintenance_due,
            status: derive_status(open_count, maintenance_due, breach_now, point),
            clear_streaks: Default::default(),
            updated_ts: now_ms,
        };

        // Clear streaks: reset on firing, advance otherwise; closed alerts
        // drop their streak entirely.
        let mut streaks = prev.map(|p| p.clear_streaks.clone()).unwrap_or_default();
        for kind in &fired_kinds {
            streaks.insert(*kind, 0);
        }
        let open_kinds: Vec<EventKind> = open_alerts
            .iter()
            .filter(|a| a.status == AlertStatus::Open)
            .map(|a| a.kind)
            .collect();
        for kind in open_kinds {
            if !fired_kinds.contains(&kind) && kind.auto_closes() {
                *streaks.entry(kind).or_insert(0) += 1;
            }
        }
        for kind in &closed_kinds {
            streaks.remove(kind);
        }
        projection.clear_streaks = streaks;

        Evaluation {
            events,
            alert_upserts,
            projection: Some(projection),
        }
    }

    /// Correlate an externally produced event (scenario script, emitter fault
    /// report, manual entry) without a telemetry point.
    ///
    /// The projection keeps its telemetry cursor and only refreshes the alert
    /// count and derived status.
    pub fn evaluate_event(
        &self,
        prev: Option<&VehicleLatestState>,
        open_alerts: &[Alert],
        event: FleetEvent,
        now_ms: i64,
    ) -> Evaluation {
        let vehicle_id = event.vehicle_id.clone();
        let fired = vec![event.kind];
        let events = vec![event];
        let (alert_upserts, open_count, _closed) =
            self.correlate(open_alerts, &events, prev, &fired, now_ms);

        let mut projection = prev
            .cloned()
            .unwrap_or_else(|| VehicleLatestState::empty(&vehicle_id));
        projection.active_alert_count = open_count;
        projection.maintenance_due =
            projection.maintenance_due || fired.contains(&EventKind::MaintenanceDue);
        projection.clear_streaks.insert(fired[0], 0);
        if open_count > 0 {
            projection.status = VehicleStatus::Alerting;
        }
        projection.updated_ts = now_ms;

        Evaluation {
            events,
            alert_upserts,
            projection: Some(projection),
        }
    }

    fn detect(
        &self,
        vehicle: &Vehicle,
        prev: Option<&VehicleLatestState>,
        point: &TelemetryPoint,
    ) -> Vec<Firing> {
        let cfg = &self.cfg;
        let mut firings = Vec::new();

        if point.speed_kph > cfg.overspeed_limit_kph {
            let over = point.speed_kph - cfg.overspeed_limit_kph;
            firings.push(Firing {
                kind: EventKind::Overspeed,
                severity: overspeed_severity(over),
                message: format!(
                    "speed {:.0} km/h exceeds limit {:.0} km/h",
                    point.speed_kph, cfg.overspeed_limit_kph
                ),
            });
        }

        // Consecutive-point rules need a real previous point in the same trip.
        if let Some(prev) = prev.filter(|p| p.last_telemetry_id.is_some()) {
            let dt_s = (point.ts - prev.last_ts) as f64 / 1_000.0;
            if dt_s > 0.0 && prev.ignition && point.ignition {
                let decel = (prev.speed_kph - point.speed_kph) / dt_s;
                if decel >= cfg.harsh_brake_decel_kph_s {
                    firings.push(Firing {
                        kind: EventKind::HarshBrake,
                        severity: if decel >= cfg.harsh_brake_decel_kph_s * 1.5 {
                            Severity::High
                        } else {
                            Severity::Medium
                        },
                        message: format!("deceleration {decel:.1} km/h/s"),
                    });
                }
            }

            let drop_pct = prev.fuel_pct - point.fuel_pct;
            let dist_km = (point.odometer_km - prev.odometer_km).max(0.0);
            let plausible = dist_km * cfg.fuel_pct_per_km + 1.0;
            if drop_pct >= cfg.fuel_drop_min_pct && drop_pct > plausible {
                firings.push(Firing {
                    kind: EventKind::FuelAnomaly,
                    severity: if drop_pct >= cfg.fuel_drop_min_pct * 2.0 {
                        Severity::High
                    } else {
                        Severity::Medium
                    },
                    message: format!("fuel dropped {drop_pct:.1}% over {dist_km:.1} km"),
                });
            }

            if cfg.maintenance_interval_km > 0.0 {
                let prev_services = (prev.odometer_km / cfg.maintenance_interval_km).floor();
                let new_services = (point.odometer_km / cfg.maintenance_interval_km).floor();
                if new_services > prev_services {
                    firings.push(Firing {
                        kind: EventKind::MaintenanceDue,
                        severity: Severity::Medium,
                        message: format!(
                            "odometer {:.0} km crossed service interval {:.0} km",
                            point.odometer_km, cfg.maintenance_interval_km
                        ),
                    });
                }
            }
        }

        if let Some(fence) = vehicle.geofence {
            if !fence.contains(point.lat, point.lon) {
                firings.push(Firing {
                    kind: EventKind::GeofenceBreach,
                    severity: Severity::Medium,
                    message: format!(
                        "position ({:.5}, {:.5}) outside assigned geofence",
                        point.lat, point.lon
                    ),
                });
            }
        }

        firings
    }

    /// Attach-or-open correlation plus auto-close, returning the mutated
    /// alerts, the resulting OPEN count, and the kinds closed this round.
    fn correlate(
        &self,
        open_alerts: &[Alert],
        events: &[FleetEvent],
        prev: Option<&VehicleLatestState>,
        fired_kinds: &[EventKind],
        now_ms: i64,
    ) -> (Vec<Alert>, u32, Vec<EventKind>) {
        let mut working: Vec<Alert> = open_alerts.to_vec();
        let mut opened: Vec<Alert> = Vec::new();

        for event in events {
            if let Some(existing) = working
                .iter_mut()
                .chain(opened.iter_mut())
                .find(|a| a.kind == event.kind && a.status == AlertStatus::Open)
            {
                existing.attach(event, now_ms);
            } else {
                opened.push(Alert::open(event, now_ms));
            }
        }

        // Auto-close: alerts whose condition stayed clear for N points.
        let mut closed_kinds = Vec::new();
        let threshold = self.cfg.alert_clear_points;
        for alert in working.iter_mut() {
            if alert.status != AlertStatus::Open
                || fired_kinds.contains(&alert.kind)
                || !alert.kind.auto_closes()
            {
                continue;
            }
            let streak = prev
                .and_then(|p| p.clear_streaks.get(&alert.kind).copied())
                .unwrap_or(0)
                + 1;
            if streak >= threshold {
                alert.close(now_ms);
                closed_kinds.push(alert.kind);
            }
        }

        let open_count = working
            .iter()
            .chain(opened.iter())
            .filter(|a| a.status == AlertStatus::Open)
            .count() as u32;

        // Only alerts that actually changed go into the write unit.
        let mut upserts: Vec<Alert> = working
            .into_iter()
            .filter(|a| {
                open_alerts
                    .iter()
                    .find(|orig| orig.id == a.id)
                    .is_none_or(|orig| *orig != *a)
            })
            .collect();
        upserts.extend(opened);

        (upserts, open_count, closed_kinds)
    }
}

fn overspeed_severity(over_kph: f64) -> Severity {
    if over_kph > 30.0 {
        Severity::High
    } else if over_kph > 15.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Status precedence: alerting > maintenance_due > off_route > on_trip > idle > parked.
fn derive_status(
    open_count: u32,
    maintenance_due: bool,
    breach_now: bool,
    point: &TelemetryPoint,
) -> VehicleStatus {
    if open_count > 0 {
        VehicleStatus::Alerting
    } else if maintenance_due {
        VehicleStatus::MaintenanceDue
    } else if breach_now {
        VehicleStatus::OffRoute
    } else if point.ignition && point.speed_kph > 1.0 {
        VehicleStatus::OnTrip
    } else if point.ignition {
        VehicleStatus::Idle
    } else {
        VehicleStatus::Parked
    }
}
