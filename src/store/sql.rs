// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL primary store.
//!
//! Column layout follows the "keys + JSON payload" pattern: the columns a
//! query filters or orders on are real columns, the full entity rides in a
//! `payload` TEXT column as JSON. We use TEXT rather than a native JSON type
//! because sqlx's `Any` driver has no JSON type mapping; `JSON_EXTRACT` still
//! works on TEXT where the dialect supports it.
//!
//! ```sql
//! CREATE TABLE fleet_alerts (
//!   id TEXT PRIMARY KEY,
//!   vehicle_id TEXT NOT NULL,
//!   kind TEXT NOT NULL,
//!   status TEXT NOT NULL,
//!   updated_ts BIGINT NOT NULL,
//!   payload TEXT NOT NULL
//! )
//! ```
//!
//! [`SqlStateStore::apply_unit`] runs inside a single transaction - the
//! rule-engine outputs for one telemetry point are durable together or not at
//! all.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use super::traits::{StateStore, StoreError, VehicleFilter, VehiclePage, WriteUnit};
use crate::model::{
    Alert, Driver, EmitterHeartbeat, FleetEvent, FleetRuntimeState, ScenarioRun, TelemetryPoint,
    Trip, TripStatus, Vehicle, VehicleLatestState, WorkOrder,
};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Backend(e.to_string()))
}

fn from_json<T: DeserializeOwned>(payload: &str) -> Result<T, StoreError> {
    serde_json::from_str(payload).map_err(|e| StoreError::Backend(e.to_string()))
}

/// The serde string form of a unit enum variant (e.g. `TripStatus::Active` → "active").
fn enum_str<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn payloads<T: DeserializeOwned>(rows: Vec<sqlx::any::AnyRow>) -> Result<Vec<T>, StoreError> {
    rows.iter()
        .map(|row| {
            let payload: String = row.try_get("payload").map_err(backend)?;
            from_json(&payload)
        })
        .collect()
}

pub struct SqlStateStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlStateStore {
    /// Connect and initialize the schema.
    ///
    /// An in-memory sqlite URL is pinned to a single connection - each pooled
    /// connection would otherwise see its own private database.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        install_drivers();
        let is_sqlite = url.starts_with("sqlite:");
        let max_connections = if url.contains(":memory:") { 1 } else { 10 };

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(backend)?;

        let store = Self { pool, is_sqlite };
        if store.is_sqlite && !url.contains(":memory:") {
            // WAL mode: readers don't block the ingestion writer
            sqlx::query("PRAGMA journal_mode = WAL")
                .execute(&store.pool)
                .await
                .map_err(backend)?;
        }
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS fleet_vehicles (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                depot TEXT NOT NULL,
                vehicle_type TEXT NOT NULL,
                updated_ts BIGINT NOT NULL,
                payload TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS fleet_drivers (
                id TEXT PRIMARY KEY,
                updated_ts BIGINT NOT NULL,
                payload TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS fleet_trips (
                id TEXT PRIMARY KEY,
                vehicle_id TEXT NOT NULL,
                status TEXT NOT NULL,
                updated_ts BIGINT NOT NULL,
                payload TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS fleet_work_orders (
                id TEXT PRIMARY KEY,
                vehicle_id TEXT NOT NULL,
                status TEXT NOT NULL,
                updated_ts BIGINT NOT NULL,
                payload TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS fleet_telemetry (
                id TEXT PRIMARY KEY,
                vehicle_id TEXT NOT NULL,
                ts BIGINT NOT NULL,
                payload TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_telemetry_vehicle_ts
                ON fleet_telemetry (vehicle_id, ts)",
            "CREATE TABLE IF NOT EXISTS fleet_events (
                id TEXT PRIMARY KEY,
                vehicle_id TEXT NOT NULL,
                ts BIGINT NOT NULL,
                payload TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_events_vehicle_ts
                ON fleet_events (vehicle_id, ts)",
            "CREATE TABLE IF NOT EXISTS fleet_alerts (
                id TEXT PRIMARY KEY,
                vehicle_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                updated_ts BIGINT NOT NULL,
                payload TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_alerts_vehicle_status
                ON fleet_alerts (vehicle_id, status)",
            "CREATE TABLE IF NOT EXISTS fleet_latest_state (
                vehicle_id TEXT PRIMARY KEY,
                last_ts BIGINT NOT NULL,
                updated_ts BIGINT NOT NULL,
                payload TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS fleet_runtime (
                id BIGINT PRIMARY KEY,
                payload TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS fleet_scenario_runs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                updated_ts BIGINT NOT NULL,
                payload TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS fleet_heartbeats (
                emitter_id TEXT PRIMARY KEY,
                ts BIGINT NOT NULL,
                payload TEXT NOT NULL
            )",
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await.map_err(backend)?;
        }
        Ok(())
    }

    /// Dialect note: `REPLACE INTO` is valid in both sqlite and MySQL, and the
    /// natural key is always the primary key, so re-running any upsert is
    /// idempotent.
    #[must_use]
    pub fn is_sqlite(&self) -> bool {
        self.is_sqlite
    }
}

#[async_trait]
impl StateStore for SqlStateStore {
    async fn upsert_vehicle(&self, vehicle: &Vehicle) -> Result<(), StoreError> {
        sqlx::query(
            "REPLACE INTO fleet_vehicles (id, status, depot, vehicle_type, updated_ts, payload)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(vehicle.id.as_str())
        .bind(vehicle.status.as_str())
        .bind(vehicle.depot.as_str())
        .bind(enum_str(&vehicle.vehicle_type))
        .bind(vehicle.updated_ts)
        .bind(to_json(vehicle)?)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn upsert_driver(&self, driver: &Driver) -> Result<(), StoreError> {
        sqlx::query("REPLACE INTO fleet_drivers (id, updated_ts, payload) VALUES (?, ?, ?)")
            .bind(driver.id.as_str())
            .bind(driver.updated_ts)
            .bind(to_json(driver)?)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn upsert_trip(&self, trip: &Trip) -> Result<(), StoreError> {
        sqlx::query(
            "REPLACE INTO fleet_trips (id, vehicle_id, status, updated_ts, payload)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(trip.id.to_string())
        .bind(trip.vehicle_id.as_str())
        .bind(enum_str(&trip.status))
        .bind(trip.updated_ts)
        .bind(to_json(trip)?)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn upsert_work_order(&self, order: &WorkOrder) -> Result<(), StoreError> {
        sqlx::query(
            "REPLACE INTO fleet_work_orders (id, vehicle_id, status, updated_ts, payload)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(order.id.to_string())
        .bind(order.vehicle_id.as_str())
        .bind(enum_str(&order.status))
        .bind(order.updated_ts)
        .bind(to_json(order)?)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn vehicle(&self, id: &str) -> Result<Option<Vehicle>, StoreError> {
        let row = sqlx::query("SELECT payload FROM fleet_vehicles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => {
                let payload: String = row.try_get("payload").map_err(backend)?;
                Ok(Some(from_json(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn driver(&self, id: &str) -> Result<Option<Driver>, StoreError> {
        let row = sqlx::query("SELECT payload FROM fleet_drivers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => {
                let payload: String = row.try_get("payload").map_err(backend)?;
                Ok(Some(from_json(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn vehicles(&self) -> Result<Vec<Vehicle>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM fleet_vehicles ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        payloads(rows)
    }

    async fn drivers(&self) -> Result<Vec<Driver>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM fleet_drivers ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        payloads(rows)
    }

    async fn trips(&self) -> Result<Vec<Trip>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM fleet_trips ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        payloads(rows)
    }

    async fn work_orders(&self) -> Result<Vec<WorkOrder>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM fleet_work_orders ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        payloads(rows)
    }

    async fn apply_unit(&self, unit: WriteUnit) -> Result<(), StoreError> {
        unit.validate()?;
        let mut tx = self.pool.begin().await.map_err(backend)?;

        if let Some(ref point) = unit.telemetry {
            sqlx::query(
                "INSERT INTO fleet_telemetry (id, vehicle_id, ts, payload) VALUES (?, ?, ?, ?)",
            )
            .bind(point.id.to_string())
            .bind(point.vehicle_id.as_str())
            .bind(point.ts)
            .bind(to_json(point)?)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        for event in &unit.events {
            sqlx::query(
                "INSERT INTO fleet_events (id, vehicle_id, ts, payload) VALUES (?, ?, ?, ?)",
            )
            .bind(event.id.to_string())
            .bind(event.vehicle_id.as_str())
            .bind(event.ts)
            .bind(to_json(event)?)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        for alert in &unit.alert_upserts {
            sqlx::query(
                "REPLACE INTO fleet_alerts (id, vehicle_id, kind, status, updated_ts, payload)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(alert.id.to_string())
            .bind(alert.vehicle_id.as_str())
            .bind(alert.kind.as_str())
            .bind(alert.status.as_str())
            .bind(alert.updated_ts)
            .bind(to_json(alert)?)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        if let Some(ref projection) = unit.projection {
            sqlx::query(
                "REPLACE INTO fleet_latest_state (vehicle_id, last_ts, updated_ts, payload)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(projection.vehicle_id.as_str())
            .bind(projection.last_ts)
            .bind(projection.updated_ts)
            .bind(to_json(projection)?)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        // Dropping the transaction on any earlier `?` rolls the unit back.
        tx.commit().await.map_err(backend)
    }

    async fn latest_state(
        &self,
        vehicle_id: &str,
    ) -> Result<Option<VehicleLatestState>, StoreError> {
        let row = sqlx::query("SELECT payload FROM fleet_latest_state WHERE vehicle_id = ?")
            .bind(vehicle_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => {
                let payload: String = row.try_get("payload").map_err(backend)?;
                Ok(Some(from_json(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn open_alerts(&self, vehicle_id: &str) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query(
            "SELECT payload FROM fleet_alerts
             WHERE vehicle_id = ? AND status = 'OPEN' ORDER BY updated_ts",
        )
        .bind(vehicle_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        payloads(rows)
    }

    async fn alerts(&self) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM fleet_alerts ORDER BY updated_ts")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        payloads(rows)
    }

    async fn telemetry_history(
        &self,
        vehicle_id: &str,
        limit: usize,
    ) -> Result<Vec<TelemetryPoint>, StoreError> {
        let rows = sqlx::query(
            "SELECT payload FROM fleet_telemetry
             WHERE vehicle_id = ? ORDER BY ts DESC LIMIT ?",
        )
        .bind(vehicle_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        payloads(rows)
    }

    async fn recent_events(
        &self,
        vehicle_id: &str,
        limit: usize,
    ) -> Result<Vec<FleetEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT payload FROM fleet_events
             WHERE vehicle_id = ? ORDER BY ts DESC LIMIT ?",
        )
        .bind(vehicle_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        payloads(rows)
    }

    async fn list_vehicles(
        &self,
        filter: &VehicleFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<VehiclePage, StoreError> {
        let mut sql = String::from("SELECT payload FROM fleet_vehicles WHERE 1 = 1");
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.depot.is_some() {
            sql.push_str(" AND depot = ?");
        }
        if filter.vehicle_type.is_some() {
            sql.push_str(" AND vehicle_type = ?");
        }
        if cursor.is_some() {
            sql.push_str(" AND id > ?");
        }
        sql.push_str(" ORDER BY id LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(ref depot) = filter.depot {
            query = query.bind(depot.as_str());
        }
        if let Some(vehicle_type) = filter.vehicle_type {
            query = query.bind(enum_str(&vehicle_type));
        }
        if let Some(cursor) = cursor {
            query = query.bind(cursor);
        }
        // One extra row tells us whether another page exists.
        query = query.bind(limit as i64 + 1);

        let rows = query.fetch_all(&self.pool).await.map_err(backend)?;
        let mut vehicles: Vec<Vehicle> = payloads(rows)?;
        let has_more = vehicles.len() > limit;
        vehicles.truncate(limit);
        let next_cursor = if has_more {
            vehicles.last().map(|v| v.id.clone())
        } else {
            None
        };
        Ok(VehiclePage {
            vehicles,
            next_cursor,
        })
    }

    async fn current_trip(&self, vehicle_id: &str) -> Result<Option<Trip>, StoreError> {
        let row = sqlx::query(
            "SELECT payload FROM fleet_trips
             WHERE vehicle_id = ? AND status = ? ORDER BY updated_ts DESC LIMIT 1",
        )
        .bind(vehicle_id)
        .bind(enum_str(&TripStatus::Active))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        match row {
            Some(row) => {
                let payload: String = row.try_get("payload").map_err(backend)?;
                Ok(Some(from_json(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn runtime_state(&self) -> Result<FleetRuntimeState, StoreError> {
        let row = sqlx::query("SELECT payload FROM fleet_runtime WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => {
                let payload: String = row.try_get("payload").map_err(backend)?;
                from_json(&payload)
            }
            None => Ok(FleetRuntimeState::default()),
        }
    }

    async fn set_runtime_state(&self, state: &FleetRuntimeState) -> Result<(), StoreError> {
        sqlx::query("REPLACE INTO fleet_runtime (id, payload) VALUES (1, ?)")
            .bind(to_json(state)?)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn upsert_scenario_run(&self, run: &ScenarioRun) -> Result<(), StoreError> {
        sqlx::query(
            "REPLACE INTO fleet_scenario_runs (id, status, updated_ts, payload)
             VALUES (?, ?, ?, ?)",
        )
        .bind(run.id.to_string())
        .bind(run.status.as_str())
        .bind(run.updated_ts)
        .bind(to_json(run)?)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn scenario_run(&self, id: Uuid) -> Result<Option<ScenarioRun>, StoreError> {
        let row = sqlx::query("SELECT payload FROM fleet_scenario_runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => {
                let payload: String = row.try_get("payload").map_err(backend)?;
                Ok(Some(from_json(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn upsert_heartbeat(&self, heartbeat: &EmitterHeartbeat) -> Result<(), StoreError> {
        sqlx::query("REPLACE INTO fleet_heartbeats (emitter_id, ts, payload) VALUES (?, ?, ?)")
            .bind(heartbeat.emitter_id.as_str())
            .bind(heartbeat.ts)
            .bind(to_json(heartbeat)?)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn heartbeats(&self) -> Result<Vec<EmitterHeartbeat>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM fleet_heartbeats ORDER BY emitter_id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        payloads(rows)
    }

    async fn vehicles_updated_since(&self, ts_ms: i64) -> Result<Vec<Vehicle>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM fleet_vehicles WHERE updated_ts >= ?")
            .bind(ts_ms)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        payloads(rows)
    }

    async fn drivers_updated_since(&self, ts_ms: i64) -> Result<Vec<Driver>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM fleet_drivers WHERE updated_ts >= ?")
            .bind(ts_ms)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        payloads(rows)
    }

    async fn trips_updated_since(&self, ts_ms: i64) -> Result<Vec<Trip>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM fleet_trips WHERE updated_ts >= ?")
            .bind(ts_ms)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        payloads(rows)
    }

    async fn work_orders_updated_since(&self, ts_ms: i64) -> Result<Vec<WorkOrder>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM fleet_work_orders WHERE updated_ts >= ?")
            .bind(ts_ms)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        payloads(rows)
    }

    async fn alerts_updated_since(&self, ts_ms: i64) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM fleet_alerts WHERE updated_ts >= ?")
            .bind(ts_ms)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        payloads(rows)
    }
}
