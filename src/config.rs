//! Configuration for the fleet sync engine.
//!
//! # Example
//!
//! ```
//! use fleetsync::FleetSyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = FleetSyncConfig::default();
//! assert_eq!(config.overspeed_limit_kph, 100.0);
//!
//! // Full config
//! let config = FleetSyncConfig {
//!     sql_url: Some("sqlite:fleet.db".into()),
//!     redis_url: Some("redis://localhost:6379".into()),
//!     graph_sync_interval_secs: 300,
//!     alert_clear_points: 5,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;

/// Configuration for the fleet sync engine.
///
/// All fields have sensible defaults; rule thresholds are configuration, not
/// core logic. At minimum, configure `sql_url` and `redis_url` for production
/// use - without them the engine runs on in-memory backends.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetSyncConfig {
    /// Primary store connection string (e.g. "sqlite:fleet.db" or "mysql://...")
    #[serde(default)]
    pub sql_url: Option<String>,

    /// Secondary graph store connection string (e.g. "redis://localhost:6379")
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Speed above which an OVERSPEED event fires (km/h)
    #[serde(default = "default_overspeed_limit_kph")]
    pub overspeed_limit_kph: f64,

    /// Deceleration between consecutive points that counts as a harsh brake (km/h per second)
    #[serde(default = "default_harsh_brake_decel")]
    pub harsh_brake_decel_kph_s: f64,

    /// Plausible fuel burn per km driven (% of tank)
    #[serde(default = "default_fuel_pct_per_km")]
    pub fuel_pct_per_km: f64,

    /// Minimum fuel drop between consecutive points worth flagging (%)
    #[serde(default = "default_fuel_drop_min_pct")]
    pub fuel_drop_min_pct: f64,

    /// Odometer service interval (km)
    #[serde(default = "default_maintenance_interval_km")]
    pub maintenance_interval_km: f64,

    /// Consecutive clear telemetry points before an alert auto-closes
    #[serde(default = "default_alert_clear_points")]
    pub alert_clear_points: u32,

    /// Live-mode acceptance window: reject points this far in the future (ms)
    #[serde(default = "default_live_ts_window_ms")]
    pub live_ts_window_ms: i64,

    /// Physically plausible speed ceiling for validation (km/h)
    #[serde(default = "default_max_plausible_speed_kph")]
    pub max_plausible_speed_kph: f64,

    /// Telemetry buffer length returned by the vehicle-detail query
    #[serde(default = "default_telemetry_buffer_len")]
    pub telemetry_buffer_len: usize,

    /// Recent-event buffer length returned by the vehicle-detail query
    #[serde(default = "default_event_buffer_len")]
    pub event_buffer_len: usize,

    /// Graph delta sync interval (seconds)
    #[serde(default = "default_graph_sync_interval_secs")]
    pub graph_sync_interval_secs: u64,

    /// Extra lookback margin on top of the sync interval, to tolerate clock
    /// skew and overlapping cycles (seconds)
    #[serde(default = "default_graph_sync_margin_secs")]
    pub graph_sync_margin_secs: u64,

    /// Per-observer fan-out queue depth
    #[serde(default = "default_fanout_queue_depth")]
    pub fanout_queue_depth: usize,

    /// Emitter heartbeat staleness before a replica is considered offline (ms)
    #[serde(default = "default_heartbeat_offline_ms")]
    pub heartbeat_offline_ms: i64,

    /// Simulated clock tick size for replay mode (ms)
    #[serde(default = "default_sim_tick_ms")]
    pub sim_tick_ms: i64,
}

fn default_overspeed_limit_kph() -> f64 { 100.0 }
fn default_harsh_brake_decel() -> f64 { 25.0 }
fn default_fuel_pct_per_km() -> f64 { 0.35 }
fn default_fuel_drop_min_pct() -> f64 { 5.0 }
fn default_maintenance_interval_km() -> f64 { 15_000.0 }
fn default_alert_clear_points() -> u32 { 3 }
fn default_live_ts_window_ms() -> i64 { 120_000 } // 2 minutes
fn default_max_plausible_speed_kph() -> f64 { 200.0 }
fn default_telemetry_buffer_len() -> usize { 50 }
fn default_event_buffer_len() -> usize { 20 }
fn default_graph_sync_interval_secs() -> u64 { 300 } // 5 minutes
fn default_graph_sync_margin_secs() -> u64 { 120 } // 7-minute lookback total
fn default_fanout_queue_depth() -> usize { 256 }
fn default_heartbeat_offline_ms() -> i64 { 60_000 }
fn default_sim_tick_ms() -> i64 { 1_000 }

impl Default for FleetSyncConfig {
    fn default() -> Self {
        Self {
            sql_url: None,
            redis_url: None,
            overspeed_limit_kph: default_overspeed_limit_kph(),
            harsh_brake_decel_kph_s: default_harsh_brake_decel(),
            fuel_pct_per_km: default_fuel_pct_per_km(),
            fuel_drop_min_pct: default_fuel_drop_min_pct(),
            maintenance_interval_km: default_maintenance_interval_km(),
            alert_clear_points: default_alert_clear_points(),
            live_ts_window_ms: default_live_ts_window_ms(),
            max_plausible_speed_kph: default_max_plausible_speed_kph(),
            telemetry_buffer_len: default_telemetry_buffer_len(),
            event_buffer_len: default_event_buffer_len(),
            graph_sync_interval_secs: default_graph_sync_interval_secs(),
            graph_sync_margin_secs: default_graph_sync_margin_secs(),
            fanout_queue_depth: default_fanout_queue_depth(),
            heartbeat_offline_ms: default_heartbeat_offline_ms(),
            sim_tick_ms: default_sim_tick_ms(),
        }
    }
}

impl FleetSyncConfig {
    /// Delta sync trailing lookback window in milliseconds.
    ///
    /// At least as wide as the sync interval plus the safety margin.
    #[must_use]
    pub fn graph_lookback_ms(&self) -> i64 {
        ((self.graph_sync_interval_secs + self.graph_sync_margin_secs) * 1_000) as i64
    }
}
