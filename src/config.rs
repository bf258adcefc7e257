use std::env;

use crate::error::DispatchError;
use crate::geo::GeoPoint;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub dispatch: DispatchConfig,
}

/// Scheduling knobs. The reference values live here instead of scattered
/// module constants so one coordinator instance carries one consistent set.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Candidate windows start and end on this grid, in minutes.
    pub slot_grid_minutes: i64,
    /// Mandatory idle time before and after any booked slot.
    pub buffer_minutes: i64,
    /// Required durations are rounded up to this granularity before
    /// windows are built.
    pub duration_granularity_minutes: i64,
    /// Flat speed assumption for the travel-time heuristic.
    pub avg_speed_kmh: f64,
    /// Distances within one bucket are treated as equal when ranking.
    pub distance_bucket_km: f64,
    /// Default travel origin when a driver has no prior same-day drop-off.
    pub depot: GeoPoint,
    /// Upper bound on waiting for a driver's schedule lock during commit.
    pub lock_timeout_ms: u64,
    /// Whether `delivered -> arrived_at_pickup` is allowed as a correction.
    pub allow_delivered_correction: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            slot_grid_minutes: 30,
            buffer_minutes: 10,
            duration_granularity_minutes: 10,
            avg_speed_kmh: 40.0,
            distance_bucket_km: 5.0,
            depot: GeoPoint {
                lat: 52.52,
                lng: 13.405,
            },
            lock_timeout_ms: 2_000,
            allow_delivered_correction: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, DispatchError> {
        let _ = dotenvy::dotenv();

        let defaults = DispatchConfig::default();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            dispatch: DispatchConfig {
                slot_grid_minutes: parse_or_default(
                    "SLOT_GRID_MINUTES",
                    defaults.slot_grid_minutes,
                )?,
                buffer_minutes: parse_or_default("BUFFER_MINUTES", defaults.buffer_minutes)?,
                duration_granularity_minutes: parse_or_default(
                    "DURATION_GRANULARITY_MINUTES",
                    defaults.duration_granularity_minutes,
                )?,
                avg_speed_kmh: parse_or_default("AVG_SPEED_KMH", defaults.avg_speed_kmh)?,
                distance_bucket_km: parse_or_default(
                    "DISTANCE_BUCKET_KM",
                    defaults.distance_bucket_km,
                )?,
                depot: GeoPoint {
                    lat: parse_or_default("DEPOT_LAT", defaults.depot.lat)?,
                    lng: parse_or_default("DEPOT_LNG", defaults.depot.lng)?,
                },
                lock_timeout_ms: parse_or_default("LOCK_TIMEOUT_MS", defaults.lock_timeout_ms)?,
                allow_delivered_correction: parse_or_default(
                    "ALLOW_DELIVERED_CORRECTION",
                    defaults.allow_delivered_correction,
                )?,
            },
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, DispatchError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| DispatchError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
