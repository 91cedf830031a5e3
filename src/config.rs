use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::limits::DEFAULT_MAX_STAY_NIGHTS;

/// Business rules applied by the search and booking services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPolicy {
    /// Owners may book their own listing (e.g. to block dates).
    pub allow_self_booking: bool,
    /// Ranges starting before today are invalid.
    pub reject_past_dates: bool,
    pub max_stay_nights: u32,
    /// Upper bound on every store call made on behalf of a request.
    pub store_timeout: Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            allow_self_booking: false,
            reject_past_dates: true,
            max_stay_nights: DEFAULT_MAX_STAY_NIGHTS,
            store_timeout: Duration::from_secs(5),
        }
    }
}

impl BookingPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            allow_self_booking: env_bool("ROOST_ALLOW_SELF_BOOKING", defaults.allow_self_booking),
            reject_past_dates: env_bool("ROOST_REJECT_PAST_DATES", defaults.reject_past_dates),
            max_stay_nights: env_or("ROOST_MAX_STAY_NIGHTS", defaults.max_stay_nights),
            store_timeout: std::env::var("ROOST_STORE_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
        }
    }
}

/// Process-level settings, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub policy: BookingPolicy,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind: std::env::var("ROOST_BIND").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("ROOST_PORT", 7070),
            data_dir: PathBuf::from(
                std::env::var("ROOST_DATA_DIR").unwrap_or_else(|_| "./data".into()),
            ),
            max_connections: env_or("ROOST_MAX_CONNECTIONS", 256),
            compact_threshold: env_or("ROOST_COMPACT_THRESHOLD", 1000),
            metrics_port: std::env::var("ROOST_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            policy: BookingPolicy::from_env(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roost.wal")
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => parse_bool(&v).unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
