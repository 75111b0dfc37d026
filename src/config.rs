use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::limits::*;
use crate::model::Min;

/// Process-level settings, read from `SLOTWISE_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub compact_threshold: u64,
    pub booking_timeout: Duration,
    pub default_step_minutes: Min,
    pub max_businesses: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            booking_timeout: DEFAULT_BOOKING_TIMEOUT,
            default_step_minutes: DEFAULT_STEP_MINUTES,
            max_businesses: MAX_BUSINESSES,
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            warn!("ignoring invalid {key}={raw:?}, using default");
            default
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Unset keys take their default;
    /// unparsable or out-of-range values are logged and replaced by it.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let data_dir = lookup("SLOTWISE_DATA_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let compact_threshold = parse_or(
            &lookup,
            "SLOTWISE_COMPACT_THRESHOLD",
            defaults.compact_threshold,
            |v| *v > 0,
        );
        let timeout_ms = parse_or(
            &lookup,
            "SLOTWISE_BOOKING_TIMEOUT_MS",
            defaults.booking_timeout.as_millis() as u64,
            |v| *v > 0,
        );
        let default_step_minutes = parse_or(
            &lookup,
            "SLOTWISE_DEFAULT_STEP_MINUTES",
            defaults.default_step_minutes,
            |v| *v > 0 && *v <= MAX_SLOT_MINUTES,
        );
        let max_businesses = parse_or(
            &lookup,
            "SLOTWISE_MAX_BUSINESSES",
            defaults.max_businesses,
            |v| *v > 0,
        );
        Self {
            data_dir,
            compact_threshold,
            booking_timeout: Duration::from_millis(timeout_ms),
            default_step_minutes,
            max_businesses,
        }
    }
}
