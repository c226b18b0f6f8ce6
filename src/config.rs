use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Application-level constants
pub const APP_NAME: &str = "Pillbox";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Longest range a single expand command may cover.
pub const MAX_EXPAND_DAYS: u32 = 366;

/// Ledger database file name inside the app data directory.
pub const LEDGER_DB_FILE: &str = "ledger.db";

/// Get the application data directory
/// ~/Pillbox/ on all platforms, falling back to the working directory
/// when no home directory can be determined.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

pub fn ledger_db_path() -> PathBuf {
    app_data_dir().join(LEDGER_DB_FILE)
}

/// Log filter used when neither `PILLBOX_LOG` nor `RUST_LOG` is set.
pub fn default_log_filter() -> String {
    std::env::var("PILLBOX_LOG").unwrap_or_else(|_| "info,pillbox=debug".to_string())
}

/// How days with no ledger rows are judged by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyDayPolicy {
    /// Past empty days are incomplete only if some medication applied that day.
    RequireApplicableMedication,
    /// Every past empty day is incomplete (older clients' behaviour).
    FlagAllPastDays,
}

/// Tunables for one tracker instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Ledger rows older than this many days are eligible for retention cleanup.
    pub retention_days: u32,
    /// Taken within this many minutes of the planned time counts as on time.
    pub on_time_window_minutes: u32,
    /// Default export window for sync uploads.
    pub sync_window_days: u32,
    pub empty_day_policy: EmptyDayPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retention_days: 90,
            on_time_window_minutes: 30,
            sync_window_days: 30,
            empty_day_policy: EmptyDayPolicy::RequireApplicableMedication,
        }
    }
}

impl TrackerConfig {
    /// Defaults overridden by `PILLBOX_*` environment variables. Unparseable
    /// values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(days) = env_number("PILLBOX_RETENTION_DAYS") {
            config.retention_days = days;
        }
        if let Some(minutes) = env_number("PILLBOX_ON_TIME_MINUTES") {
            config.on_time_window_minutes = minutes;
        }
        if let Some(days) = env_number("PILLBOX_SYNC_WINDOW_DAYS") {
            config.sync_window_days = days;
        }
        if let Ok(policy) = std::env::var("PILLBOX_EMPTY_DAY_POLICY") {
            match policy.trim() {
                "require_applicable_medication" => {
                    config.empty_day_policy = EmptyDayPolicy::RequireApplicableMedication
                }
                "flag_all_past_days" => config.empty_day_policy = EmptyDayPolicy::FlagAllPastDays,
                other => tracing::warn!(value = other, "Unknown PILLBOX_EMPTY_DAY_POLICY, keeping default"),
            }
        }
        config
    }

    pub fn on_time_window(&self) -> Duration {
        Duration::minutes(self.on_time_window_minutes as i64)
    }
}

fn env_number(name: &str) -> Option<u32> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u32>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring non-numeric setting");
            None
        }
    }
}
