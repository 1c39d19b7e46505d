//! Reconciliation scheduler configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the reconciliation scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Enable/disable the background scheduler.
    /// When disabled, reconciliation only runs when triggered explicitly.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often stalled PENDING flows are re-driven (seconds).
    #[serde(default = "default_exclusive_retry_interval")]
    pub exclusive_retry_interval_secs: u64,

    /// Local time of day at which data repair tickets are created.
    #[serde(default = "default_data_repair_hour")]
    pub data_repair_hour: u32,
    #[serde(default = "default_data_repair_minute")]
    pub data_repair_minute: u32,

    /// How far back checksum reports are considered (hours).
    #[serde(default = "default_data_repair_window")]
    pub data_repair_window_hours: u32,
}

fn default_true() -> bool {
    true
}

fn default_exclusive_retry_interval() -> u64 {
    300 // 5 minutes
}

fn default_data_repair_hour() -> u32 {
    2
}

fn default_data_repair_minute() -> u32 {
    30
}

fn default_data_repair_window() -> u32 {
    24
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exclusive_retry_interval_secs: default_exclusive_retry_interval(),
            data_repair_hour: default_data_repair_hour(),
            data_repair_minute: default_data_repair_minute(),
            data_repair_window_hours: default_data_repair_window(),
        }
    }
}
