//! Client-side settings: member fetches, notifications, logging.

use serde::{Deserialize, Serialize};

/// Bulk member fetch settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemberSettings {
    /// How long a member request may wait for its chunks, in milliseconds.
    pub fetch_timeout_ms: u64,
}

impl Default for MemberSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 120_000,
        }
    }
}

/// Change notification settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    /// Capacity of the broadcast channel; slow subscribers lag beyond it.
    pub channel_capacity: usize,
    /// Event names for which no pre-patch snapshot is taken.
    pub disable_clones: Vec<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            disable_clones: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter directive.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
