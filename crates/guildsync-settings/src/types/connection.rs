//! Connection-level settings: identify properties and heartbeat tolerance.

use serde::{Deserialize, Serialize};

/// Connection properties sent with identify.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentifySettings {
    /// Operating system.
    pub os: String,
    /// Library name.
    pub browser: String,
    /// Device name.
    pub device: String,
}

impl Default for IdentifySettings {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: guildsync_core::constants::NAME.to_string(),
            device: guildsync_core::constants::NAME.to_string(),
        }
    }
}

/// Heartbeat tolerance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Consecutive unacknowledged heartbeats before forcing a reconnect.
    /// The first miss only degrades the session.
    pub missed_acks_before_reconnect: u32,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            missed_acks_before_reconnect: 2,
        }
    }
}
