//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`: field names
//! are camelCase on disk and missing fields take their [`Default`] value, so
//! partial JSON is always valid.

mod client;
mod connection;

pub use client::*;
pub use connection::*;

use guildsync_core::retry::BackoffConfig;
use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// # JSON Format
///
/// ```json
/// {
///   "token": "…",
///   "compression": "zlib-stream",
///   "members": { "fetchTimeoutMs": 60000 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Gateway WebSocket URL (without query string).
    pub gateway_url: String,
    /// Gateway protocol version.
    pub api_version: u8,
    /// Authentication token sent with identify/resume.
    pub token: String,
    /// Name of the compression codec to negotiate.
    pub compression: String,
    /// Member count above which the remote omits offline members.
    pub large_threshold: u32,
    /// Gateway intents bitfield.
    pub intents: u64,
    /// Properties sent with identify.
    pub identify: IdentifySettings,
    /// Heartbeat tolerance.
    pub heartbeat: HeartbeatSettings,
    /// Reconnect backoff.
    pub reconnect: BackoffConfig,
    /// Bulk member fetch settings.
    pub members: MemberSettings,
    /// Change notification settings.
    pub notifications: NotificationSettings,
    /// CDN base used for icon/splash URLs.
    pub cdn_url: String,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            gateway_url: "wss://gateway.discord.gg".to_string(),
            api_version: 10,
            token: String::new(),
            compression: "zlib-stream".to_string(),
            large_threshold: 250,
            intents: 0,
            identify: IdentifySettings::default(),
            heartbeat: HeartbeatSettings::default(),
            reconnect: BackoffConfig::default(),
            members: MemberSettings::default(),
            notifications: NotificationSettings::default(),
            cdn_url: "https://cdn.discordapp.com".to_string(),
            logging: LoggingSettings::default(),
        }
    }
}

impl GatewaySettings {
    /// URL to connect to, with version, encoding and (for transport-stream
    /// codecs) the compression parameter.
    pub fn connect_url(&self, stream_codec: Option<&str>) -> String {
        let base = self.gateway_url.trim_end_matches('/');
        let mut url = format!("{base}/?v={}&encoding=json", self.api_version);
        if let Some(codec) = stream_codec {
            url.push_str("&compress=");
            url.push_str(codec);
        }
        url
    }
}
