//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. If `~/.guildsync/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `GUILDSYNC_*` environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::GatewaySettings;

/// Resolve the path to the settings file (`~/.guildsync/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".guildsync").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GatewaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: GatewaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject settings the session cannot run with.
pub fn validate(settings: &GatewaySettings) -> Result<()> {
    if !(settings.gateway_url.starts_with("ws://") || settings.gateway_url.starts_with("wss://")) {
        return Err(SettingsError::InvalidValue(format!(
            "gatewayUrl must use ws:// or wss://, got {}",
            settings.gateway_url
        )));
    }
    if settings.heartbeat.missed_acks_before_reconnect == 0 {
        return Err(SettingsError::InvalidValue(
            "heartbeat.missedAcksBeforeReconnect must be at least 1".into(),
        ));
    }
    if settings.notifications.channel_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "notifications.channelCapacity must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (falling back to file/default).
pub fn apply_env_overrides(settings: &mut GatewaySettings) {
    if let Some(v) = read_env_string("GUILDSYNC_TOKEN") {
        settings.token = v;
    }
    if let Some(v) = read_env_string("GUILDSYNC_GATEWAY_URL") {
        settings.gateway_url = v;
    }
    if let Some(v) = read_env_string("GUILDSYNC_COMPRESSION") {
        settings.compression = v;
    }
    if let Some(v) = read_env_u64("GUILDSYNC_LARGE_THRESHOLD", 50, 250) {
        #[allow(clippy::cast_possible_truncation)]
        {
            settings.large_threshold = v as u32;
        }
    }
    if let Some(v) = read_env_u64("GUILDSYNC_MEMBER_FETCH_TIMEOUT_MS", 1000, 3_600_000) {
        settings.members.fetch_timeout_ms = v;
    }
    if let Some(v) = read_env_string("GUILDSYNC_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_simple_override() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"b": 3});
        let merged = deep_merge(target, source);
        assert_eq!(merged, serde_json::json!({"a": 1, "b": 3}));
    }

    #[test]
    fn merge_nested_objects() {
        let target = serde_json::json!({"members": {"fetchTimeoutMs": 1, "x": 2}});
        let source = serde_json::json!({"members": {"fetchTimeoutMs": 5}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["members"]["fetchTimeoutMs"], 5);
        assert_eq!(merged["members"]["x"], 2);
    }

    #[test]
    fn merge_skips_null() {
        let target = serde_json::json!({"token": "keep"});
        let source = serde_json::json!({"token": null});
        assert_eq!(deep_merge(target, source)["token"], "keep");
    }

    #[test]
    fn merge_replaces_arrays() {
        let target = serde_json::json!({"list": [1, 2, 3]});
        let source = serde_json::json!({"list": [9]});
        assert_eq!(deep_merge(target, source)["list"], serde_json::json!([9]));
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("50", 50, 250), Some(50));
        assert_eq!(parse_u64_range("250", 50, 250), Some(250));
        assert_eq!(parse_u64_range("49", 50, 250), None);
        assert_eq!(parse_u64_range("abc", 50, 250), None);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.api_version, 10);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"compression": "none", "notifications": {{"disableClones": ["USER_UPDATE"]}}}}"#
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.compression, "none");
        assert_eq!(settings.notifications.disable_clones, vec!["USER_UPDATE"]);
        assert_eq!(settings.notifications.channel_capacity, 1024);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn invalid_url_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"gatewayUrl": "https://example.com"}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn zero_heartbeat_tolerance_rejected() {
        let mut settings = GatewaySettings::default();
        settings.heartbeat.missed_acks_before_reconnect = 0;
        assert!(validate(&settings).is_err());
    }
}
