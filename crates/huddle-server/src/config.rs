//! Server configuration and loading.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If a config file is given and exists, deep-merge its JSON over defaults
//! 3. Apply `HUDDLE_*` environment variable overrides (highest priority)
//!
//! Command-line flags are applied on top by the binary.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file from disk.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse the config file.
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for the huddle server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `8000`, `0` for auto-assign).
    pub port: u16,
    /// Outbound queue depth per participant before it counts as a slow consumer.
    pub send_queue_capacity: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a session after this many seconds without hearing from the peer.
    pub heartbeat_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Clock demo tick in milliseconds.
    pub clock_interval_ms: u64,
    /// How long shutdown waits for sessions to finish.
    pub shutdown_timeout_secs: u64,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit JSON log lines instead of compact text.
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            send_queue_capacity: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 60,
            max_message_size: 64 * 1024,
            clock_interval_ms: 1000,
            shutdown_timeout_secs: 10,
            log_level: "info".into(),
            log_json: false,
        }
    }
}

/// Load configuration from an optional file plus environment overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let defaults = serde_json::to_value(ServerConfig::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading config from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "config file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut config: ServerConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply `HUDDLE_*` overrides read through `lookup`.
///
/// Numbers must parse and fall within range; invalid values are logged and
/// ignored.
pub fn apply_env_overrides(config: &mut ServerConfig, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let ranged = |name: &str, min: u64, max: u64| {
        let val = lookup(name)?;
        let parsed = parse_u64_range(&val, min, max);
        if parsed.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        parsed
    };

    if let Some(v) = string("HUDDLE_HOST") {
        config.host = v;
    }
    if let Some(v) = ranged("HUDDLE_PORT", 0, u64::from(u16::MAX)) {
        config.port = v as u16;
    }
    if let Some(v) = ranged("HUDDLE_SEND_QUEUE", 1, 65_536) {
        config.send_queue_capacity = v as usize;
    }
    if let Some(v) = ranged("HUDDLE_HEARTBEAT_INTERVAL", 1, 3600) {
        config.heartbeat_interval_secs = v;
    }
    if let Some(v) = ranged("HUDDLE_HEARTBEAT_TIMEOUT", 1, 86_400) {
        config.heartbeat_timeout_secs = v;
    }
    if let Some(v) = ranged("HUDDLE_MAX_MESSAGE_SIZE", 1024, 16 * 1024 * 1024) {
        config.max_message_size = v as usize;
    }
    if let Some(v) = ranged("HUDDLE_CLOCK_INTERVAL_MS", 10, 3_600_000) {
        config.clock_interval_ms = v;
    }
    if let Some(v) = ranged("HUDDLE_SHUTDOWN_TIMEOUT", 1, 3600) {
        config.shutdown_timeout_secs = v;
    }
    if let Some(v) = string("HUDDLE_LOG_LEVEL") {
        config.log_level = v;
    }
    if let Some(v) = lookup("HUDDLE_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => config.log_json = b,
            None => warn!(key = "HUDDLE_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.send_queue_capacity, 256);
        assert_eq!(cfg.heartbeat_interval_secs, 30);
        assert_eq!(cfg.heartbeat_timeout_secs, 60);
        assert!(!cfg.log_json);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"port":9000}"#).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.host, "127.0.0.1");
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_skips_nulls() {
        let merged = deep_merge(
            serde_json::json!({"a": 1, "b": 2}),
            serde_json::json!({"a": null, "b": 3}),
        );
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 3);
    }

    #[test]
    fn merge_replaces_arrays() {
        let merged = deep_merge(serde_json::json!({"a": [1, 2]}), serde_json::json!({"a": [3]}));
        assert_eq!(merged["a"], serde_json::json!([3]));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"host":"0.0.0.0","send_queue_capacity":16}}"#).unwrap();
        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.send_queue_capacity, 16);
        assert_eq!(cfg.clock_interval_ms, 1000);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(cfg.send_queue_capacity, ServerConfig::default().send_queue_capacity);
    }

    #[test]
    fn invalid_json_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = ServerConfig::default();
        apply_env_overrides(
            &mut cfg,
            env(&[
                ("HUDDLE_HOST", "10.0.0.1"),
                ("HUDDLE_PORT", "9100"),
                ("HUDDLE_SEND_QUEUE", "8"),
                ("HUDDLE_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(cfg.host, "10.0.0.1");
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.send_queue_capacity, 8);
        assert!(cfg.log_json);
    }

    #[test]
    fn env_overrides_timing_fields() {
        let mut cfg = ServerConfig::default();
        apply_env_overrides(
            &mut cfg,
            env(&[
                ("HUDDLE_CLOCK_INTERVAL_MS", "250"),
                ("HUDDLE_SHUTDOWN_TIMEOUT", "3"),
            ]),
        );
        assert_eq!(cfg.clock_interval_ms, 250);
        assert_eq!(cfg.shutdown_timeout_secs, 3);

        let mut cfg = ServerConfig::default();
        apply_env_overrides(
            &mut cfg,
            env(&[
                ("HUDDLE_CLOCK_INTERVAL_MS", "5"),
                ("HUDDLE_SHUTDOWN_TIMEOUT", "0"),
            ]),
        );
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut cfg = ServerConfig::default();
        apply_env_overrides(
            &mut cfg,
            env(&[
                ("HUDDLE_PORT", "99999"),
                ("HUDDLE_SEND_QUEUE", "0"),
                ("HUDDLE_HOST", ""),
                ("HUDDLE_LOG_JSON", "maybe"),
            ]),
        );
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }

    #[test]
    fn parse_range_bounds() {
        assert_eq!(parse_u64_range("5", 1, 10), Some(5));
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("-1", 1, 10), None);
        assert_eq!(parse_u64_range(" 7 ", 1, 10), Some(7));
    }
}
