//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with [`RelaySettings::for_environment`] for the resolved environment
//! 2. If a settings file exists, deep-merge its values over the defaults
//! 3. Apply `RELAY_*` environment variable overrides
//!
//! The result is not validated. Callers layer their own overrides first and
//! then call [`RelaySettings::validate`].
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use relay_core::LogFormat;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{Environment, RelaySettings, TransportKind};

/// Variable naming the deployment environment.
pub const ENV_VAR: &str = "RELAY_ENV";

/// Resolve the environment from the process environment.
pub fn resolve_environment() -> Result<Environment> {
    resolve_environment_with(|k| std::env::var(k).ok())
}

/// Resolve the environment through `lookup`. Unset or empty means `local`.
pub fn resolve_environment_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Environment> {
    match lookup(ENV_VAR).filter(|v| !v.is_empty()) {
        Some(name) => name.parse(),
        None => Ok(Environment::Local),
    }
}

/// Load settings for `env` from an optional file, with process env overrides.
pub fn load_settings(env: Environment, path: Option<&Path>) -> Result<RelaySettings> {
    load_settings_with(env, path, |k| std::env::var(k).ok())
}

/// Load settings using `lookup` in place of the process environment.
///
/// A missing file yields environment defaults. Invalid JSON is an error.
/// The returned settings are unvalidated.
pub fn load_settings_with(
    env: Environment,
    path: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::for_environment(env))?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    settings.environment = env;
    apply_env_overrides(&mut settings, &lookup);
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
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `RELAY_*` overrides. Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut RelaySettings, lookup: &impl Fn(&str) -> Option<String>) {
    let env = EnvReader(lookup);

    if let Some(v) = env.string("RELAY_HOST") {
        settings.host = v;
    }
    if let Some(v) = env.parsed("RELAY_SOCKET_PORT", |s| parse_u16_range(s, 0, 65535)) {
        settings.socket.port = v;
    }
    if let Some(v) = env.parsed("RELAY_REST_PORT", |s| parse_u16_range(s, 0, 65535)) {
        settings.rest.port = v;
    }
    if let Some(v) = env.parsed("RELAY_TRANSPORT", TransportKind::parse) {
        settings.transport.kind = v;
    }
    if let Some(v) = env.string("RELAY_REDIS_URL") {
        settings.transport.redis_url = v;
    }
    if let Some(v) = env.string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("RELAY_LOG_FORMAT", LogFormat::parse) {
        settings.logging.format = v;
    }
    if let Some(v) = env.parsed("RELAY_MAX_CONNECTIONS", |s| {
        parse_usize_range(s, 1, 1_000_000)
    }) {
        settings.connection.max_connections = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}
