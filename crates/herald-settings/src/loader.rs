//! Layered settings: compiled defaults, then the user's JSON file, then
//! `HERALD_*` environment variables.
//!
//! Every layer is applied to the JSON form of the settings, so the file and
//! the environment obey the same merge rules and the same schema.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::HeraldSettings;

/// Environment variables and the settings key each one overrides.
const ENV_KEYS: &[(&str, &[&str])] = &[
    ("HERALD_HOST", &["server", "host"]),
    ("HERALD_PORT", &["server", "port"]),
    ("HERALD_MAX_RETRIES", &["reconnect", "maxRetries"]),
    ("HERALD_BASE_DELAY_MS", &["reconnect", "baseDelayMs"]),
    ("HERALD_MAX_DELAY_MS", &["reconnect", "maxDelayMs"]),
    ("HERALD_SEND_TIMEOUT_MS", &["gateway", "sendTimeoutMs"]),
    ("HERALD_DB_PATH", &["store", "dbPath"]),
    ("HERALD_ENCRYPT_CREDENTIALS", &["store", "encrypt"]),
    ("HERALD_BRIDGE_COMMAND", &["bridge", "command"]),
    ("HERALD_LOG_LEVEL", &["logging", "level"]),
    ("HERALD_LOG_JSON", &["logging", "json"]),
    ("HERALD_CONNECT_ON_START", &["connectOnStart"]),
];

/// Root directory for herald state (`~/.herald`).
pub fn herald_home() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
        .join(".herald")
}

pub fn settings_path() -> PathBuf {
    herald_home().join("settings.json")
}

/// Absolute paths pass through; relative ones land under [`herald_home`].
pub fn resolve_path(raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        herald_home().join(path)
    }
}

pub fn load_settings() -> Result<HeraldSettings> {
    load_settings_from_path(&settings_path())
}

/// A missing file yields defaults; unreadable or malformed files are errors.
pub fn load_settings_from_path(path: &Path) -> Result<HeraldSettings> {
    load_layered(path, |key| std::env::var(key).ok())
}

fn load_layered(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<HeraldSettings> {
    let mut merged = serde_json::to_value(HeraldSettings::default())
        .map_err(|e| SettingsError::InvalidValue(e.to_string()))?;

    match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!(path = %path.display(), "applying settings file");
            let user: Value = serde_json::from_str(&content).map_err(|source| {
                SettingsError::Parse {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            merge_into(&mut merged, user);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    apply_env(&mut merged, env);

    let settings: HeraldSettings =
        serde_json::from_value(merged).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    settings.validate()?;
    Ok(settings)
}

/// Merge `overlay` into `base`. Objects merge per key, anything else
/// replaces, and `null` leaves the base value alone.
pub fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                if value.is_null() {
                    continue;
                }
                match base.get_mut(&key) {
                    Some(slot) => merge_into(slot, value),
                    None => {
                        let _ = base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply each set variable on its own. A value that does not fit the
/// settings schema (wrong type, out of range) is skipped with a warning.
fn apply_env(merged: &mut Value, env: impl Fn(&str) -> Option<String>) {
    for &(name, key) in ENV_KEYS {
        let Some(raw) = env(name).filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        let Some(current) = lookup(merged, key) else {
            continue;
        };
        let Some(value) = coerce(raw.trim(), current) else {
            warn!(var = name, value = %raw, "ignoring malformed environment override");
            continue;
        };

        let mut candidate = merged.clone();
        merge_into(&mut candidate, nest(key, value));
        if serde_json::from_value::<HeraldSettings>(candidate.clone()).is_ok() {
            debug!(var = name, "environment override applied");
            *merged = candidate;
        } else {
            warn!(var = name, value = %raw, "ignoring out-of-range environment override");
        }
    }
}

fn lookup<'a>(root: &'a Value, key: &[&str]) -> Option<&'a Value> {
    key.iter().try_fold(root, |node, part| node.get(part))
}

fn nest(key: &[&str], leaf: Value) -> Value {
    key.iter().rev().fold(leaf, |inner, part| {
        let mut map = Map::new();
        let _ = map.insert((*part).to_string(), inner);
        Value::Object(map)
    })
}

/// Interpret a raw variable like the value it replaces.
fn coerce(raw: &str, like: &Value) -> Option<Value> {
    match like {
        Value::Bool(_) => parse_flag(raw).map(Value::Bool),
        Value::Number(_) => raw.parse::<u64>().ok().map(Value::from),
        _ => Some(Value::String(raw.to_string())),
    }
}

/// `true`/`1`/`yes`/`on` and their negatives, any case.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
