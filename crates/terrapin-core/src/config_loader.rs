//! Configuration loading from TOML and JSON.
//!
//! Files are first read into a generic JSON tree so that missing sections
//! can be reported with precise messages before the typed
//! [`OrmConfig`] is deserialized.
//!
//! ```rust,no_run
//! use terrapin_core::config_loader;
//!
//! let config = config_loader::from_toml_file("terrapin.toml").unwrap();
//! ```
//!
//! The `TERRAPIN_DB_URL` environment variable, when set, replaces the
//! `default` connection (see [`apply_env_overrides`]).

use std::path::Path;

use crate::config::{ConnectionConfig, OrmConfig};
use crate::error::{TerrapinError, TerrapinResult};

/// Environment variable overriding the `default` connection.
pub const DB_URL_ENV: &str = "TERRAPIN_DB_URL";

/// Loads configuration from a TOML string.
pub fn from_toml_str(toml_str: &str) -> TerrapinResult<OrmConfig> {
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| TerrapinError::configuration(format!("Failed to parse TOML: {e}")))?;
    from_json_value(toml_to_json(toml_value))
}

/// Loads configuration from a TOML file.
pub fn from_toml_file(path: impl AsRef<Path>) -> TerrapinResult<OrmConfig> {
    from_toml_str(&read(path.as_ref())?)
}

/// Loads configuration from a JSON string.
pub fn from_json_str(json_str: &str) -> TerrapinResult<OrmConfig> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| TerrapinError::configuration(format!("Failed to parse JSON: {e}")))?;
    from_json_value(json_value)
}

/// Loads configuration from a JSON file.
pub fn from_json_file(path: impl AsRef<Path>) -> TerrapinResult<OrmConfig> {
    from_json_str(&read(path.as_ref())?)
}

/// Builds an [`OrmConfig`] from an already-parsed JSON tree.
///
/// Fails with `Config must define "connections" section` or
/// `Config must define "apps" section` when either is absent.
pub fn from_json_value(value: serde_json::Value) -> TerrapinResult<OrmConfig> {
    // Accept configs nested under a top-level "terrapin" table.
    let value = match value {
        serde_json::Value::Object(mut map) if map.contains_key("terrapin") => map
            .remove("terrapin")
            .unwrap_or(serde_json::Value::Null),
        other => other,
    };
    let Some(object) = value.as_object() else {
        return Err(TerrapinError::configuration("Config must be a mapping"));
    };
    if !object.contains_key("connections") {
        return Err(TerrapinError::configuration(
            "Config must define \"connections\" section",
        ));
    }
    if !object.contains_key("apps") {
        return Err(TerrapinError::configuration(
            "Config must define \"apps\" section",
        ));
    }
    let config: OrmConfig = serde_json::from_value(value)
        .map_err(|e| TerrapinError::configuration(format!("Invalid config: {e}")))?;
    config.validate()?;
    Ok(config)
}

/// Applies environment variable overrides to a configuration.
pub fn apply_env_overrides(config: &mut OrmConfig) {
    if let Ok(url) = std::env::var(DB_URL_ENV) {
        tracing::debug!(env = DB_URL_ENV, "overriding default connection from environment");
        config
            .connections
            .insert("default".to_string(), ConnectionConfig::Url(url));
    }
}

fn read(path: &Path) -> TerrapinResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        TerrapinError::configuration(format!(
            "Failed to read config file '{}': {e}",
            path.display()
        ))
    })
}

fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => serde_json::Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}
