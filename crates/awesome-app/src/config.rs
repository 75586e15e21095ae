//! Layered application configuration.
//!
//! Built-in defaults are deep-merged with an optional JSON override file named
//! by `AWESOME_CONFIG`. Only keys present in the defaults can be overridden.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use awesome_db::PoolConfig;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info};

pub const CONFIG_ENV: &str = "AWESOME_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub debug: bool,
    pub db: PoolConfig,
}

pub fn defaults() -> Value {
    json!({
        "debug": true,
        "db": {
            "backend": "sqlite",
            "host": "127.0.0.1",
            "port": 3306,
            "user": "www-data",
            "password": "www-data",
            "db": "awesome.db",
        },
    })
}

/// Overlays `override_` onto `defaults`. Nested objects merge key by key; any
/// other override value replaces the default outright. Keys absent from
/// `defaults` are dropped.
pub fn merge(defaults: &Value, override_: &Value) -> Value {
    let (Value::Object(base), Value::Object(over)) = (defaults, override_) else {
        return override_.clone();
    };
    let merged: Map<String, Value> = base
        .iter()
        .map(|(key, value)| {
            let value = match over.get(key) {
                Some(replacement) if value.is_object() => merge(value, replacement),
                Some(replacement) => replacement.clone(),
                None => value.clone(),
            };
            (key.clone(), value)
        })
        .collect();
    Value::Object(merged)
}

impl AppConfig {
    /// Defaults, merged with the file named by `AWESOME_CONFIG` when set.
    pub fn load() -> Result<Self, ConfigError> {
        match env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Self::from_value(&defaults()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let override_: Value = serde_json::from_slice(&raw)?;
        info!("loaded config override from {}", path.display());
        Self::from_value(&merge(&defaults(), &override_))
    }

    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_value(value.clone())?;
        debug!("config: debug={} db={:?}", config.debug, config.db);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use awesome_db::Backend;

    use super::*;

    #[test]
    fn defaults_deserialize() {
        let config = AppConfig::from_value(&defaults()).expect("config");
        assert!(config.debug);
        assert_eq!(config.db.backend, Backend::Sqlite);
        assert_eq!(config.db.db, "awesome.db");
        assert_eq!(config.db.max_size, 10);
    }

    #[test]
    fn merge_overrides_nested_keys_only() {
        let merged = merge(
            &defaults(),
            &json!({"db": {"host": "db.internal", "extra": 1}, "unknown": true}),
        );
        assert_eq!(merged["db"]["host"], "db.internal");
        assert_eq!(merged["db"]["user"], "www-data");
        assert!(merged["db"].get("extra").is_none());
        assert!(merged.get("unknown").is_none());
    }

    #[test]
    fn override_file_is_applied() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, r#"{{"debug": false, "db": {{"db": "blog.db"}}}}"#).expect("write");
        let config = AppConfig::from_file(file.path()).expect("config");
        assert!(!config.debug);
        assert_eq!(config.db.db, "blog.db");
    }

    #[test]
    fn stale_session_section_is_ignored() {
        let merged = merge(&defaults(), &json!({"session": {"secret": "old"}}));
        assert!(merged.get("session").is_none());
        AppConfig::from_value(&merged).expect("config");
    }

    #[test]
    fn missing_file_reports_path() {
        let err = AppConfig::from_file(Path::new("/nonexistent/awesome.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/awesome.json"));
    }
}
