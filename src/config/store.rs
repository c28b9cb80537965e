use serde_json::{Map, Value};
use std::path::Path;
use tracing::warn;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Top-level spellings accepted besides the schema's own field names
const LEGACY_KEYS: &[&str] = &["authUrl", "dbUrl"];

/// Load the program configuration from a JSON file
///
/// A missing or unparsable file is a startup error: nothing is touched
/// before the configuration is known to be usable.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Err(AppError::Config(format!(
            "config file {} does not exist",
            path.display()
        )));
    }

    let text = std::fs::read_to_string(path)?;
    let raw: Value = serde_json::from_str(&text)
        .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;

    for key in unknown_keys(&raw) {
        warn!("Ignoring unknown config key '{}' in {}", key, path.display());
    }

    let config: AppConfig = serde_json::from_value(raw)
        .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;

    validate(&config)?;
    Ok(config)
}

/// Dotted paths of keys the schema does not know, e.g. `ledger.ttl`
fn unknown_keys(raw: &Value) -> Vec<String> {
    let known = match serde_json::to_value(AppConfig::default()) {
        Ok(Value::Object(known)) => known,
        _ => return Vec::new(),
    };
    let mut unknown = Vec::new();
    if let Value::Object(raw) = raw {
        for (key, value) in raw {
            match known.get(key) {
                Some(Value::Object(section)) => collect_unknown(value, section, key, &mut unknown),
                Some(_) => {}
                None if LEGACY_KEYS.contains(&key.as_str()) => {}
                None => unknown.push(key.clone()),
            }
        }
    }
    unknown
}

fn collect_unknown(raw: &Value, known: &Map<String, Value>, prefix: &str, out: &mut Vec<String>) {
    let Value::Object(raw) = raw else {
        return;
    };
    for key in raw.keys() {
        if !known.contains_key(key) {
            out.push(format!("{}.{}", prefix, key));
        }
    }
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.remote.db_url.trim().is_empty() {
        return Err(AppError::Config("db_url must be set".to_string()));
    }
    if config.volume.lock_max_attempts == 0 {
        return Err(AppError::Config(
            "lock_max_attempts must be greater than 0".to_string(),
        ));
    }
    Ok(())
}
