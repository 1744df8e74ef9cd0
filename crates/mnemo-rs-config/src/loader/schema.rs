//! Schema validation helpers for memory manager JSON5 configuration.

use crate::{ConfigError, MemoryDomain};
use serde_json::{Map, Value};

/// Validate a single config layer against the schema.
pub(super) fn validate_layer_schema(value: &Value, layer: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, "")?;
    let mut allowed = vec!["$schema", "health"];
    allowed.extend(MemoryDomain::ALL.iter().map(|domain| domain.as_str()));
    ensure_allowed_keys(map, &allowed, layer, "")?;

    if let Some(value) = map.get("$schema") {
        expect_string(value, layer, "$schema")?;
    }
    for domain in MemoryDomain::ALL {
        if let Some(value) = map.get(domain.as_str()) {
            validate_provider(value, layer, domain.as_str())?;
        }
    }
    if let Some(value) = map.get("health") {
        validate_health(value, layer, "health")?;
    }
    Ok(())
}

/// Validate a domain provider block.
fn validate_provider(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    if let Some(value) = map.get("provider") {
        let provider = expect_string(value, layer, &join_path(path, "provider"))?;
        if provider.trim().is_empty() {
            return Err(invalid(
                layer,
                &join_path(path, "provider"),
                "must not be empty",
            ));
        }
    }
    for (key, value) in map {
        if matches!(value, Value::Object(_)) {
            return Err(invalid(
                layer,
                &join_path(path, key),
                "backend parameters must be scalars or arrays",
            ));
        }
    }
    Ok(())
}

/// Validate the "health" block.
fn validate_health(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["interval_ms"], layer, path)?;
    if let Some(value) = map.get("interval_ms") {
        if !value.is_null() {
            expect_u64(value, layer, &join_path(path, "interval_ms"))?;
        }
    }
    Ok(())
}

fn expect_object<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    value
        .as_object()
        .ok_or_else(|| invalid(layer, path, "expected object"))
}

fn expect_string<'a>(value: &'a Value, layer: &str, path: &str) -> Result<&'a str, ConfigError> {
    value
        .as_str()
        .ok_or_else(|| invalid(layer, path, "expected string"))
}

fn expect_u64(value: &Value, layer: &str, path: &str) -> Result<u64, ConfigError> {
    value
        .as_u64()
        .ok_or_else(|| invalid(layer, path, "expected non-negative integer"))
}

fn ensure_allowed_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(invalid(
                layer,
                &join_path(path, key),
                &format!("unknown key `{key}`"),
            ));
        }
    }
    Ok(())
}

fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{base}.{key}")
    }
}

fn invalid(layer: &str, path: &str, message: &str) -> ConfigError {
    let path = if path.is_empty() { "<root>" } else { path };
    ConfigError::InvalidField {
        path: format!("{layer}:{path}"),
        message: message.to_string(),
    }
}
