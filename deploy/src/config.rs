//! Service config generation and validation

use serde_json::Value;
use std::path::Path;
use tracing::debug;

use svcmgr_core::{Error, Result};

use crate::template::{render_template, Params};

/// Keys every `service` object must carry
pub const REQUIRED_KEYS: [&str; 6] = [
    "name",
    "version",
    "env",
    "port",
    "max_memory",
    "healthcheck",
];

/// Render `<template_dir>/<template_name>` and parse it as JSON
pub fn generate_config(template_dir: &Path, template_name: &str, params: &Params) -> Result<Value> {
    let path = template_dir.join(template_name);
    let template = std::fs::read_to_string(&path).map_err(|e| {
        Error::Template(format!("Failed to read template {}: {}", path.display(), e))
    })?;

    let rendered = render_template(&template, params)?;
    let config = serde_json::from_str(&rendered).map_err(|e| {
        Error::Template(format!(
            "Template {} did not render to valid JSON: {}",
            template_name, e
        ))
    })?;

    debug!(template = %template_name, "Generated config");
    Ok(config)
}

/// Read a JSON config file
pub fn load_config(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&content)?)
}

/// Required keys absent from the `service` object
///
/// A missing or non-object `service` reports every key.
pub fn missing_keys(config: &Value) -> Vec<&'static str> {
    match config.get("service").and_then(Value::as_object) {
        Some(service) => REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|k| !service.contains_key(*k))
            .collect(),
        None => REQUIRED_KEYS.to_vec(),
    }
}

pub fn validate_config(config: &Value) -> bool {
    missing_keys(config).is_empty()
}
