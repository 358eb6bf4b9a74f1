//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{Environment, ServerConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: {reason}")]
    Env { var: &'static str, reason: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TOML file into a config without validating it.
pub fn read_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load configuration the way the binary does: optional file, then
/// environment overrides, then validation.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => ServerConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply `PORT` and `APP_ENV` (falling back to `NODE_ENV`) on top of `config`.
pub fn apply_env_overrides<F>(config: &mut ServerConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("PORT").filter(|v| !v.trim().is_empty()) {
        config.listener.port = port.trim().parse().map_err(|e| ConfigError::Env {
            var: "PORT",
            reason: format!("{} ({})", port, e),
        })?;
    }

    let env = lookup("APP_ENV")
        .map(|v| ("APP_ENV", v))
        .or_else(|| lookup("NODE_ENV").map(|v| ("NODE_ENV", v)))
        .filter(|(_, v)| !v.trim().is_empty());
    // Only `production` hides error detail; any other label (staging, ci,
    // local...) keeps it visible.
    if let Some((var, value)) = env {
        config.service.environment = match value.parse::<Environment>() {
            Ok(environment) => environment,
            Err(_) => {
                tracing::warn!(var, value = %value.trim(), "Unrecognised environment, treating it as development");
                Environment::Development
            }
        };
    }

    Ok(())
}
