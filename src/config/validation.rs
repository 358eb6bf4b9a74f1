//! Configuration validation.
//!
//! Serde handles syntax; this module checks the values make sense together.
//! All problems are reported at once rather than stopping at the first.

use thiserror::Error;
use url::Url;

use crate::config::schema::ServerConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.max_connections must be greater than zero")]
    NoConnections,

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("limits.max_body_bytes must be greater than zero")]
    ZeroBodyLimit,

    #[error("cors origin '{0}' is not a valid origin (scheme://host[:port])")]
    InvalidOrigin(String),

    #[error("{field} '{path}' must start with '/'")]
    InvalidPath { field: &'static str, path: String },

    #[error("websocket.path '{0}' collides with the search prefix")]
    PathCollision(String),

    #[error("search.upstream '{0}' is not a valid http:// URL")]
    InvalidUpstream(String),

    #[error("search.max_attempts must be at least 1")]
    NoAttempts,
}

/// Validate a loaded configuration, returning every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::NoConnections);
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("request_secs"));
    }
    if config.timeouts.drain_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("drain_secs"));
    }
    if config.limits.max_body_bytes == 0 {
        errors.push(ValidationError::ZeroBodyLimit);
    }

    for origin in &config.cors.allowed_origins {
        if !is_valid_origin(origin) {
            errors.push(ValidationError::InvalidOrigin(origin.clone()));
        }
    }

    if !config.websocket.path.starts_with('/') {
        errors.push(ValidationError::InvalidPath {
            field: "websocket.path",
            path: config.websocket.path.clone(),
        });
    }
    if !config.search.prefix.starts_with('/') || config.search.prefix.len() < 2 {
        errors.push(ValidationError::InvalidPath {
            field: "search.prefix",
            path: config.search.prefix.clone(),
        });
    }
    if config.websocket.path == config.search.prefix
        || config
            .websocket
            .path
            .starts_with(&format!("{}/", config.search.prefix))
    {
        errors.push(ValidationError::PathCollision(config.websocket.path.clone()));
    }

    if let Some(upstream) = &config.search.upstream {
        match Url::parse(upstream) {
            Ok(url) if url.scheme() == "http" && url.has_host() => {}
            _ => errors.push(ValidationError::InvalidUpstream(upstream.clone())),
        }
    }
    if config.search.max_attempts == 0 {
        errors.push(ValidationError::NoAttempts);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// An origin is a bare `scheme://host[:port]` with no path, query or fragment.
fn is_valid_origin(origin: &str) -> bool {
    match Url::parse(origin) {
        Ok(url) => {
            url.has_host()
                && url.path() == "/"
                && !origin.ends_with('/')
                && url.query().is_none()
                && url.fragment().is_none()
        }
        Err(_) => false,
    }
}
