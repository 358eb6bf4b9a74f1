//! Structured logging.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to this
//! crate and to tower-http's request traces.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Environment, LogFormat, ObservabilityConfig};

/// Pick the output format: explicit config first, then JSON for production.
pub fn resolve_format(config: &ObservabilityConfig, environment: Environment) -> LogFormat {
    match config.log_format {
        Some(format) => format,
        None if environment == Environment::Production => LogFormat::Json,
        None => LogFormat::Pretty,
    }
}

fn default_directives(level: &str) -> String {
    format!("parts_search_server={level},tower_http={level}")
}

/// Install the global subscriber. Safe to call more than once; later calls
/// leave the first subscriber in place.
pub fn init(config: &ObservabilityConfig, environment: Environment) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match resolve_format(config, environment) {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_defaults_to_json() {
        let config = ObservabilityConfig::default();
        assert_eq!(resolve_format(&config, Environment::Production), LogFormat::Json);
        assert_eq!(resolve_format(&config, Environment::Development), LogFormat::Pretty);

        let forced = ObservabilityConfig {
            log_format: Some(LogFormat::Pretty),
            ..ObservabilityConfig::default()
        };
        assert_eq!(resolve_format(&forced, Environment::Production), LogFormat::Pretty);
    }

    #[test]
    fn directives_cover_crate_and_http_traces() {
        assert_eq!(
            default_directives("debug"),
            "parts_search_server=debug,tower_http=debug"
        );
    }
}
