//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (PORT / APP_ENV overrides)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → shared via Arc with the pipeline and the bridge
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the server starts accepting
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    CorsConfig, Environment, ListenerConfig, LogFormat, ObservabilityConfig, SearchConfig,
    ServerConfig,
};
pub use validation::ValidationError;
