//! Small engine parts search API server library.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod realtime;
pub mod resilience;
pub mod search;

pub use config::ServerConfig;
pub use http::{HttpServer, ServerHandle};
pub use lifecycle::Shutdown;
