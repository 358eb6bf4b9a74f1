//! Resilience helpers for calls leaving the server.
//!
//! # Data Flow
//! ```text
//! Request to the upstream search service:
//!     → per-attempt deadline (search::upstream)
//!     → On failure: retries.rs (retryable?) → backoff.rs (how long to wait)
//! ```
//!
//! # Design Decisions
//! - Retries only for idempotent requests (GET, HEAD, etc.)
//! - Jittered backoff prevents thundering herd

pub mod backoff;
pub mod retries;

pub use backoff::{retry_delay, upstream_retry_delay};
pub use retries::is_retryable;
