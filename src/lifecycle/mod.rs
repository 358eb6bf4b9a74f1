//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Assemble pipeline + bridge → Bind listener → Announce ready
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Stopped
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown (once)
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then pipeline and bridge, then listener
//! - Ordered shutdown: stop accept, drain, close
//! - Drain has a deadline: abandoned connections are logged, not awaited forever

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;

pub use shutdown::Shutdown;
pub use startup::StartupError;
pub use state::{Lifecycle, LifecycleState};
