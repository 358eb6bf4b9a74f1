//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper-util connection, protocol demultiplexing)
//!     ├─ websocket.rs (upgrade bridge → realtime collaborator)
//!     └─ pipeline.rs (request ID, trace, CORS, deadline, body decoding)
//!         → health.rs | search routes | 404 catch-all
//!         → envelope.rs (uniform JSON error bodies)
//! ```

pub mod envelope;
pub mod health;
pub mod pipeline;
pub mod request;
pub mod server;
pub mod websocket;

pub use envelope::{ApiError, PipelineFailure};
pub use pipeline::{build_pipeline, PipelinePolicy};
pub use request::{BodyKind, DecodedBody, RequestIdExt, X_REQUEST_ID};
pub use server::{BoundServer, HttpServer, Protocol, ProtocolRouter, ServerHandle};
pub use websocket::{build_bridge, is_websocket_upgrade};
