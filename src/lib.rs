#![forbid(unsafe_code)]

//! Worker-side capability registration and request dispatch over long-lived
//! bidirectional streams.
//!
//! An out-of-process worker registers one or more named [`Handler`]s with a
//! remote orchestrator, receives work items pushed down per-handler stream
//! pairs, executes them on a bounded worker pool, and writes result envelopes
//! back — surviving connection loss through a supervised connect/retry loop
//! and heartbeat-driven reconnection.

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod handler;
pub mod heartbeat;
pub mod registry;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod wire;

pub use config::UplinkConfig;
pub use errors::{Result, UplinkError};
pub use handler::Handler;
pub use registry::HandlerRegistry;
pub use supervisor::ConnectionSupervisor;
