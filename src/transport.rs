//! Transport boundary consumed from an external RPC layer.
//!
//! The framework never speaks a concrete wire protocol; it asks a
//! [`Transport`] for a [`Channel`], then opens one control and one work
//! stream per handler and issues unary health checks over the same channel.
//! Streams are bridged to tokio mpsc channels so the RPC layer's I/O tasks
//! stay decoupled from the framework's.

use std::fmt::Write as _;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::handler::{Handler, HandlerKind};
use crate::Result;

/// Suggested inbound buffer for stream implementations.
///
/// The framework relies on the dispatcher's bounded queue, not stream-level
/// flow control, to bound memory; inbound stream buffers should be
/// effectively unbounded relative to it.
pub const INBOUND_STREAM_BUFFER: usize = 1024;

/// Role of one stream within a handler's stream pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Capability-schema queries.
    Control,
    /// Work-item execution requests.
    Work,
}

impl StreamKind {
    /// Wire name used in stream metadata.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Work => "work",
        }
    }
}

/// Peer-reported liveness status from the unary health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingStatus {
    /// Orchestrator considers the handler's registration healthy.
    Serving,
    /// Orchestrator explicitly reports the registration unhealthy.
    NotServing,
    /// Status could not be determined.
    Unknown,
}

/// Routing metadata attached when opening a stream.
///
/// The handler id is hex-encoded so the peer can carry it in header-safe
/// form and route subsequent messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMetadata {
    /// Hex-encoded handler id.
    pub handler_id: String,
    /// Handler kind, as a wire string.
    pub handler_kind: &'static str,
    /// Stream role, as a wire string.
    pub stream: &'static str,
}

impl StreamMetadata {
    /// Build metadata for one of a handler's streams.
    #[must_use]
    pub fn for_handler(handler: &Arc<dyn Handler>, kind: StreamKind) -> Self {
        Self {
            handler_id: hex_encode(handler.id()),
            handler_kind: match handler.kind() {
                HandlerKind::Algorithm => "algorithm",
                HandlerKind::FlowExtension => "flow-extension",
                HandlerKind::FlowPlugin => "flow-plugin",
            },
            stream: kind.as_str(),
        }
    }
}

/// One open bidirectional stream, bridged to mpsc halves.
///
/// The transport watches `cancel` and tears the underlying RPC stream down
/// when it fires; a peer-initiated close is observed as the inbound half
/// yielding `None`.
pub struct StreamPair {
    /// Frames written by the framework toward the orchestrator.
    pub outbound: mpsc::Sender<Bytes>,
    /// Frames pushed by the orchestrator toward the framework.
    pub inbound: mpsc::Receiver<Bytes>,
    /// Cancelled by the framework to close the stream.
    pub cancel: CancellationToken,
}

/// A connected channel able to open streams and issue health checks.
///
/// The channel is shared read-only across the connect, heartbeat, and
/// dispatch contexts; only the supervisor closes and recreates it (by
/// dropping its `Arc` and reconnecting).
pub trait Channel: Send + Sync {
    /// Open one bidirectional stream with routing metadata.
    ///
    /// # Errors
    ///
    /// Returns `UplinkError::Stream` if the stream cannot be registered;
    /// the caller treats this as a failed connection attempt.
    fn open_stream(
        &self,
        kind: StreamKind,
        metadata: StreamMetadata,
    ) -> Pin<Box<dyn Future<Output = Result<StreamPair>> + Send + '_>>;

    /// Issue a unary liveness call for one handler.
    ///
    /// Deadlines are the transport's concern; the framework treats an error
    /// as one heartbeat failure.
    ///
    /// # Errors
    ///
    /// Returns `UplinkError::Transport` on RPC failure.
    fn check_health(
        &self,
        handler_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ServingStatus>> + Send + '_>>;
}

/// Factory for channels toward the orchestrator.
pub trait Transport: Send + Sync {
    /// Connect to the orchestrator at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `UplinkError::Transport` if the channel cannot be
    /// established; the supervisor retries at its fixed interval.
    fn connect(
        &self,
        endpoint: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Channel>>> + Send + '_>>;
}

/// Hex-encode a handler id for header-safe routing metadata.
#[must_use]
pub fn hex_encode(id: &str) -> String {
    let mut encoded = String::with_capacity(id.len() * 2);
    for byte in id.as_bytes() {
        let _ = write!(encoded, "{byte:02x}");
    }
    encoded
}
