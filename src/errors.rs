//! Error types shared across the framework.

use std::fmt::{Display, Formatter};

/// Shared framework result type.
pub type Result<T> = std::result::Result<T, UplinkError>;

/// Framework error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum UplinkError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Channel connect or unary-call failure at the transport boundary.
    Transport(String),
    /// Stream registration or stream write failure.
    Stream(String),
    /// Inbound payload did not match the handler's declared request format.
    Decode(String),
    /// Handler returned a value that cannot be serialized (programming error).
    Encode(String),
    /// Two handlers were registered under the same id (programming error).
    DuplicateHandler(String),
    /// Handler `schema()` or `execute()` reported a failure.
    Handler(String),
    /// Supervisor or dispatcher shutdown failure.
    Shutdown(String),
}

impl Display for UplinkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Stream(msg) => write!(f, "stream: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Encode(msg) => write!(f, "encode: {msg}"),
            Self::DuplicateHandler(msg) => write!(f, "duplicate handler: {msg}"),
            Self::Handler(msg) => write!(f, "handler: {msg}"),
            Self::Shutdown(msg) => write!(f, "shutdown: {msg}"),
        }
    }
}

impl std::error::Error for UplinkError {}

impl From<toml::de::Error> for UplinkError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
