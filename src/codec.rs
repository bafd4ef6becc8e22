//! Payload and frame (de)serialization for handler streams.
//!
//! Frames on the wire are UTF-8 JSON encoded to [`Bytes`]. Request payloads
//! are decoded per the handler's declared [`RequestFormat`]; decode failures
//! are scoped to the triggering request and never tear the stream down.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::wire::WorkRequest;
use crate::{Result, UplinkError};

/// Request payload shape a handler declares at registration time.
///
/// The framework asks the handler up front and decodes accordingly; no
/// runtime type discovery is involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFormat {
    /// Handler takes no payload; only the work context is passed.
    Empty,
    /// Payload is passed through as a raw string, no decoding.
    RawText,
    /// Payload is decoded as a generic JSON object.
    Map,
    /// Payload is decoded as a JSON value for a typed adapter to interpret.
    Typed,
}

/// Decoded request payload handed to [`Handler::execute`](crate::Handler::execute).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// No payload; the work context carries the identifiers.
    Empty,
    /// Raw pass-through string.
    RawText(String),
    /// Generic JSON object.
    Map(Map<String, Value>),
    /// JSON value destined for a typed handler adapter.
    Typed(Value),
}

/// Decode a work request body into the handler's declared payload shape.
///
/// # Errors
///
/// Returns `UplinkError::Decode` when the body does not match the declared
/// format. The error is scoped to this request; the stream stays open.
pub fn decode_payload(format: RequestFormat, request: &WorkRequest) -> Result<Payload> {
    match format {
        RequestFormat::Empty => Ok(Payload::Empty),
        RequestFormat::RawText => match &request.body {
            Some(Value::String(text)) => Ok(Payload::RawText(text.clone())),
            Some(other) => Ok(Payload::RawText(other.to_string())),
            None => Ok(Payload::RawText(String::new())),
        },
        RequestFormat::Map => match &request.body {
            Some(Value::Object(map)) => Ok(Payload::Map(map.clone())),
            Some(other) => Err(UplinkError::Decode(format!(
                "expected object body, got {other}"
            ))),
            None => Ok(Payload::Map(Map::new())),
        },
        RequestFormat::Typed => request
            .body
            .clone()
            .map(Payload::Typed)
            .ok_or_else(|| UplinkError::Decode("typed handler requires a body".into())),
    }
}

/// Encode a value as a JSON frame.
///
/// # Errors
///
/// Returns `UplinkError::Encode` if the value cannot be serialized; for
/// plain [`Value`] results this cannot happen.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|err| UplinkError::Encode(err.to_string()))
}

/// Decode a raw inbound frame into an envelope type.
///
/// # Errors
///
/// Returns `UplinkError::Decode` if the frame is not valid JSON for `T`.
pub fn decode_frame<T: DeserializeOwned>(frame: &Bytes) -> Result<T> {
    serde_json::from_slice(frame).map_err(|err| UplinkError::Decode(err.to_string()))
}
