//! Wire envelopes exchanged on the per-handler stream pairs.
//!
//! Inbound frames are [`WorkRequest`] (work stream) and [`ControlRequest`]
//! (control stream); every outbound frame is a [`WorkResponse`]. The `info`
//! strings match the orchestrator's wire dialect and are asserted by the
//! peer, so they are fixed constants rather than free-form messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope status for a successfully executed request.
pub const STATUS_OK: u16 = 200;
/// Envelope status for any validation, decode, or execution failure.
pub const STATUS_ERROR: u16 = 400;

/// `info` value on success envelopes.
pub const INFO_OK: &str = "成功";
/// `info` value when handler execution (or decode/encode) fails.
pub const INFO_EXEC_ERROR: &str = "执行异常";
/// `info` value when the inbound envelope itself is malformed.
pub const INFO_BAD_REQUEST: &str = "非法请求";

/// Work item pushed down a handler's work stream by the orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkRequest {
    /// Correlation id supplied by the peer; echoed back on the response.
    #[serde(default)]
    pub request: String,
    /// Target project/tenant identifier; required for handler kinds that
    /// execute in a tenant scope.
    #[serde(default)]
    pub project: Option<String>,
    /// Request payload, interpreted per the handler's declared format.
    #[serde(default)]
    pub body: Option<Value>,
}

/// Capability-schema query pushed down a handler's control stream.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ControlRequest {
    /// Correlation id supplied by the peer; echoed back on the response.
    #[serde(default)]
    pub request: String,
}

/// Response envelope written back on the originating stream.
///
/// Exactly one envelope is written per inbound request; a partially built
/// envelope is never sent.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkResponse {
    /// Correlation id echoed from the request.
    pub request: String,
    /// HTTP-like status: [`STATUS_OK`] or [`STATUS_ERROR`].
    pub status: u16,
    /// Short machine-checked outcome marker.
    pub info: String,
    /// Human-readable failure detail; empty on success.
    #[serde(default)]
    pub detail: String,
    /// Encoded result payload on success.
    #[serde(default)]
    pub result: Option<Value>,
}

impl WorkResponse {
    /// Build a success envelope carrying the encoded handler result.
    #[must_use]
    pub fn ok(correlation_id: impl Into<String>, result: Value) -> Self {
        Self {
            request: correlation_id.into(),
            status: STATUS_OK,
            info: INFO_OK.to_owned(),
            detail: String::new(),
            result: Some(result),
        }
    }

    /// Build an execution-failure envelope (decode, execute, or encode).
    #[must_use]
    pub fn exec_error(correlation_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            request: correlation_id.into(),
            status: STATUS_ERROR,
            info: INFO_EXEC_ERROR.to_owned(),
            detail: detail.into(),
            result: None,
        }
    }

    /// Build a validation-failure envelope for a malformed inbound message.
    #[must_use]
    pub fn bad_request(correlation_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            request: correlation_id.into(),
            status: STATUS_ERROR,
            info: INFO_BAD_REQUEST.to_owned(),
            detail: detail.into(),
            result: None,
        }
    }

    /// Whether this envelope reports success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}
