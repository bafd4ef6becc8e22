//! Application-facing handler contract.
//!
//! A [`Handler`] is one named capability the worker registers with the
//! orchestrator: an algorithm function set, a flow extension node, or a
//! flow plugin. The framework holds a non-owning reference for the process
//! lifetime and drives the lifecycle hooks; the application owns the logic.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::codec::{Payload, RequestFormat};
use crate::{Result, UplinkError};

/// Capability variant; determines the envelope fields the peer must supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Algorithm function set executed in a tenant scope.
    Algorithm,
    /// Flow extension node; no tenant scoping.
    FlowExtension,
    /// Flow plugin executed in a tenant scope.
    FlowPlugin,
}

impl HandlerKind {
    /// Whether work requests for this kind must carry a project/tenant id.
    #[must_use]
    pub fn requires_tenant(self) -> bool {
        matches!(self, Self::Algorithm | Self::FlowPlugin)
    }
}

/// Per-request context passed alongside the decoded payload.
///
/// Handlers with [`RequestFormat::Empty`] receive only this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkContext {
    /// Correlation id supplied by the peer.
    pub correlation_id: String,
    /// Target project/tenant, when the handler kind requires one.
    pub tenant: Option<String>,
}

/// One named capability registered with the orchestrator.
///
/// Implementations must be cheap to share (`Send + Sync`); `execute` may
/// block — the dispatcher isolates it from stream I/O.
pub trait Handler: Send + Sync {
    /// Unique handler identifier; duplicate ids fail registration.
    fn id(&self) -> &str;

    /// Capability variant this handler implements.
    fn kind(&self) -> HandlerKind;

    /// Declared request payload shape.
    fn request_format(&self) -> RequestFormat;

    /// Capability schema returned on control-stream queries.
    ///
    /// Expected to be cheap and non-blocking; it runs on the stream-reading
    /// task.
    ///
    /// # Errors
    ///
    /// Returns `UplinkError::Handler` if the schema cannot be produced; the
    /// query is answered with an error envelope.
    fn schema(&self) -> Result<String>;

    /// Execute one work item and return the result to encode.
    ///
    /// # Errors
    ///
    /// Any error is answered with a 400-class envelope carrying the message;
    /// it never escapes the worker task.
    fn execute(&self, ctx: &WorkContext, payload: Payload) -> Result<Value>;

    /// Called once before the first connection attempt.
    fn on_start(&self) {}

    /// Called exactly once during supervisor shutdown.
    fn on_stop(&self) {}

    /// Connection-state notification.
    ///
    /// `true` is delivered only after every registered handler's streams
    /// are active for the current connection attempt; `false` always
    /// precedes a reconnect attempt.
    fn on_connection_state_change(&self, connected: bool) {
        let _ = connected;
    }
}

/// Strongly-typed adapter over [`Handler`] for JSON-object requests.
///
/// Wraps a `Fn(&WorkContext, T) -> Result<R>` so applications keep concrete
/// request/response types while the framework stays object-safe. Decode
/// failures surface as [`UplinkError::Decode`], unencodable results as
/// [`UplinkError::Encode`] — both answered on the originating stream.
pub struct TypedHandler<T, R, F>
where
    T: DeserializeOwned,
    R: Serialize,
    F: Fn(&WorkContext, T) -> Result<R> + Send + Sync,
{
    id: String,
    kind: HandlerKind,
    schema: String,
    func: F,
    _marker: std::marker::PhantomData<fn(T) -> R>,
}

impl<T, R, F> TypedHandler<T, R, F>
where
    T: DeserializeOwned,
    R: Serialize,
    F: Fn(&WorkContext, T) -> Result<R> + Send + Sync,
{
    /// Wrap a typed function as a handler.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        kind: HandlerKind,
        schema: impl Into<String>,
        func: F,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            schema: schema.into(),
            func,
            _marker: std::marker::PhantomData,
        }
    }

    /// Convenience constructor returning the shared form the registry takes.
    #[must_use]
    pub fn shared(
        id: impl Into<String>,
        kind: HandlerKind,
        schema: impl Into<String>,
        func: F,
    ) -> Arc<Self> {
        Arc::new(Self::new(id, kind, schema, func))
    }
}

impl<T, R, F> Handler for TypedHandler<T, R, F>
where
    T: DeserializeOwned + Send + Sync,
    R: Serialize + Send + Sync,
    F: Fn(&WorkContext, T) -> Result<R> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> HandlerKind {
        self.kind
    }

    fn request_format(&self) -> RequestFormat {
        RequestFormat::Typed
    }

    fn schema(&self) -> Result<String> {
        Ok(self.schema.clone())
    }

    fn execute(&self, ctx: &WorkContext, payload: Payload) -> Result<Value> {
        let Payload::Typed(value) = payload else {
            return Err(UplinkError::Decode("typed handler requires a body".into()));
        };
        let request: T = serde_json::from_value(value)
            .map_err(|err| UplinkError::Decode(err.to_string()))?;
        let response = (self.func)(ctx, request)?;
        serde_json::to_value(response).map_err(|err| UplinkError::Encode(err.to_string()))
    }
}
