//! Per-handler stream session: one control and one work stream.
//!
//! A [`StreamSession`] owns the pair of long-lived streams bound to one
//! handler. Control frames (schema queries) are answered inline on the
//! reading task; work frames are envelope-validated and handed to the
//! [`Dispatcher`]. Peer-initiated stream loss is reported to the supervisor
//! through a shared closed-notification channel.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec;
use crate::dispatcher::{Dispatcher, WorkItem};
use crate::handler::Handler;
use crate::supervisor::ReconnectReason;
use crate::transport::{Channel, StreamKind, StreamMetadata, StreamPair};
use crate::wire::{ControlRequest, WorkRequest, WorkResponse};
use crate::{Result, UplinkError};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, streams not yet opened.
    Idle,
    /// Stream registration in progress.
    Starting,
    /// Both streams registered; frames flowing.
    Active,
    /// Streams cancelled or lost.
    Closed,
}

/// One handler's registered stream pair plus its reader tasks.
pub struct StreamSession {
    handler: Arc<dyn Handler>,
    state: Arc<Mutex<SessionState>>,
    cancel: CancellationToken,
    readers: Vec<JoinHandle<()>>,
}

impl StreamSession {
    /// Open both streams for `handler` and start the reader tasks.
    ///
    /// All-or-nothing: if either stream fails to register, the error is
    /// returned and nothing is left running — the caller treats the whole
    /// connection attempt as failed.
    ///
    /// # Errors
    ///
    /// Returns `UplinkError::Stream` or `UplinkError::Transport` from the
    /// underlying channel when stream registration fails.
    pub async fn start(
        channel: &Arc<dyn Channel>,
        handler: Arc<dyn Handler>,
        dispatcher: Arc<Dispatcher>,
        closed_tx: mpsc::Sender<ReconnectReason>,
    ) -> Result<Self> {
        let state = Arc::new(Mutex::new(SessionState::Starting));
        let cancel = CancellationToken::new();

        let control = channel
            .open_stream(
                StreamKind::Control,
                StreamMetadata::for_handler(&handler, StreamKind::Control),
            )
            .await?;
        let work = channel
            .open_stream(
                StreamKind::Work,
                StreamMetadata::for_handler(&handler, StreamKind::Work),
            )
            .await?;

        let readers = vec![
            tokio::spawn(control_loop(
                Arc::clone(&handler),
                control,
                cancel.clone(),
                closed_tx.clone(),
                Arc::clone(&state),
            )),
            tokio::spawn(work_loop(
                Arc::clone(&handler),
                work,
                dispatcher,
                cancel.clone(),
                closed_tx,
                Arc::clone(&state),
            )),
        ];

        set_state(&state, SessionState::Active);
        info!(handler_id = handler.id(), "stream session active");

        Ok(Self {
            handler,
            state,
            cancel,
            readers,
        })
    }

    /// Id of the handler this session serves.
    #[must_use]
    pub fn handler_id(&self) -> &str {
        self.handler.id()
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.lock().map_or(SessionState::Closed, |s| *s)
    }

    /// Cancel both streams. Idempotent and safe to call repeatedly.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        set_state(&self.state, SessionState::Closed);
        debug!(handler_id = self.handler.id(), "stream session closed");
    }

    /// Close and wait for both reader tasks to exit.
    pub async fn close_and_join(mut self) {
        self.close();
        for reader in self.readers.drain(..) {
            let _ = reader.await;
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn set_state(state: &Arc<Mutex<SessionState>>, next: SessionState) {
    if let Ok(mut guard) = state.lock() {
        *guard = next;
    }
}

/// Answer schema queries inline; `schema()` is expected to be cheap.
async fn control_loop(
    handler: Arc<dyn Handler>,
    mut stream: StreamPair,
    cancel: CancellationToken,
    closed_tx: mpsc::Sender<ReconnectReason>,
    state: Arc<Mutex<SessionState>>,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => {
                debug!(handler_id = handler.id(), "control reader cancelled");
                return;
            }
            frame = stream.inbound.recv() => frame,
        };

        let Some(frame) = frame else {
            report_peer_close(&handler, &cancel, &closed_tx, &state, "control").await;
            return;
        };

        let correlation_id = match codec::decode_frame::<ControlRequest>(&frame) {
            Ok(request) => request.request,
            Err(err) => {
                warn!(handler_id = handler.id(), %err, "malformed control frame");
                write_response(
                    &stream.outbound,
                    &WorkResponse::bad_request("", err.to_string()),
                )
                .await;
                continue;
            }
        };

        let response = match handler.schema() {
            Ok(schema) => WorkResponse::ok(&correlation_id, serde_json::Value::String(schema)),
            Err(err) => WorkResponse::exec_error(&correlation_id, err.to_string()),
        };
        write_response(&stream.outbound, &response).await;
    }
}

/// Validate inbound work envelopes and hand them to the dispatcher.
async fn work_loop(
    handler: Arc<dyn Handler>,
    mut stream: StreamPair,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    closed_tx: mpsc::Sender<ReconnectReason>,
    state: Arc<Mutex<SessionState>>,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => {
                debug!(handler_id = handler.id(), "work reader cancelled");
                return;
            }
            frame = stream.inbound.recv() => frame,
        };

        let Some(frame) = frame else {
            report_peer_close(&handler, &cancel, &closed_tx, &state, "work").await;
            return;
        };

        let request = match codec::decode_frame::<WorkRequest>(&frame) {
            Ok(request) => request,
            Err(err) => {
                warn!(handler_id = handler.id(), %err, "malformed work frame");
                write_response(
                    &stream.outbound,
                    &WorkResponse::bad_request("", err.to_string()),
                )
                .await;
                continue;
            }
        };

        // Envelope validation happens here, on the reading task, so a bad
        // message is answered without ever reaching a worker.
        if let Err(err) = validate_envelope(&handler, &request) {
            warn!(
                handler_id = handler.id(),
                correlation_id = request.request,
                %err,
                "work envelope rejected"
            );
            write_response(
                &stream.outbound,
                &WorkResponse::bad_request(&request.request, err.to_string()),
            )
            .await;
            continue;
        }

        let item = WorkItem {
            handler: Arc::clone(&handler),
            request,
            response_tx: stream.outbound.clone(),
        };
        // Awaits while the dispatcher queue is full: intentional back-pressure
        // on this reading task.
        if let Err(err) = dispatcher.submit(item).await {
            warn!(handler_id = handler.id(), %err, "work item not accepted");
        }
    }
}

/// Minimal envelope checks before dispatch.
fn validate_envelope(handler: &Arc<dyn Handler>, request: &WorkRequest) -> Result<()> {
    if request.request.trim().is_empty() {
        return Err(UplinkError::Stream("missing correlation id".into()));
    }

    if handler.kind().requires_tenant()
        && request
            .project
            .as_deref()
            .is_none_or(|project| project.trim().is_empty())
    {
        return Err(UplinkError::Stream("missing project identifier".into()));
    }

    Ok(())
}

async fn write_response(tx: &mpsc::Sender<Bytes>, response: &WorkResponse) {
    match codec::encode(response) {
        Ok(frame) => {
            if tx.send(frame).await.is_err() {
                warn!(correlation_id = response.request, "stream closed before response write");
            }
        }
        Err(err) => warn!(%err, "response encode failed"),
    }
}

/// Flag a peer-initiated close to the supervisor, unless we closed it.
async fn report_peer_close(
    handler: &Arc<dyn Handler>,
    cancel: &CancellationToken,
    closed_tx: &mpsc::Sender<ReconnectReason>,
    state: &Arc<Mutex<SessionState>>,
    which: &str,
) {
    if cancel.is_cancelled() {
        return;
    }
    set_state(state, SessionState::Closed);
    info!(handler_id = handler.id(), stream = which, "stream closed by peer");
    let _ = closed_tx
        .send(ReconnectReason::StreamClosed {
            handler_id: handler.id().to_owned(),
        })
        .await;
}
