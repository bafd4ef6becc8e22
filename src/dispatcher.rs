//! Bounded worker pool executing work items off the stream-reading tasks.
//!
//! Sessions hand inbound work to [`Dispatcher::submit`], which awaits on a
//! full queue — back-pressure flows to the stream reader instead of work
//! being dropped. Each item is decoded, executed, encoded, and answered on
//! its originating stream; failures are fault-isolated per item and can
//! never take a worker down.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::config::UplinkConfig;
use crate::handler::{Handler, WorkContext};
use crate::wire::{WorkRequest, WorkResponse};
use crate::{Result, UplinkError};

/// One unit of work: an inbound request bound to its handler and the
/// outbound half of the stream it arrived on.
pub struct WorkItem {
    /// Handler the peer addressed.
    pub handler: Arc<dyn Handler>,
    /// Validated inbound envelope.
    pub request: WorkRequest,
    /// Outbound half of the originating work stream.
    pub response_tx: mpsc::Sender<Bytes>,
}

/// Fixed-size worker pool over a bounded work queue.
///
/// Pool sizing follows [`UplinkConfig`]: `max_pool_size` worker tasks over
/// a `queue_capacity`-bounded queue.
pub struct Dispatcher {
    queue_tx: std::sync::Mutex<Option<mpsc::Sender<WorkItem>>>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Start the worker pool.
    #[must_use]
    pub fn new(config: &UplinkConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel::<WorkItem>(config.queue_capacity());
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let pool_size = config.max_pool_size();
        let mut workers = Vec::with_capacity(pool_size);
        for worker_id in 0..pool_size {
            let rx = Arc::clone(&queue_rx);
            workers.push(tokio::spawn(Self::worker_loop(worker_id, rx)));
        }

        info!(
            pool_size,
            queue_capacity = config.queue_capacity(),
            "dispatcher worker pool started"
        );

        Self {
            queue_tx: std::sync::Mutex::new(Some(queue_tx)),
            workers: std::sync::Mutex::new(workers),
        }
    }

    /// Enqueue a work item, awaiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `UplinkError::Shutdown` if the dispatcher has been shut down.
    pub async fn submit(&self, item: WorkItem) -> Result<()> {
        let tx = {
            let guard = self
                .queue_tx
                .lock()
                .map_err(|_| UplinkError::Shutdown("dispatcher queue lock poisoned".into()))?;
            guard.clone()
        };

        let Some(tx) = tx else {
            return Err(UplinkError::Shutdown("dispatcher is shut down".into()));
        };

        tx.send(item)
            .await
            .map_err(|_| UplinkError::Shutdown("dispatcher workers are gone".into()))
    }

    /// Shut the pool down, waiting up to `grace` for queued work to drain.
    ///
    /// Closing the queue lets workers finish everything already submitted;
    /// stragglers past the grace period are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        {
            if let Ok(mut guard) = self.queue_tx.lock() {
                guard.take();
            }
        }

        let handles: Vec<JoinHandle<()>> = {
            match self.workers.lock() {
                Ok(mut guard) => guard.drain(..).collect(),
                Err(_) => Vec::new(),
            }
        };

        if handles.is_empty() {
            return;
        }

        let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(grace, join_all(handles)).await.is_err() {
            warn!("shutdown grace period elapsed, aborting remaining workers");
            for abort in abort_handles {
                abort.abort();
            }
        } else {
            debug!("dispatcher drained cleanly");
        }
    }

    /// Pull-and-execute loop shared by all workers.
    async fn worker_loop(
        worker_id: usize,
        queue_rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    ) {
        loop {
            let item = {
                let mut rx = queue_rx.lock().await;
                rx.recv().await
            };

            let Some(item) = item else {
                debug!(worker_id, "work queue closed, worker exiting");
                return;
            };

            Self::run_item(worker_id, item).await;
        }
    }

    /// Execute one item with per-item fault isolation.
    async fn run_item(worker_id: usize, item: WorkItem) {
        let handler_id = item.handler.id().to_owned();
        let correlation_id = item.request.request.clone();

        let response = match Self::execute_item(&item).await {
            Ok(result) => WorkResponse::ok(&correlation_id, result),
            Err(err) => {
                error!(
                    worker_id,
                    handler_id,
                    correlation_id,
                    request = ?item.request,
                    %err,
                    "work item failed"
                );
                WorkResponse::exec_error(&correlation_id, err.to_string())
            }
        };

        let frame = match codec::encode(&response) {
            Ok(frame) => frame,
            Err(err) => {
                // WorkResponse serialization is infallible in practice; log
                // rather than leaving the peer with a partial envelope.
                error!(worker_id, handler_id, correlation_id, %err, "response encode failed");
                return;
            }
        };

        if item.response_tx.send(frame).await.is_err() {
            warn!(
                worker_id,
                handler_id, correlation_id, "originating stream closed before response write"
            );
        }
    }

    /// Decode, execute, and return the handler result for one item.
    async fn execute_item(item: &WorkItem) -> Result<serde_json::Value> {
        let payload = codec::decode_payload(item.handler.request_format(), &item.request)?;
        let ctx = WorkContext {
            correlation_id: item.request.request.clone(),
            tenant: item.request.project.clone(),
        };

        // Handler execution may block; isolate it from the async workers.
        let handler = Arc::clone(&item.handler);
        tokio::task::spawn_blocking(move || handler.execute(&ctx, payload))
            .await
            .map_err(|err| UplinkError::Handler(format!("handler panicked: {err}")))?
    }
}
