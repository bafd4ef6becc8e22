//! Periodic per-handler liveness checks over the shared channel.
//!
//! One monitor task runs per connection. Each sweep issues a unary health
//! check for every registered handler and tracks consecutive failures per
//! handler. A single non-`Serving` status triggers reconnection immediately;
//! transport errors accumulate and trigger at the configured threshold.
//! Cancellation exits the loop cleanly without triggering reconnection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::HandlerRegistry;
use crate::supervisor::ReconnectReason;
use crate::transport::{Channel, ServingStatus};

/// Liveness monitor for one established connection.
pub struct HeartbeatMonitor {
    channel: Arc<dyn Channel>,
    registry: HandlerRegistry,
    interval: Duration,
    failure_threshold: u32,
    reconnect_tx: mpsc::Sender<ReconnectReason>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Construct a monitor (does not start the sweep loop yet).
    #[must_use]
    pub fn new(
        channel: Arc<dyn Channel>,
        registry: HandlerRegistry,
        interval: Duration,
        failure_threshold: u32,
        reconnect_tx: mpsc::Sender<ReconnectReason>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel,
            registry,
            interval,
            failure_threshold,
            reconnect_tx,
            cancel,
        }
    }

    /// Spawn the sweep loop.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut failures: HashMap<String, u32> = HashMap::new();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("heartbeat monitor cancelled");
                    return;
                }
                () = tokio::time::sleep(self.interval) => {}
            }

            for handler in self.registry.iter() {
                if self.cancel.is_cancelled() {
                    debug!("heartbeat monitor cancelled mid-sweep");
                    return;
                }

                let handler_id = handler.id();
                match self.channel.check_health(handler_id).await {
                    Ok(ServingStatus::Serving) => {
                        failures.insert(handler_id.to_owned(), 0);
                    }
                    Ok(status) => {
                        // Explicit non-serving report: no threshold, tear
                        // down now.
                        info!(handler_id, ?status, "peer reports non-serving status");
                        self.trigger(ReconnectReason::NotServing {
                            handler_id: handler_id.to_owned(),
                        })
                        .await;
                        return;
                    }
                    Err(err) => {
                        let count = failures.entry(handler_id.to_owned()).or_insert(0);
                        *count += 1;
                        warn!(handler_id, failures = *count, %err, "heartbeat failed");
                        if *count >= self.failure_threshold {
                            self.trigger(ReconnectReason::HeartbeatFailures {
                                handler_id: handler_id.to_owned(),
                                failures: *count,
                            })
                            .await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn trigger(&self, reason: ReconnectReason) {
        if self.reconnect_tx.send(reason).await.is_err() {
            debug!("supervisor gone, reconnect trigger dropped");
        }
    }
}
