//! Top-level connection lifecycle owner.
//!
//! The [`ConnectionSupervisor`] runs the connect/retry loop, opens a
//! [`StreamSession`] for every registered handler (all-or-nothing), starts
//! the [`HeartbeatMonitor`](crate::heartbeat::HeartbeatMonitor), and owns
//! reconnection. Reconnect triggers from the heartbeat monitor and from
//! peer-closed streams arrive on a single channel with a single consumer,
//! so concurrent triggers coalesce into at most one reconnect pass.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::UplinkConfig;
use crate::dispatcher::Dispatcher;
use crate::heartbeat::HeartbeatMonitor;
use crate::registry::HandlerRegistry;
use crate::session::StreamSession;
use crate::transport::{Channel, Transport};

const EVENT_BUFFER: usize = 64;
const RECONNECT_TRIGGER_BUFFER: usize = 16;

/// Connection lifecycle state, readable from any thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel; either never started or torn down.
    Disconnected,
    /// Connect routine running.
    Connecting,
    /// All handler streams registered.
    Connected,
}

/// Why a reconnect pass was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectReason {
    /// Peer explicitly reported a handler non-serving.
    NotServing {
        /// Handler whose health check reported non-serving.
        handler_id: String,
    },
    /// A handler accumulated the configured number of heartbeat failures.
    HeartbeatFailures {
        /// Handler whose counter crossed the threshold.
        handler_id: String,
        /// Consecutive failures observed.
        failures: u32,
    },
    /// The peer closed one of a handler's streams.
    StreamClosed {
        /// Handler whose stream was closed.
        handler_id: String,
    },
}

impl Display for ReconnectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotServing { handler_id } => {
                write!(f, "handler {handler_id} reported non-serving")
            }
            Self::HeartbeatFailures {
                handler_id,
                failures,
            } => write!(f, "handler {handler_id} failed {failures} heartbeats"),
            Self::StreamClosed { handler_id } => {
                write!(f, "handler {handler_id} stream closed by peer")
            }
        }
    }
}

/// Observer events emitted to the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt is starting.
    Connecting {
        /// 1-based cumulative attempt counter.
        attempt: u64,
    },
    /// All handler streams registered; heartbeat running.
    Connected,
    /// Connection lost; a reconnect pass follows unless stopping.
    Disconnected {
        /// Human-readable teardown reason.
        reason: String,
    },
}

struct Inner {
    config: UplinkConfig,
    registry: HandlerRegistry,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<ConnectionState>,
    cancel: CancellationToken,
    reconnect_tx: mpsc::Sender<ReconnectReason>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    sessions: tokio::sync::Mutex<Vec<StreamSession>>,
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = next;
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // Observer channel is best-effort; a slow or absent listener must
        // never stall the connect loop.
        let _ = self.event_tx.try_send(event);
    }
}

/// Lifecycle owner for one worker-to-orchestrator connection.
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
    reconnect_rx: Mutex<Option<mpsc::Receiver<ReconnectReason>>>,
    control_task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl ConnectionSupervisor {
    /// Construct a supervisor and its connection-event receiver.
    ///
    /// Must be called within a tokio runtime: the dispatcher worker pool is
    /// spawned here so construction failures surface before `start()`.
    #[must_use]
    pub fn new(
        config: UplinkConfig,
        registry: HandlerRegistry,
        transport: Arc<dyn Transport>,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let dispatcher = Arc::new(Dispatcher::new(&config));
        let (reconnect_tx, reconnect_rx) = mpsc::channel(RECONNECT_TRIGGER_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let inner = Arc::new(Inner {
            config,
            registry,
            transport,
            dispatcher,
            state: Mutex::new(ConnectionState::Disconnected),
            cancel: CancellationToken::new(),
            reconnect_tx,
            event_tx,
            sessions: tokio::sync::Mutex::new(Vec::new()),
        });

        (
            Self {
                inner,
                reconnect_rx: Mutex::new(Some(reconnect_rx)),
                control_task: Mutex::new(None),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            },
            event_rx,
        )
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner
            .state
            .lock()
            .map_or(ConnectionState::Disconnected, |s| *s)
    }

    /// Start the supervisor: `on_start()` once per handler, then launch the
    /// connect routine. Idempotent — repeated calls are no-ops.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("supervisor already started");
            return;
        }

        for handler in self.inner.registry.iter() {
            handler.on_start();
        }

        let reconnect_rx = {
            let taken = self.reconnect_rx.lock().map(|mut guard| guard.take());
            match taken {
                Ok(Some(rx)) => rx,
                _ => {
                    warn!("reconnect receiver already taken, supervisor not started");
                    return;
                }
            }
        };

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(control_loop(inner, reconnect_rx));
        if let Ok(mut guard) = self.control_task.lock() {
            *guard = Some(task);
        }

        info!(
            handlers = self.inner.registry.len(),
            endpoint = self.inner.config.endpoint,
            "supervisor started"
        );
    }

    /// Stop the supervisor: tear down streams, drain the dispatcher within
    /// the grace period, and call `on_stop()` exactly once per handler.
    ///
    /// Safe to call from any task; after this returns no further callbacks
    /// fire into any handler. Repeated calls are no-ops.
    pub async fn stop(&self) {
        if !self.started.load(Ordering::SeqCst) || self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("supervisor stopping");
        self.inner.cancel.cancel();

        let task = match self.control_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(task) = task {
            let _ = task.await;
        }

        close_sessions(&self.inner).await;

        self.inner
            .dispatcher
            .shutdown(self.inner.config.shutdown_grace())
            .await;

        for handler in self.inner.registry.iter() {
            handler.on_stop();
        }

        self.inner.set_state(ConnectionState::Disconnected);
        info!("supervisor stopped");
    }
}

/// Connect, supervise, and reconnect until cancelled.
async fn control_loop(inner: Arc<Inner>, mut reconnect_rx: mpsc::Receiver<ReconnectReason>) {
    let mut attempt: u64 = 0;

    loop {
        inner.set_state(ConnectionState::Connecting);

        let Some(channel) = connect_until_ready(&inner, &mut attempt).await else {
            // Cancelled while connecting; stop() owns the cleanup.
            return;
        };

        inner.set_state(ConnectionState::Connected);
        // All sessions registered: only now may any handler observe
        // "connected", in registration order.
        for handler in inner.registry.iter() {
            handler.on_connection_state_change(true);
        }
        inner.emit(ConnectionEvent::Connected);
        info!(attempt, "connected, all handler streams registered");

        let heartbeat_cancel = inner.cancel.child_token();
        let heartbeat = HeartbeatMonitor::new(
            Arc::clone(&channel),
            inner.registry.clone(),
            inner.config.heartbeat_interval(),
            inner.config.heartbeat_failure_threshold,
            inner.reconnect_tx.clone(),
            heartbeat_cancel.clone(),
        )
        .spawn();

        let reason = tokio::select! {
            () = inner.cancel.cancelled() => {
                heartbeat_cancel.cancel();
                let _ = heartbeat.await;
                return;
            }
            trigger = reconnect_rx.recv() => match trigger {
                Some(reason) => reason,
                None => return,
            },
        };

        warn!(%reason, "connection torn down, reconnecting");
        heartbeat_cancel.cancel();
        let _ = heartbeat.await;

        close_sessions(&inner).await;

        // Disconnected is always observed before the next attempt begins.
        for handler in inner.registry.iter() {
            handler.on_connection_state_change(false);
        }
        inner.set_state(ConnectionState::Disconnected);
        inner.emit(ConnectionEvent::Disconnected {
            reason: reason.to_string(),
        });

        // Coalesce triggers that raced with this teardown.
        while reconnect_rx.try_recv().is_ok() {}
    }
}

/// Retry the full connect attempt (channel + every session) at a fixed
/// interval until it succeeds or the supervisor is cancelled.
async fn connect_until_ready(inner: &Arc<Inner>, attempt: &mut u64) -> Option<Arc<dyn Channel>> {
    loop {
        if inner.cancel.is_cancelled() {
            return None;
        }

        *attempt += 1;
        inner.emit(ConnectionEvent::Connecting { attempt: *attempt });

        match try_connect(inner).await {
            Ok(channel) => return Some(channel),
            Err(err) => {
                warn!(attempt, %err, "connection attempt failed");
            }
        }

        tokio::select! {
            () = inner.cancel.cancelled() => return None,
            () = tokio::time::sleep(inner.config.retry_interval()) => {}
        }
    }
}

/// One all-or-nothing connection attempt.
async fn try_connect(inner: &Arc<Inner>) -> crate::Result<Arc<dyn Channel>> {
    let channel = inner.transport.connect(&inner.config.endpoint).await?;

    let mut sessions = Vec::with_capacity(inner.registry.len());
    for handler in inner.registry.iter() {
        match StreamSession::start(
            &channel,
            Arc::clone(handler),
            Arc::clone(&inner.dispatcher),
            inner.reconnect_tx.clone(),
        )
        .await
        {
            Ok(session) => sessions.push(session),
            Err(err) => {
                // Any one failure aborts the whole attempt.
                for session in sessions {
                    session.close_and_join().await;
                }
                return Err(err);
            }
        }
    }

    *inner.sessions.lock().await = sessions;
    Ok(channel)
}

/// Close and join every active session.
async fn close_sessions(inner: &Arc<Inner>) {
    let sessions: Vec<StreamSession> = inner.sessions.lock().await.drain(..).collect();
    for session in sessions {
        session.close_and_join().await;
    }
}
