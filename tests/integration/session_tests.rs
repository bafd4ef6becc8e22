//! Integration tests for per-handler stream sessions.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use plugin_uplink::codec::RequestFormat;
use plugin_uplink::dispatcher::Dispatcher;
use plugin_uplink::handler::HandlerKind;
use plugin_uplink::session::{SessionState, StreamSession};
use plugin_uplink::supervisor::ReconnectReason;
use plugin_uplink::transport::{Channel, StreamKind, Transport};
use plugin_uplink::wire::{INFO_BAD_REQUEST, INFO_EXEC_ERROR, STATUS_ERROR, STATUS_OK};
use plugin_uplink::UplinkConfig;
use serde_json::json;
use tokio::sync::mpsc;

use super::common::{RecordingHandler, TestChannel, TestTransport};

struct Fixture {
    channel: Arc<dyn Channel>,
    test_channel: Arc<TestChannel>,
    dispatcher: Arc<Dispatcher>,
    closed_rx: mpsc::Receiver<ReconnectReason>,
    closed_tx: mpsc::Sender<ReconnectReason>,
}

async fn fixture() -> Fixture {
    let config = UplinkConfig::from_toml_str(
        "endpoint = \"orchestrator:7001\"\nworker_threads = 2\n",
    )
    .expect("valid config");
    let transport = TestTransport::new();
    let channel = transport.connect("orchestrator:7001").await.expect("connect");
    let test_channel = transport.last_channel();
    let (closed_tx, closed_rx) = mpsc::channel(8);

    Fixture {
        channel,
        test_channel,
        dispatcher: Arc::new(Dispatcher::new(&config)),
        closed_rx,
        closed_tx,
    }
}

impl Fixture {
    async fn start(&self, handler: Arc<RecordingHandler>) -> StreamSession {
        StreamSession::start(
            &self.channel,
            handler,
            Arc::clone(&self.dispatcher),
            self.closed_tx.clone(),
        )
        .await
        .expect("session start")
    }
}

#[tokio::test]
async fn work_request_is_executed_and_answered() {
    let fx = fixture().await;
    let handler = RecordingHandler::new("algo", HandlerKind::Algorithm, RequestFormat::Typed);
    let session = fx.start(Arc::clone(&handler)).await;
    assert_eq!(session.state(), SessionState::Active);

    fx.test_channel
        .send_frame(
            "algo",
            StreamKind::Work,
            json!({"request": "r1", "project": "p1", "body": {"n": 7}}),
        )
        .await;

    let response = fx.test_channel.recv_response("algo", StreamKind::Work).await;
    assert_eq!(response.request, "r1");
    assert_eq!(response.status, STATUS_OK);
    let result = response.result.expect("result");
    assert_eq!(result["tenant"], json!("p1"));
    assert_eq!(result["echo"], json!({"n": 7}));
    assert_eq!(handler.executions(), 1);
}

#[tokio::test]
async fn execution_failure_answers_exec_error() {
    let fx = fixture().await;
    let handler = RecordingHandler::new("algo", HandlerKind::Algorithm, RequestFormat::Typed);
    handler.fail_execute.store(true, Ordering::SeqCst);
    let _session = fx.start(Arc::clone(&handler)).await;

    fx.test_channel
        .send_frame(
            "algo",
            StreamKind::Work,
            json!({"request": "r1", "project": "p1", "body": {}}),
        )
        .await;

    let response = fx.test_channel.recv_response("algo", StreamKind::Work).await;
    assert_eq!(response.request, "r1");
    assert_eq!(response.status, STATUS_ERROR);
    assert_eq!(response.info, INFO_EXEC_ERROR);
    assert!(response.detail.contains("execution blew up"));
}

#[tokio::test]
async fn missing_correlation_id_is_rejected_without_dispatch() {
    let fx = fixture().await;
    let handler = RecordingHandler::new("algo", HandlerKind::Algorithm, RequestFormat::Typed);
    let _session = fx.start(Arc::clone(&handler)).await;

    fx.test_channel
        .send_frame(
            "algo",
            StreamKind::Work,
            json!({"project": "p1", "body": {}}),
        )
        .await;

    let response = fx.test_channel.recv_response("algo", StreamKind::Work).await;
    assert_eq!(response.status, STATUS_ERROR);
    assert_eq!(response.info, INFO_BAD_REQUEST);
    assert_eq!(handler.executions(), 0, "handler never invoked");
}

#[tokio::test]
async fn tenant_scoped_kind_requires_project() {
    let fx = fixture().await;
    let handler = RecordingHandler::new("algo", HandlerKind::Algorithm, RequestFormat::Typed);
    let _session = fx.start(Arc::clone(&handler)).await;

    fx.test_channel
        .send_frame("algo", StreamKind::Work, json!({"request": "r1", "body": {}}))
        .await;

    let response = fx.test_channel.recv_response("algo", StreamKind::Work).await;
    assert_eq!(response.status, STATUS_ERROR);
    assert_eq!(response.info, INFO_BAD_REQUEST);
    assert_eq!(handler.executions(), 0);
}

#[tokio::test]
async fn flow_extension_executes_without_project() {
    let fx = fixture().await;
    let handler = RecordingHandler::new("ext", HandlerKind::FlowExtension, RequestFormat::Map);
    let _session = fx.start(Arc::clone(&handler)).await;

    fx.test_channel
        .send_frame("ext", StreamKind::Work, json!({"request": "r1", "body": {"k": 1}}))
        .await;

    let response = fx.test_channel.recv_response("ext", StreamKind::Work).await;
    assert_eq!(response.status, STATUS_OK);
    assert_eq!(handler.executions(), 1);
}

#[tokio::test]
async fn malformed_work_frame_is_answered_with_400() {
    let fx = fixture().await;
    let handler = RecordingHandler::new("ext", HandlerKind::FlowExtension, RequestFormat::Map);
    let _session = fx.start(Arc::clone(&handler)).await;

    fx.test_channel
        .send_raw("ext", StreamKind::Work, b"{definitely not json")
        .await;

    let response = fx.test_channel.recv_response("ext", StreamKind::Work).await;
    assert_eq!(response.status, STATUS_ERROR);
    assert_eq!(response.info, INFO_BAD_REQUEST);
    assert_eq!(handler.executions(), 0);
}

#[tokio::test]
async fn schema_query_is_answered_inline() {
    let fx = fixture().await;
    let handler = RecordingHandler::new("ext", HandlerKind::FlowExtension, RequestFormat::Map);
    let _session = fx.start(Arc::clone(&handler)).await;

    fx.test_channel
        .send_frame("ext", StreamKind::Control, json!({"request": "c1"}))
        .await;

    let response = fx.test_channel.recv_response("ext", StreamKind::Control).await;
    assert_eq!(response.request, "c1");
    assert_eq!(response.status, STATUS_OK);
    assert_eq!(response.result, Some(json!("schema-ext")));
}

#[tokio::test]
async fn schema_failure_is_answered_with_400() {
    let fx = fixture().await;
    let handler = RecordingHandler::new("ext", HandlerKind::FlowExtension, RequestFormat::Map);
    handler.fail_schema.store(true, Ordering::SeqCst);
    let _session = fx.start(Arc::clone(&handler)).await;

    fx.test_channel
        .send_frame("ext", StreamKind::Control, json!({"request": "c1"}))
        .await;

    let response = fx.test_channel.recv_response("ext", StreamKind::Control).await;
    assert_eq!(response.status, STATUS_ERROR);
    assert!(response.detail.contains("schema unavailable"));
}

#[tokio::test]
async fn close_is_idempotent() {
    let fx = fixture().await;
    let handler = RecordingHandler::new("ext", HandlerKind::FlowExtension, RequestFormat::Map);
    let session = fx.start(handler).await;

    session.close();
    session.close();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn peer_close_is_reported_to_the_supervisor() {
    let mut fx = fixture().await;
    let handler = RecordingHandler::new("ext", HandlerKind::FlowExtension, RequestFormat::Map);
    let _session = fx.start(handler).await;

    fx.test_channel.close_peer("ext", StreamKind::Work).await;

    let reason = tokio::time::timeout(Duration::from_secs(5), fx.closed_rx.recv())
        .await
        .expect("notification within timeout")
        .expect("channel open");
    assert_eq!(
        reason,
        ReconnectReason::StreamClosed {
            handler_id: "ext".to_owned()
        }
    );
}

#[tokio::test]
async fn failed_stream_registration_surfaces_to_the_caller() {
    let config = UplinkConfig::from_toml_str("endpoint = \"orchestrator:7001\"").expect("config");
    let transport = TestTransport::new();
    transport.script.fail_streams_for("ext");
    let channel = transport.connect("orchestrator:7001").await.expect("connect");
    let (closed_tx, _closed_rx) = mpsc::channel(8);

    let handler = RecordingHandler::new("ext", HandlerKind::FlowExtension, RequestFormat::Map);
    let result = StreamSession::start(
        &channel,
        handler,
        Arc::new(Dispatcher::new(&config)),
        closed_tx,
    )
    .await;
    assert!(result.is_err(), "registration failure is not silent");
}
