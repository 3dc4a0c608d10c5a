//! Log output of the dispatcher, captured with a test layer.

use dispatch_throttle::infrastructure::mocks::{MockCaptureLayer, MockTransport};
use dispatch_throttle::{
    BucketRegistry, Clock, Dispatcher, RateEstimator, SoftWaitPolicy, TokioClock,
    TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

fn capture() -> (MockCaptureLayer, tracing::subscriber::DefaultGuard) {
    let capture = MockCaptureLayer::new();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}

fn dispatcher(transport: &MockTransport) -> Dispatcher<BucketRegistry, MockTransport> {
    let registry = BucketRegistry::builder()
        .with_clock(Arc::new(TokioClock::new()))
        .build();
    Dispatcher::builder()
        .with_soft_wait_policy(SoftWaitPolicy::Never)
        .build(Arc::new(registry), Arc::new(transport.clone()))
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_transmission_logged_at_debug() {
    let (capture, _guard) = capture();
    let transport = MockTransport::new();

    dispatcher(&transport)
        .send("channels/3/messages", "hello")
        .await
        .unwrap();

    let sends: Vec<_> = capture
        .at_level(Level::DEBUG)
        .into_iter()
        .filter(|e| e.message == "sending batch")
        .collect();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].field("endpoint"), Some("channels/3/messages"));
    assert_eq!(sends[0].field("payloads"), Some("1"));
    assert_eq!(sends[0].field("chars"), Some("5"));
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_logged_at_warn() {
    let (capture, _guard) = capture();
    let transport = MockTransport::new();
    transport.push_error(TransportError::new("connection refused"));

    let result = dispatcher(&transport)
        .send("channels/4/messages", "hello")
        .await;
    assert!(result.is_err());

    let warnings = capture.at_level(Level::WARN);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field("endpoint"), Some("channels/4/messages"));
    assert_eq!(
        warnings[0].field("error"),
        Some("transport failed: connection refused")
    );
}

#[tokio::test(start_paused = true)]
async fn test_spawned_failure_still_logged() {
    let (capture, _guard) = capture();
    let transport = MockTransport::new();
    transport.push_error(TransportError::new("timed out").with_status(504));

    let handle = dispatcher(&transport).spawn_send("channels/5/messages", "hello");
    drop(handle);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(transport.calls(), 1);
    assert_eq!(capture.at_level(Level::WARN).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hard_wait_logged_at_trace() {
    let (capture, _guard) = capture();
    let transport = MockTransport::new();
    let dispatcher = dispatcher(&transport);
    {
        let bucket = dispatcher.estimator().bucket("channels/6/messages");
        let mut state = bucket.lock().await;
        state.set_remaining(0);
        state.set_reset_at(TokioClock::new().now() + Duration::from_millis(1500));
    }

    dispatcher.send("channels/6/messages", "hello").await.unwrap();

    let waits: Vec<_> = capture
        .at_level(Level::TRACE)
        .into_iter()
        .filter(|e| e.message == "hard wait before sending")
        .collect();
    assert_eq!(waits.len(), 1);
    assert_eq!(waits[0].field("wait_ms"), Some("1500"));
}
