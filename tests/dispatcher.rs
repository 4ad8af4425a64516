//! Dispatcher Integration Tests
//!
//! Runs the dispatcher against the in-process bus and checks how every
//! message is settled: acks, rejects, lease extensions, and shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;

use common::*;
use streamscribe::bus::{DeliveryOutcome, EventBus, MemoryBus, RequestPublisher};
use streamscribe::core::{
    DispatchError, Dispatcher, DispatcherConfig, DispatcherState, ServiceConfig, TranscriptionService,
};
use streamscribe::domain::IngestionRequest;

const SETTLE: Duration = Duration::from_secs(5);

async fn publish(bus: &MemoryBus, url: &str, job_id: &str) {
    let payload = serde_json::to_vec(&IngestionRequest::new(url, job_id)).unwrap();
    bus.publish(REQUEST_SUBJECT, Bytes::from(payload)).await.unwrap();
}

fn dispatcher(bus: &MemoryBus, ingestor: Arc<FakeIngestor>, config: DispatcherConfig) -> Dispatcher {
    Dispatcher::new(Arc::new(bus.clone()), ingestor, config)
}

#[tokio::test]
async fn test_start_registers_stream_and_consumer() {
    let bus = MemoryBus::new();
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(10)));
    let dispatcher = dispatcher(&bus, ingestor, dispatcher_config(2));

    assert_eq!(dispatcher.state(), DispatcherState::Idle);
    dispatcher.start().await.unwrap();
    assert_eq!(dispatcher.state(), DispatcherState::Running);
    assert_eq!(
        bus.stream_subjects("INGEST"),
        Some(vec![REQUEST_SUBJECT.to_string(), SEGMENT_SUBJECT.to_string()])
    );

    dispatcher.stop(SETTLE).await.unwrap();
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    assert_eq!(bus.deleted_consumers(), vec!["transcribe-dispatcher".to_string()]);
}

#[tokio::test]
async fn test_start_extends_existing_stream() {
    let bus = MemoryBus::new();
    bus.ensure_stream("INGEST", &["news.*".to_string()]).await.unwrap();
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(10)));
    publish(&bus, "ok://a", "job-a").await;

    let dispatcher = dispatcher(&bus, ingestor, dispatcher_config(1));
    dispatcher.start().await.unwrap();
    assert_eq!(
        bus.stream_subjects("INGEST"),
        Some(vec![
            "news.*".to_string(),
            REQUEST_SUBJECT.to_string(),
            SEGMENT_SUBJECT.to_string()
        ])
    );

    assert!(bus.wait_for_settled(1, SETTLE).await);
    assert_eq!(bus.outcomes(1), vec![DeliveryOutcome::Acked]);
    dispatcher.stop(SETTLE).await.unwrap();
}

#[tokio::test]
async fn test_lifecycle_errors() {
    let bus = MemoryBus::new();
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(10)));
    let dispatcher = dispatcher(&bus, ingestor, dispatcher_config(1));

    assert!(matches!(
        dispatcher.stop(SETTLE).await,
        Err(DispatchError::NotStarted)
    ));

    dispatcher.start().await.unwrap();
    assert!(matches!(
        dispatcher.start().await,
        Err(DispatchError::AlreadyStarted)
    ));

    dispatcher.stop(SETTLE).await.unwrap();
    // Stopping twice is a no-op
    dispatcher.stop(SETTLE).await.unwrap();
}

#[tokio::test]
async fn test_success_acked_failure_rejected() {
    let bus = MemoryBus::new();
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(10)));
    publish(&bus, "ok://a", "job-a").await;
    publish(&bus, "fail://b", "job-b").await;

    let dispatcher = dispatcher(&bus, ingestor.clone(), dispatcher_config(2));
    dispatcher.start().await.unwrap();
    assert!(bus.wait_for_settled(2, SETTLE).await);

    assert_eq!(bus.outcomes(1), vec![DeliveryOutcome::Acked]);
    assert_eq!(bus.outcomes(2), vec![DeliveryOutcome::Rejected]);
    assert_eq!(ingestor.calls(), 2);

    dispatcher.stop(SETTLE).await.unwrap();
}

#[tokio::test]
async fn test_malformed_payloads_rejected_without_running() {
    let bus = MemoryBus::new();
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(10)));
    bus.publish(REQUEST_SUBJECT, Bytes::from_static(b"not json"))
        .await
        .unwrap();
    bus.publish(REQUEST_SUBJECT, Bytes::from_static(br#"{"job_id":"no-url"}"#))
        .await
        .unwrap();
    publish(&bus, "ok://after", "job-after").await;

    let dispatcher = dispatcher(&bus, ingestor.clone(), dispatcher_config(1));
    dispatcher.start().await.unwrap();
    assert!(bus.wait_for_settled(3, SETTLE).await);

    assert_eq!(bus.outcomes(1), vec![DeliveryOutcome::Rejected]);
    assert_eq!(bus.outcomes(2), vec![DeliveryOutcome::Rejected]);
    // Reading continued past the bad messages
    assert_eq!(bus.outcomes(3), vec![DeliveryOutcome::Acked]);
    assert_eq!(ingestor.calls(), 1);

    dispatcher.stop(SETTLE).await.unwrap();
}

#[tokio::test]
async fn test_concurrency_cap() {
    let bus = MemoryBus::new();
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(100)));
    for i in 0..6 {
        publish(&bus, &format!("ok://{}", i), &format!("job-{}", i)).await;
    }

    let dispatcher = dispatcher(&bus, ingestor.clone(), dispatcher_config(2));
    dispatcher.start().await.unwrap();
    assert!(bus.wait_for_settled(6, SETTLE).await);

    assert_eq!(ingestor.max_running(), 2);
    assert_eq!(bus.count(DeliveryOutcome::Acked), 6);
    assert_eq!(bus.count(DeliveryOutcome::Rejected), 0);

    dispatcher.stop(SETTLE).await.unwrap();
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn test_long_job_extends_lease() {
    let bus = MemoryBus::new();
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(220)));
    publish(&bus, "ok://slow", "job-slow").await;

    let config = DispatcherConfig {
        heartbeat: Duration::from_millis(50),
        ..dispatcher_config(1)
    };
    let dispatcher = dispatcher(&bus, ingestor, config);
    dispatcher.start().await.unwrap();
    assert!(bus.wait_for_settled(1, SETTLE).await);

    let outcomes = bus.outcomes(1);
    let extensions = outcomes
        .iter()
        .filter(|o| **o == DeliveryOutcome::LeaseExtended)
        .count();
    assert!(extensions >= 2, "only {} lease extensions", extensions);
    assert_eq!(outcomes.last(), Some(&DeliveryOutcome::Acked));

    dispatcher.stop(SETTLE).await.unwrap();
}

#[tokio::test]
async fn test_lease_extension_failure_is_not_fatal() {
    let bus = MemoryBus::new();
    bus.set_fail_extend(true);
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(220)));
    publish(&bus, "ok://slow", "job-slow").await;

    let config = DispatcherConfig {
        heartbeat: Duration::from_millis(50),
        ..dispatcher_config(1)
    };
    let dispatcher = dispatcher(&bus, ingestor.clone(), config);
    dispatcher.start().await.unwrap();
    assert!(bus.wait_for_settled(1, SETTLE).await);

    // Every extension failed, yet the job ran to completion and was acked once
    assert_eq!(bus.outcomes(1), vec![DeliveryOutcome::Acked]);
    assert_eq!(bus.count(DeliveryOutcome::Rejected), 0);
    assert_eq!(ingestor.calls(), 1);

    dispatcher.stop(SETTLE).await.unwrap();
}

#[tokio::test]
async fn test_zero_heartbeat_falls_back_to_default() {
    let bus = MemoryBus::new();
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(30)));
    publish(&bus, "ok://quick", "job-quick").await;

    let config = DispatcherConfig {
        heartbeat: Duration::ZERO,
        ..dispatcher_config(1)
    };
    let dispatcher = dispatcher(&bus, ingestor, config);
    dispatcher.start().await.unwrap();
    assert!(bus.wait_for_settled(1, SETTLE).await);

    assert_eq!(bus.outcomes(1), vec![DeliveryOutcome::Acked]);
    dispatcher.stop(SETTLE).await.unwrap();
}

#[tokio::test]
async fn test_missing_job_id_resolved_before_running() {
    let bus = MemoryBus::new();
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(10)));
    publish(&bus, "fail://anonymous", "").await;
    publish(&bus, "ok://named", "job-named").await;

    let dispatcher = dispatcher(&bus, ingestor.clone(), dispatcher_config(1));
    dispatcher.start().await.unwrap();
    assert!(bus.wait_for_settled(2, SETTLE).await);

    let job_ids = ingestor.job_ids();
    assert_eq!(job_ids.len(), 2);
    assert!(job_ids[0].starts_with("job-"), "got {:?}", job_ids[0]);
    assert_eq!(job_ids[1], "job-named");

    dispatcher.stop(SETTLE).await.unwrap();
}

#[tokio::test]
async fn test_quick_job_never_extends_lease() {
    let bus = MemoryBus::new();
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(10)));
    publish(&bus, "ok://quick", "job-quick").await;

    let dispatcher = dispatcher(&bus, ingestor, dispatcher_config(1));
    dispatcher.start().await.unwrap();
    assert!(bus.wait_for_settled(1, SETTLE).await);

    assert_eq!(bus.outcomes(1), vec![DeliveryOutcome::Acked]);
    dispatcher.stop(SETTLE).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_rejects_interrupted_job() {
    let bus = MemoryBus::new();
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(10)));
    publish(&bus, "hang://live", "job-live").await;

    let dispatcher = dispatcher(&bus, ingestor.clone(), dispatcher_config(1));
    dispatcher.start().await.unwrap();
    assert!(eventually(SETTLE, || ingestor.running() == 1).await);
    assert_eq!(dispatcher.in_flight(), 1);

    dispatcher.stop(SETTLE).await.unwrap();

    assert_eq!(bus.outcomes(1), vec![DeliveryOutcome::Rejected]);
    assert_eq!(ingestor.running(), 0);
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn test_shutdown_can_ack_interrupted_job() {
    let bus = MemoryBus::new();
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(10)));
    publish(&bus, "hang://live", "job-live").await;

    let config = DispatcherConfig {
        ack_on_shutdown: true,
        ..dispatcher_config(1)
    };
    let dispatcher = dispatcher(&bus, ingestor.clone(), config);
    dispatcher.start().await.unwrap();
    assert!(eventually(SETTLE, || ingestor.running() == 1).await);

    dispatcher.stop(SETTLE).await.unwrap();
    assert_eq!(bus.outcomes(1), vec![DeliveryOutcome::Acked]);
}

#[tokio::test]
async fn test_message_waiting_for_slot_rejected_on_shutdown() {
    let bus = MemoryBus::new();
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(10)));
    publish(&bus, "hang://first", "job-first").await;
    publish(&bus, "hang://second", "job-second").await;

    let dispatcher = dispatcher(&bus, ingestor.clone(), dispatcher_config(1));
    dispatcher.start().await.unwrap();
    assert!(eventually(SETTLE, || ingestor.calls() == 1).await);
    // Give the read loop time to pull the second message
    tokio::time::sleep(Duration::from_millis(50)).await;

    dispatcher.stop(SETTLE).await.unwrap();

    assert_eq!(bus.outcomes(1), vec![DeliveryOutcome::Rejected]);
    assert_eq!(bus.outcomes(2), vec![DeliveryOutcome::Rejected]);
    assert_eq!(ingestor.calls(), 1);
}

#[tokio::test]
async fn test_stop_reports_drain_timeout() {
    let bus = MemoryBus::new();
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_secs(2)));
    publish(&bus, "stubborn://job", "job-stubborn").await;

    let dispatcher = dispatcher(&bus, ingestor.clone(), dispatcher_config(1));
    dispatcher.start().await.unwrap();
    assert!(eventually(SETTLE, || ingestor.running() == 1).await);

    let result = dispatcher.stop(Duration::from_millis(100)).await;
    assert!(matches!(result, Err(DispatchError::DrainTimeout(_))));
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    // The consumer is deregistered even when draining timed out
    assert_eq!(bus.deleted_consumers().len(), 1);
}

#[tokio::test]
async fn test_rejected_message_redelivered() {
    let bus = MemoryBus::with_redelivery();
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(10)));
    publish(&bus, "fail://flaky", "job-flaky").await;

    let dispatcher = dispatcher(&bus, ingestor.clone(), dispatcher_config(1));
    dispatcher.start().await.unwrap();
    assert!(bus.wait_for_settled(2, SETTLE).await);

    assert_eq!(
        bus.outcomes(1),
        vec![DeliveryOutcome::Rejected, DeliveryOutcome::Rejected]
    );
    assert_eq!(ingestor.calls(), 2);

    dispatcher.stop(SETTLE).await.unwrap();
}

#[tokio::test]
async fn test_end_to_end_request_to_segment_events() {
    let temp = TempDir::new().unwrap();
    let harness = Harness::new();
    let bus: Arc<dyn EventBus> = Arc::new(harness.bus.clone());

    let service = TranscriptionService::new(
        harness.caps(),
        script_segmenter(&segments_script(&["first words", "second words"], "exit 0")),
        ServiceConfig {
            work_root: temp.path().to_path_buf(),
            poll_interval: Duration::from_millis(20),
            processor: settings(),
        },
    );
    let dispatcher = Dispatcher::new(bus.clone(), Arc::new(service), dispatcher_config(2));
    dispatcher.start().await.unwrap();

    let publisher = RequestPublisher::new(bus, REQUEST_SUBJECT.to_string());
    let job_id = publisher
        .publish_request("rtmp://studio/live", "evening-news")
        .await
        .unwrap();
    assert_eq!(job_id, "evening-news");

    assert!(harness.bus.wait_for_settled(1, SETTLE).await);
    assert_eq!(harness.bus.count(DeliveryOutcome::Acked), 1);

    let events = harness.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.job_id == "evening-news"));
    assert_eq!(events[1].window_text, "first words second words");
    assert!(temp.path().join("evening-news").is_dir());

    dispatcher.stop(SETTLE).await.unwrap();
}
