//! Worker Pool Integration Tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use streamscribe::core::WorkerPool;
use streamscribe::ingest::IngestError;

#[tokio::test]
async fn test_pool_runs_queued_jobs() {
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(20)));
    let (pool, mut outcomes) = WorkerPool::start(ingestor.clone(), 2, 8);

    for i in 0..4 {
        pool.submit(&format!("ok://{}", i), &format!("job-{}", i)).unwrap();
    }
    pool.close();

    let mut finished = Vec::new();
    while let Some(outcome) = outcomes.recv().await {
        assert!(outcome.result.is_ok());
        finished.push(outcome.job_id);
    }
    finished.sort();

    assert_eq!(finished, vec!["job-0", "job-1", "job-2", "job-3"]);
    assert!(ingestor.max_running() <= 2);
}

#[tokio::test]
async fn test_full_queue_refuses_instead_of_blocking() {
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(10)));
    let (pool, _outcomes) = WorkerPool::start(ingestor.clone(), 1, 1);

    pool.submit("hang://running", "job-running").unwrap();
    assert!(eventually(Duration::from_secs(5), || ingestor.running() == 1).await);

    pool.submit("hang://queued", "job-queued").unwrap();
    let refused = pool.submit("hang://extra", "job-extra");
    assert!(matches!(refused, Err(IngestError::QueueSaturated)));

    pool.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_submit_validates_input() {
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(10)));
    let (pool, _outcomes) = WorkerPool::start(ingestor, 1, 4);

    assert!(matches!(pool.submit(" ", ""), Err(IngestError::InvalidInput(_))));
    assert!(matches!(
        pool.submit("ok://x", "a/b"),
        Err(IngestError::InvalidInput(_))
    ));

    let generated = pool.submit("ok://x", "").unwrap();
    assert!(generated.starts_with("job-"));
    pool.close();
    pool.wait().await;
}

#[tokio::test]
async fn test_closed_pool_refuses_jobs() {
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(10)));
    let (pool, _outcomes) = WorkerPool::start(ingestor, 1, 4);

    pool.close();
    assert!(matches!(
        pool.submit("ok://late", "job-late"),
        Err(IngestError::Cancelled)
    ));
}

#[tokio::test]
async fn test_stop_cancels_running_jobs() {
    let ingestor = Arc::new(FakeIngestor::new(Duration::from_millis(10)));
    let (pool, mut outcomes) = WorkerPool::start(ingestor.clone(), 1, 4);

    pool.submit("hang://live", "job-live").unwrap();
    assert!(eventually(Duration::from_secs(5), || ingestor.running() == 1).await);

    pool.stop(Duration::from_secs(5)).await.unwrap();

    let outcome = outcomes.recv().await.unwrap();
    assert_eq!(outcome.job_id, "job-live");
    assert!(matches!(outcome.result, Err(IngestError::Cancelled)));
    assert!(outcomes.recv().await.is_none());
}
