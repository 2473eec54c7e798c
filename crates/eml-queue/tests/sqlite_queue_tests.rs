//! SQLite backend integration tests
//!
//! Each test gets its own database file in a temporary directory.

mod common;

use std::sync::Arc;

use common::init_test_tracing;
use eml_queue::{connect, ClaimStrategy, JobQueue, QueueConfig, QueueError, SqliteJobQueue};
use tempfile::TempDir;

const STRATEGIES: [ClaimStrategy; 2] = [ClaimStrategy::RowLock, ClaimStrategy::DeleteReturning];

async fn file_queue(dir: &TempDir, strategy: ClaimStrategy) -> Arc<SqliteJobQueue> {
    let url = format!("sqlite://{}", dir.path().join("queue.db").display());
    let config = QueueConfig::new(url).with_strategy(strategy);
    let queue = SqliteJobQueue::connect(&config).await.unwrap();
    queue.init().await.unwrap();
    Arc::new(queue)
}

#[tokio::test]
async fn test_claims_follow_eta_then_insertion_order() {
    init_test_tracing();
    for strategy in STRATEGIES {
        let dir = TempDir::new().unwrap();
        common::check_due_order(file_queue(&dir, strategy).await).await;
    }
}

#[tokio::test]
async fn test_claims_sorted_by_eta() {
    for strategy in STRATEGIES {
        let dir = TempDir::new().unwrap();
        common::check_eta_order(file_queue(&dir, strategy).await).await;
    }
}

#[tokio::test]
async fn test_future_jobs_are_not_claimed() {
    for strategy in STRATEGIES {
        let dir = TempDir::new().unwrap();
        common::check_future_jobs_wait(file_queue(&dir, strategy).await).await;
    }
}

#[tokio::test]
async fn test_binary_payload_is_preserved() {
    let dir = TempDir::new().unwrap();
    common::check_binary_payload(file_queue(&dir, ClaimStrategy::RowLock).await).await;
}

#[tokio::test]
async fn test_init_twice_keeps_jobs() {
    let dir = TempDir::new().unwrap();
    common::check_init_is_idempotent(file_queue(&dir, ClaimStrategy::DeleteReturning).await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_surplus_consumers_observe_empty() {
    init_test_tracing();
    for strategy in STRATEGIES {
        let dir = TempDir::new().unwrap();
        common::check_single_claims(file_queue(&dir, strategy).await, 8, 3).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consumers_never_share_a_job() {
    init_test_tracing();
    for strategy in STRATEGIES {
        let dir = TempDir::new().unwrap();
        common::check_exclusive_claims(file_queue(&dir, strategy).await, 6, 60).await;
    }
}

#[tokio::test]
async fn test_failed_claim_rolls_back() {
    init_test_tracing();
    for strategy in STRATEGIES {
        let dir = TempDir::new().unwrap();
        let queue = file_queue(&dir, strategy).await;
        queue.push(b"survivor", 0).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER refuse_claim BEFORE DELETE ON eml_jobs \
             BEGIN SELECT RAISE(ABORT, 'claim refused'); END",
        )
        .execute(queue.pool())
        .await
        .unwrap();

        let err = queue.pop_due(0).await.unwrap_err();
        assert!(matches!(err, QueueError::Claim { .. }), "unexpected error: {err}");
        assert!(err.is_transient());
        assert_eq!(queue.len().await.unwrap(), 1);

        sqlx::query("DROP TRIGGER refuse_claim")
            .execute(queue.pool())
            .await
            .unwrap();

        // The connection that saw the failure is usable again
        assert_eq!(queue.pop_due(0).await.unwrap(), Some(b"survivor".to_vec()));
    }
}

#[tokio::test]
async fn test_custom_table_is_isolated() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("queue.db").display());

    let jobs = connect(&QueueConfig::new(url.clone())).await.unwrap();
    let other = connect(&QueueConfig::new(url).with_table("other_jobs")).await.unwrap();
    jobs.init().await.unwrap();
    other.init().await.unwrap();

    jobs.push(b"a", 0).await.unwrap();

    assert_eq!(other.table(), "other_jobs");
    assert_eq!(other.pop().await.unwrap(), None);
    assert_eq!(jobs.pop().await.unwrap(), Some(b"a".to_vec()));
}

#[tokio::test]
async fn test_invalid_table_name_is_rejected() {
    let config = QueueConfig::new("sqlite::memory:").with_table("jobs; DROP TABLE users");
    let err = SqliteJobQueue::connect(&config).await.err().unwrap();
    assert!(matches!(err, QueueError::InvalidTable(_)));
}

#[tokio::test]
async fn test_unsupported_url_is_rejected() {
    let err = connect(&QueueConfig::new("mysql://localhost/eml")).await.err().unwrap();
    assert!(matches!(err, QueueError::UnsupportedUrl(_)));
}
