//! Queue contract checks shared by the SQLite and PostgreSQL test suites
//!
//! Each check takes a freshly initialized, empty queue.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use eml_queue::JobQueue;

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,eml_queue=debug,sqlx=warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Claims return the lowest eta first and break ties by insertion order
pub async fn check_due_order(queue: Arc<dyn JobQueue>) {
    queue.push(b"late", 30).await.unwrap();
    queue.push(b"early-1", 10).await.unwrap();
    queue.push(b"early-2", 10).await.unwrap();
    queue.push(b"middle", 20).await.unwrap();

    let mut claimed = Vec::new();
    while let Some(item) = queue.pop_due(100).await.unwrap() {
        claimed.push(String::from_utf8(item).unwrap());
    }

    assert_eq!(claimed, vec!["early-1", "early-2", "middle", "late"]);
    assert_eq!(queue.len().await.unwrap(), 0);
}

/// Jobs pushed with etas 5, 1, 3 come back as 1, 3, 5
pub async fn check_eta_order(queue: Arc<dyn JobQueue>) {
    for eta in [5, 1, 3] {
        queue.push(eta.to_string().as_bytes(), eta).await.unwrap();
    }

    let mut claimed = Vec::new();
    while let Some(item) = queue.pop_due(10).await.unwrap() {
        claimed.push(String::from_utf8(item).unwrap());
    }
    assert_eq!(claimed, vec!["1", "3", "5"]);
}

/// A job is invisible until `now >= eta`
pub async fn check_future_jobs_wait(queue: Arc<dyn JobQueue>) {
    queue.push(b"tomorrow", 1_000).await.unwrap();

    assert_eq!(queue.pop_due(999).await.unwrap(), None);
    assert_eq!(queue.len().await.unwrap(), 1);

    assert_eq!(queue.pop_due(1_000).await.unwrap(), Some(b"tomorrow".to_vec()));
}

/// Payload bytes survive storage untouched
pub async fn check_binary_payload(queue: Arc<dyn JobQueue>) {
    let payload: Vec<u8> = (0..=255u8).collect();
    queue.push(&payload, 0).await.unwrap();
    assert_eq!(queue.pop_due(0).await.unwrap(), Some(payload));
}

/// `init` may run any number of times without losing jobs
pub async fn check_init_is_idempotent(queue: Arc<dyn JobQueue>) {
    queue.push(b"kept", 0).await.unwrap();
    queue.init().await.unwrap();
    queue.init().await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 1);
}

/// N concurrent consumers drain M jobs; every job goes to exactly one of them
pub async fn check_exclusive_claims(queue: Arc<dyn JobQueue>, consumers: usize, jobs: usize) {
    for i in 0..jobs {
        queue.push(format!("job-{i}").as_bytes(), 0).await.unwrap();
    }

    let mut handles = Vec::with_capacity(consumers);
    for _ in 0..consumers {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            loop {
                match queue.pop_due(0).await {
                    Ok(Some(item)) => mine.push(String::from_utf8(item).unwrap()),
                    Ok(None) => break,
                    Err(e) if e.is_transient() => tokio::task::yield_now().await,
                    Err(e) => panic!("claim failed: {e}"),
                }
            }
            mine
        }));
    }

    let mut all = Vec::new();
    for result in futures::future::join_all(handles).await {
        all.extend(result.unwrap());
    }

    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), jobs, "some job was claimed twice or lost");
    assert_eq!(unique.len(), jobs);
    assert_eq!(queue.len().await.unwrap(), 0);
}

/// N consumers claim once each over K <= N jobs: K succeed, the rest see empty
pub async fn check_single_claims(queue: Arc<dyn JobQueue>, consumers: usize, jobs: usize) {
    assert!(jobs <= consumers);
    for i in 0..jobs {
        queue.push(format!("job-{i}").as_bytes(), 0).await.unwrap();
    }

    let mut handles = Vec::with_capacity(consumers);
    for _ in 0..consumers {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            loop {
                match queue.pop_due(0).await {
                    Ok(claim) => break claim.map(|item| String::from_utf8(item).unwrap()),
                    Err(e) if e.is_transient() => tokio::task::yield_now().await,
                    Err(e) => panic!("claim failed: {e}"),
                }
            }
        }));
    }

    let mut claimed = Vec::new();
    let mut empty = 0;
    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            Some(item) => claimed.push(item),
            None => empty += 1,
        }
    }

    let unique: HashSet<_> = claimed.iter().cloned().collect();
    assert_eq!(claimed.len(), jobs);
    assert_eq!(unique.len(), jobs);
    assert_eq!(empty, consumers - jobs);
    assert_eq!(queue.len().await.unwrap(), 0);
}
