//! Durable SQL-backed job queue
//!
//! Producers [`push`](JobQueue::push) opaque payloads with an `eta`; any number
//! of consumers [`pop`](JobQueue::pop) the oldest due job. A claim (select +
//! delete) runs inside one transaction, so a job is handed to exactly one
//! consumer and a failed claim leaves the queue untouched.
//!
//! Two backends share the [`JobQueue`] contract:
//!
//! - [`PgJobQueue`] (PostgreSQL) for multi-process deployments
//! - [`SqliteJobQueue`] (SQLite) for single-host deployments and tests
//!
//! Each backend implements both [`ClaimStrategy`] variants.
//!
//! # Example
//!
//! ```no_run
//! use eml_queue::{connect, JobQueue, QueueConfig};
//!
//! # async fn example() -> eml_queue::QueueResult<()> {
//! let queue = connect(&QueueConfig::new("sqlite://queue.db")).await?;
//! queue.init().await?;
//!
//! queue.push(br#"{"job":"airports"}"#, chrono::Utc::now().timestamp()).await?;
//!
//! match queue.pop().await? {
//!     Some(item) => tracing::info!(bytes = item.len(), "Claimed job"),
//!     None => tracing::info!("Queue is empty"),
//! }
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod job;
pub mod postgres;
mod schema;
pub mod sqlite;

pub use config::{connect, QueueConfig};
pub use error::{QueueError, QueueResult};
pub use job::{ClaimStrategy, Job, JobQueue};
pub use postgres::PgJobQueue;
pub use sqlite::SqliteJobQueue;
