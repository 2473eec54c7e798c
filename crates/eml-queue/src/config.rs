//! Queue configuration and backend selection

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{QueueError, QueueResult};
use crate::job::{ClaimStrategy, JobQueue};
use crate::postgres::PgJobQueue;
use crate::sqlite::SqliteJobQueue;

/// Default queue table name.
pub const DEFAULT_QUEUE_TABLE: &str = "eml_jobs";

/// Default maximum connections in the queue pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

/// Default pool acquire timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default time a SQLite claim waits for the write lock, in seconds.
pub const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;

/// Connection and claim settings for a queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// `postgres://…`, `postgresql://…` or `sqlite://path` / `sqlite::memory:`
    pub url: String,
    pub table: String,
    pub strategy: ClaimStrategy,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    /// SQLite only
    pub busy_timeout_secs: u64,
}

impl QueueConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_strategy(mut self, strategy: ClaimStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://eml-queue.db".to_string(),
            table: DEFAULT_QUEUE_TABLE.to_string(),
            strategy: ClaimStrategy::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            busy_timeout_secs: DEFAULT_BUSY_TIMEOUT_SECS,
        }
    }
}

/// Database flavour implied by a queue URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    pub fn from_url(url: &str) -> QueueResult<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Backend::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Backend::Sqlite)
        } else {
            Err(QueueError::UnsupportedUrl(url.to_string()))
        }
    }
}

/// Connect to the queue described by `config`, choosing the backend from the URL
///
/// The table is not created; call [`JobQueue::init`] for that.
pub async fn connect(config: &QueueConfig) -> QueueResult<Arc<dyn JobQueue>> {
    let queue: Arc<dyn JobQueue> = match Backend::from_url(&config.url)? {
        Backend::Postgres => Arc::new(PgJobQueue::connect(config).await?),
        Backend::Sqlite => Arc::new(SqliteJobQueue::connect(config).await?),
    };

    tracing::info!(
        table = queue.table(),
        strategy = %queue.strategy(),
        "Job queue connected"
    );

    Ok(queue)
}
