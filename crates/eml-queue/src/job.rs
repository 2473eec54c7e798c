//! Queue contract and core types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};

/// A queued job as stored in the table (`id`, `eta`, `item`)
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Job {
    /// Identity assigned by the store, monotonically increasing
    pub id: i64,
    /// Unix timestamp (seconds) from which the job may be claimed
    pub eta: i64,
    /// Opaque payload
    pub item: Vec<u8>,
}

/// How a consumer claims the oldest due job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStrategy {
    /// Transaction + row-level exclusive lock on the selected row, then
    /// delete by id.
    #[default]
    RowLock,
    /// Exclusive table lock + a single `DELETE ... RETURNING item` statement.
    DeleteReturning,
}

impl ClaimStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStrategy::RowLock => "row_lock",
            ClaimStrategy::DeleteReturning => "delete_returning",
        }
    }
}

impl std::str::FromStr for ClaimStrategy {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "row_lock" | "rowlock" => Ok(ClaimStrategy::RowLock),
            "delete_returning" | "deletereturning" => Ok(ClaimStrategy::DeleteReturning),
            _ => Err(QueueError::InvalidStrategy(s.to_string())),
        }
    }
}

impl std::fmt::Display for ClaimStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable FIFO-by-eta queue shared by concurrent consumers
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Create the queue table and its `(eta, id)` index if absent
    async fn init(&self) -> QueueResult<()>;

    /// Insert a job that becomes claimable once `eta <= now`; returns its id
    async fn push(&self, item: &[u8], eta: i64) -> QueueResult<i64>;

    /// Claim and remove the oldest job with `eta <= now`
    ///
    /// Ordering is ascending `(eta, id)`. `Ok(None)` means no job is due;
    /// `Err(QueueError::Claim { .. })` means the claim was rolled back and
    /// may be retried.
    async fn pop_due(&self, now: i64) -> QueueResult<Option<Vec<u8>>>;

    /// [`pop_due`](Self::pop_due) with the current wall clock
    async fn pop(&self) -> QueueResult<Option<Vec<u8>>> {
        self.pop_due(chrono::Utc::now().timestamp()).await
    }

    /// Number of stored jobs, due or not
    async fn len(&self) -> QueueResult<i64>;

    /// Remove every job
    async fn clear(&self) -> QueueResult<u64>;

    fn strategy(&self) -> ClaimStrategy;

    fn table(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_strategy_from_str() {
        assert_eq!("row_lock".parse::<ClaimStrategy>().unwrap(), ClaimStrategy::RowLock);
        assert_eq!(
            "delete-returning".parse::<ClaimStrategy>().unwrap(),
            ClaimStrategy::DeleteReturning
        );
        assert!("optimistic".parse::<ClaimStrategy>().is_err());
    }

    #[test]
    fn test_claim_strategy_display_round_trips() {
        for strategy in [ClaimStrategy::RowLock, ClaimStrategy::DeleteReturning] {
            assert_eq!(strategy.to_string().parse::<ClaimStrategy>().unwrap(), strategy);
        }
        assert_eq!(ClaimStrategy::default(), ClaimStrategy::RowLock);
    }
}
