//! SQLite queue backend
//!
//! SQLite has no row locks. Every claim opens with `BEGIN IMMEDIATE`, which
//! takes the database write lock up front; competing consumers wait up to the
//! busy timeout and then see a transient [`QueueError::Claim`].

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{ClaimStrategy, JobQueue};
use crate::schema::QueueStatements;

/// Job queue stored in a SQLite table
pub struct SqliteJobQueue {
    pool: SqlitePool,
    strategy: ClaimStrategy,
    sql: QueueStatements,
}

impl SqliteJobQueue {
    /// Wrap an existing pool
    pub fn new(pool: SqlitePool, table: &str, strategy: ClaimStrategy) -> QueueResult<Self> {
        Ok(Self {
            pool,
            strategy,
            sql: QueueStatements::sqlite(table)?,
        })
    }

    /// Open (and create if missing) the database at `config.url`
    pub async fn connect(config: &QueueConfig) -> QueueResult<Self> {
        let in_memory = config.url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .busy_timeout(config.busy_timeout());
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Each connection to `:memory:` is its own database
        let max_connections = if in_memory { 1 } else { config.max_connections };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect_with(options)
            .await?;

        Self::new(pool, &config.table, config.strategy)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn claim_error(&self, source: sqlx::Error) -> QueueError {
        QueueError::Claim {
            table: self.sql.table.clone(),
            source,
        }
    }

    async fn claim_row_lock(
        &self,
        conn: &mut SqliteConnection,
        now: i64,
    ) -> Result<Option<Vec<u8>>, sqlx::Error> {
        let row: Option<(i64, Vec<u8>)> = sqlx::query_as(&self.sql.select_due)
            .bind(now)
            .fetch_optional(&mut *conn)
            .await?;

        let Some((id, item)) = row else {
            return Ok(None);
        };

        let deleted = sqlx::query(&self.sql.delete_by_id)
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if deleted.rows_affected() != 1 {
            return Err(sqlx::Error::RowNotFound);
        }

        debug!(job_id = id, table = %self.sql.table, "Claimed job");
        Ok(Some(item))
    }

    async fn claim_delete_returning(
        &self,
        conn: &mut SqliteConnection,
        now: i64,
    ) -> Result<Option<Vec<u8>>, sqlx::Error> {
        sqlx::query_scalar(&self.sql.delete_due_returning)
            .bind(now)
            .fetch_optional(&mut *conn)
            .await
    }

    async fn rollback(&self, mut conn: PoolConnection<Sqlite>) {
        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
            // Never hand a connection with an open transaction back to the pool
            warn!(error = %e, table = %self.sql.table, "Rollback failed, discarding connection");
            drop(conn.detach());
        }
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn init(&self) -> QueueResult<()> {
        sqlx::query(&self.sql.create_table).execute(&self.pool).await?;
        sqlx::query(&self.sql.create_index).execute(&self.pool).await?;
        debug!(table = %self.sql.table, "Queue table ready");
        Ok(())
    }

    async fn push(&self, item: &[u8], eta: i64) -> QueueResult<i64> {
        let result = sqlx::query(&self.sql.insert)
            .bind(eta)
            .bind(item)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn pop_due(&self, now: i64) -> QueueResult<Option<Vec<u8>>> {
        let mut conn = self.pool.acquire().await.map_err(|e| self.claim_error(e))?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| self.claim_error(e))?;

        let claimed = match self.strategy {
            ClaimStrategy::RowLock => self.claim_row_lock(&mut conn, now).await,
            ClaimStrategy::DeleteReturning => self.claim_delete_returning(&mut conn, now).await,
        };

        match claimed {
            Ok(item) => match sqlx::query("COMMIT").execute(&mut *conn).await {
                Ok(_) => Ok(item),
                Err(e) => {
                    self.rollback(conn).await;
                    Err(self.claim_error(e))
                }
            },
            Err(e) => {
                self.rollback(conn).await;
                Err(self.claim_error(e))
            }
        }
    }

    async fn len(&self) -> QueueResult<i64> {
        let count: i64 = sqlx::query_scalar(&self.sql.count)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn clear(&self) -> QueueResult<u64> {
        let result = sqlx::query(&self.sql.clear).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    fn strategy(&self) -> ClaimStrategy {
        self.strategy
    }

    fn table(&self) -> &str {
        &self.sql.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_queue(strategy: ClaimStrategy) -> SqliteJobQueue {
        let config = QueueConfig::new("sqlite::memory:").with_strategy(strategy);
        let queue = SqliteJobQueue::connect(&config).await.unwrap();
        queue.init().await.unwrap();
        queue
    }

    #[tokio::test]
    async fn test_push_returns_increasing_ids() {
        let queue = memory_queue(ClaimStrategy::RowLock).await;
        let first = queue.push(b"a", 0).await.unwrap();
        let second = queue.push(b"b", 0).await.unwrap();
        assert!(second > first);
        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_pop_on_empty_queue_is_none() {
        for strategy in [ClaimStrategy::RowLock, ClaimStrategy::DeleteReturning] {
            let queue = memory_queue(strategy).await;
            assert_eq!(queue.pop_due(100).await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_clear_reports_removed_rows() {
        let queue = memory_queue(ClaimStrategy::DeleteReturning).await;
        queue.push(b"a", 0).await.unwrap();
        queue.push(b"b", 5).await.unwrap();
        assert_eq!(queue.clear().await.unwrap(), 2);
        assert_eq!(queue.len().await.unwrap(), 0);
    }
}
