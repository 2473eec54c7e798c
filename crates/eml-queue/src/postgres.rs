//! PostgreSQL queue backend

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgConnection;
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{ClaimStrategy, JobQueue};
use crate::schema::QueueStatements;

/// Job queue stored in a PostgreSQL table
pub struct PgJobQueue {
    pool: PgPool,
    strategy: ClaimStrategy,
    sql: QueueStatements,
}

impl PgJobQueue {
    /// Wrap an existing pool
    pub fn new(pool: PgPool, table: &str, strategy: ClaimStrategy) -> QueueResult<Self> {
        Ok(Self {
            pool,
            strategy,
            sql: QueueStatements::postgres(table)?,
        })
    }

    /// Open a pool from `config.url`
    pub async fn connect(config: &QueueConfig) -> QueueResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect(&config.url)
            .await?;

        Self::new(pool, &config.table, config.strategy)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn claim_error(&self, source: sqlx::Error) -> QueueError {
        QueueError::Claim {
            table: self.sql.table.clone(),
            source,
        }
    }

    /// SELECT ... FOR UPDATE SKIP LOCKED, then DELETE by id
    async fn claim_row_lock(
        &self,
        conn: &mut PgConnection,
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

        // The row lock is held, so anything but one deleted row means the
        // table changed underneath us; abort the claim.
        if deleted.rows_affected() != 1 {
            return Err(sqlx::Error::RowNotFound);
        }

        debug!(job_id = id, table = %self.sql.table, "Claimed job with row lock");
        Ok(Some(item))
    }

    /// LOCK TABLE ... IN EXCLUSIVE MODE, then DELETE ... RETURNING item
    async fn claim_delete_returning(
        &self,
        conn: &mut PgConnection,
        now: i64,
    ) -> Result<Option<Vec<u8>>, sqlx::Error> {
        if let Some(lock) = &self.sql.lock_table {
            sqlx::query(lock).execute(&mut *conn).await?;
        }

        sqlx::query_scalar(&self.sql.delete_due_returning)
            .bind(now)
            .fetch_optional(&mut *conn)
            .await
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn init(&self) -> QueueResult<()> {
        sqlx::query(&self.sql.create_table).execute(&self.pool).await?;
        sqlx::query(&self.sql.create_index).execute(&self.pool).await?;
        debug!(table = %self.sql.table, "Queue table ready");
        Ok(())
    }

    async fn push(&self, item: &[u8], eta: i64) -> QueueResult<i64> {
        let id: i64 = sqlx::query_scalar(&self.sql.insert)
            .bind(eta)
            .bind(item)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn pop_due(&self, now: i64) -> QueueResult<Option<Vec<u8>>> {
        let mut tx = self.pool.begin().await.map_err(|e| self.claim_error(e))?;

        let claimed = match self.strategy {
            ClaimStrategy::RowLock => self.claim_row_lock(&mut tx, now).await,
            ClaimStrategy::DeleteReturning => self.claim_delete_returning(&mut tx, now).await,
        };

        match claimed {
            Ok(item) => {
                // A failed commit drops the transaction, which rolls it back
                tx.commit().await.map_err(|e| self.claim_error(e))?;
                Ok(item)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(
                        error = %rollback,
                        table = %self.sql.table,
                        "Rollback after failed claim also failed"
                    );
                }
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
