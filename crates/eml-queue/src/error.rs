//! Queue error types

use thiserror::Error;

/// Result type alias for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Errors raised by the job queue
#[derive(Error, Debug)]
pub enum QueueError {
    /// The claim transaction failed and was rolled back; the job (if any)
    /// is still in the queue and the caller may retry.
    #[error("Failed to claim a job from '{table}' (rolled back): {source}")]
    Claim {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid queue table name: {0}")]
    InvalidTable(#[from] eml_common::EmlError),

    #[error("Unsupported queue URL '{0}': expected postgres://, postgresql:// or sqlite:")]
    UnsupportedUrl(String),

    #[error("Invalid claim strategy '{0}': expected 'row_lock' or 'delete_returning'")]
    InvalidStrategy(String),
}

impl QueueError {
    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Claim { .. } => true,
            QueueError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}
