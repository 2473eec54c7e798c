//! SQL text for the queue table, per dialect
//!
//! The table name is validated once and the statements are formatted at
//! construction, so claims never rebuild SQL.

use eml_common::sql::validate_identifier;

use crate::error::QueueResult;

pub(crate) struct QueueStatements {
    pub table: String,
    pub create_table: String,
    pub create_index: String,
    pub insert: String,
    /// Oldest due row, locked for the claiming transaction where the dialect supports it
    pub select_due: String,
    pub delete_by_id: String,
    /// Table-level exclusive lock taken before the delete-returning claim
    pub lock_table: Option<String>,
    pub delete_due_returning: String,
    pub count: String,
    pub clear: String,
}

impl QueueStatements {
    pub fn postgres(table: &str) -> QueueResult<Self> {
        let t = validate_identifier(table)?;
        Ok(Self {
            table: t.to_string(),
            create_table: format!(
                "CREATE TABLE IF NOT EXISTS {t} (\
                 id BIGSERIAL PRIMARY KEY, \
                 eta BIGINT NOT NULL, \
                 item BYTEA NOT NULL)"
            ),
            create_index: format!("CREATE INDEX IF NOT EXISTS {t}_eta_id_idx ON {t} (eta, id)"),
            insert: format!("INSERT INTO {t} (eta, item) VALUES ($1, $2) RETURNING id"),
            // SKIP LOCKED: a competing consumer moves on to the next due row
            // instead of blocking on (and then missing) the one being claimed.
            select_due: format!(
                "SELECT id, item FROM {t} WHERE eta <= $1 ORDER BY eta, id LIMIT 1 FOR UPDATE SKIP LOCKED"
            ),
            delete_by_id: format!("DELETE FROM {t} WHERE id = $1"),
            lock_table: Some(format!("LOCK TABLE {t} IN EXCLUSIVE MODE")),
            delete_due_returning: format!(
                "DELETE FROM {t} WHERE id = \
                 (SELECT id FROM {t} WHERE eta <= $1 ORDER BY eta, id LIMIT 1) \
                 RETURNING item"
            ),
            count: format!("SELECT COUNT(*) FROM {t}"),
            clear: format!("DELETE FROM {t}"),
        })
    }

    pub fn sqlite(table: &str) -> QueueResult<Self> {
        let t = validate_identifier(table)?;
        Ok(Self {
            table: t.to_string(),
            // AUTOINCREMENT keeps ids monotonic even after the newest row is claimed
            create_table: format!(
                "CREATE TABLE IF NOT EXISTS {t} (\
                 id INTEGER PRIMARY KEY AUTOINCREMENT, \
                 eta INTEGER NOT NULL, \
                 item BLOB NOT NULL)"
            ),
            create_index: format!("CREATE INDEX IF NOT EXISTS {t}_eta_id_idx ON {t} (eta, id)"),
            insert: format!("INSERT INTO {t} (eta, item) VALUES (?1, ?2)"),
            // Row exclusivity comes from BEGIN IMMEDIATE, SQLite has no row locks
            select_due: format!(
                "SELECT id, item FROM {t} WHERE eta <= ?1 ORDER BY eta, id LIMIT 1"
            ),
            delete_by_id: format!("DELETE FROM {t} WHERE id = ?1"),
            lock_table: None,
            delete_due_returning: format!(
                "DELETE FROM {t} WHERE id = \
                 (SELECT id FROM {t} WHERE eta <= ?1 ORDER BY eta, id LIMIT 1) \
                 RETURNING item"
            ),
            count: format!("SELECT COUNT(*) FROM {t}"),
            clear: format!("DELETE FROM {t}"),
        })
    }
}
