//! Graph version records
//!
//! Every SPARQL load writes into a fresh named graph `{graph_name}#{unix_seconds}`.
//! The registry remembers which graphs exist per name so that older
//! versions can be cleared once the new one is complete.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::AnyPool;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::error::RegistryError;
use eml_common::sql::validate_identifier;

/// Default table for graph version records.
pub const DEFAULT_GRAPH_TABLE: &str = "graphs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphVersion {
    pub graph_name: String,
    pub graph_id: String,
    pub version: DateTime<Utc>,
}

impl GraphVersion {
    pub fn new(graph_name: impl Into<String>, at: DateTime<Utc>) -> Self {
        let graph_name = graph_name.into();
        Self {
            graph_id: format!("{graph_name}#{}", at.timestamp()),
            graph_name,
            version: at,
        }
    }
}

#[async_trait]
pub trait GraphRegistry: Send + Sync {
    async fn init(&self) -> Result<(), RegistryError>;

    /// Insert or replace the record for `version.graph_id`
    async fn save(&self, version: &GraphVersion) -> Result<(), RegistryError>;

    /// All versions for `graph_name`, oldest first
    async fn list(&self, graph_name: &str) -> Result<Vec<GraphVersion>, RegistryError>;

    /// Returns whether a record was removed
    async fn delete(&self, graph_id: &str) -> Result<bool, RegistryError>;
}

/// Process-local registry for tests and runs without a database
#[derive(Debug, Default)]
pub struct MemoryGraphRegistry {
    versions: Mutex<Vec<GraphVersion>>,
}

impl MemoryGraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn versions(&self) -> std::sync::MutexGuard<'_, Vec<GraphVersion>> {
        self.versions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl GraphRegistry for MemoryGraphRegistry {
    async fn init(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn save(&self, version: &GraphVersion) -> Result<(), RegistryError> {
        let mut versions = self.versions();
        versions.retain(|v| v.graph_id != version.graph_id);
        versions.push(version.clone());
        Ok(())
    }

    async fn list(&self, graph_name: &str) -> Result<Vec<GraphVersion>, RegistryError> {
        let mut matching: Vec<GraphVersion> = self
            .versions()
            .iter()
            .filter(|v| v.graph_name == graph_name)
            .cloned()
            .collect();
        matching.sort_by_key(|v| v.version);
        Ok(matching)
    }

    async fn delete(&self, graph_id: &str) -> Result<bool, RegistryError> {
        let mut versions = self.versions();
        let before = versions.len();
        versions.retain(|v| v.graph_id != graph_id);
        Ok(versions.len() != before)
    }
}

/// Registry stored in a PostgreSQL or SQLite table through sqlx's `Any` driver
///
/// For a SQLite file that may not exist yet, use a `?mode=rwc` URL.
pub struct SqlGraphRegistry {
    pool: AnyPool,
    create_table: String,
    create_index: String,
    upsert: String,
    select_by_name: String,
    delete_by_id: String,
}

impl SqlGraphRegistry {
    pub fn new(pool: AnyPool, table: &str) -> Result<Self, RegistryError> {
        let t = validate_identifier(table)?;
        Ok(Self {
            pool,
            create_table: format!(
                "CREATE TABLE IF NOT EXISTS {t} (\
                 graph_id TEXT PRIMARY KEY, \
                 graph_name TEXT NOT NULL, \
                 version TEXT NOT NULL)"
            ),
            create_index: format!("CREATE INDEX IF NOT EXISTS {t}_name_idx ON {t} (graph_name)"),
            upsert: format!(
                "INSERT INTO {t} (graph_id, graph_name, version) VALUES ($1, $2, $3) \
                 ON CONFLICT (graph_id) DO UPDATE SET graph_name = excluded.graph_name, version = excluded.version"
            ),
            select_by_name: format!(
                "SELECT graph_id, graph_name, version FROM {t} WHERE graph_name = $1 ORDER BY version, graph_id"
            ),
            delete_by_id: format!("DELETE FROM {t} WHERE graph_id = $1"),
        })
    }

    pub async fn connect(url: &str, table: &str) -> Result<Self, RegistryError> {
        install_default_drivers();

        // Each connection to `:memory:` is its own database
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Self::new(pool, table)
    }
}

#[async_trait]
impl GraphRegistry for SqlGraphRegistry {
    async fn init(&self) -> Result<(), RegistryError> {
        sqlx::query(&self.create_table).execute(&self.pool).await?;
        sqlx::query(&self.create_index).execute(&self.pool).await?;
        Ok(())
    }

    async fn save(&self, version: &GraphVersion) -> Result<(), RegistryError> {
        sqlx::query(&self.upsert)
            .bind(&version.graph_id)
            .bind(&version.graph_name)
            .bind(version.version.to_rfc3339_opts(SecondsFormat::Secs, true))
            .execute(&self.pool)
            .await?;
        debug!(graph_id = %version.graph_id, "Graph version saved");
        Ok(())
    }

    async fn list(&self, graph_name: &str) -> Result<Vec<GraphVersion>, RegistryError> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(&self.select_by_name)
            .bind(graph_name)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(graph_id, graph_name, version)| {
                let version = DateTime::parse_from_rfc3339(&version)
                    .map_err(|_| RegistryError::InvalidVersion {
                        graph_id: graph_id.clone(),
                        value: version.clone(),
                    })?
                    .with_timezone(&Utc);
                Ok(GraphVersion {
                    graph_name,
                    graph_id,
                    version,
                })
            })
            .collect()
    }

    async fn delete(&self, graph_id: &str) -> Result<bool, RegistryError> {
        let result = sqlx::query(&self.delete_by_id)
            .bind(graph_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
