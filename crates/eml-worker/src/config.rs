//! Worker configuration
//!
//! Loaded from an optional TOML file, then overridden by `EML__`-prefixed
//! environment variables with `__` between nested keys:
//!
//! ```text
//! EML__QUEUE__URL=postgres://localhost/eml
//! EML__QUEUE__STRATEGY=delete_returning
//! EML__WORKER__WORKERS=4
//! EML__DEFINITIONS=/etc/eml/jobs.toml
//! ```

use eml_pipeline::load::versions::DEFAULT_GRAPH_TABLE;
use eml_queue::QueueConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Worker Configuration Constants
// ============================================================================

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 1;

/// Default wait between polls of an empty queue, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default wait after a transient claim failure, in milliseconds.
pub const DEFAULT_CLAIM_BACKOFF_MS: u64 = 250;

/// Default path of the job definitions file.
pub const DEFAULT_DEFINITIONS_PATH: &str = "eml-jobs.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "EML";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub queue: QueueConfig,
    pub worker: WorkerSettings,
    /// TOML file holding component and job definitions
    pub definitions: PathBuf,
    pub graphs: GraphStoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub claim_backoff_ms: u64,
}

/// Where graph version records are kept
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphStoreConfig {
    /// SQL URL; records stay in memory for the process lifetime when unset
    pub url: Option<String>,
    pub table: String,
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn claim_backoff(&self) -> Duration {
        Duration::from_millis(self.claim_backoff_ms)
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            claim_backoff_ms: DEFAULT_CLAIM_BACKOFF_MS,
        }
    }
}

impl Default for GraphStoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            table: DEFAULT_GRAPH_TABLE.to_string(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            worker: WorkerSettings::default(),
            definitions: PathBuf::from(DEFAULT_DEFINITIONS_PATH),
            graphs: GraphStoreConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from `.env`, an optional file and the environment
    ///
    /// A missing file is only an error when `path` was given explicitly.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => ::config::File::from(path).required(true),
            None => ::config::File::with_name("eml").required(false),
        };

        let loaded: Self = ::config::Config::builder()
            .add_source(file)
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue.url.is_empty() {
            anyhow::bail!("Queue URL cannot be empty");
        }

        eml_common::sql::validate_identifier(&self.queue.table)?;
        eml_common::sql::validate_identifier(&self.graphs.table)?;

        if self.queue.max_connections == 0 {
            anyhow::bail!("Queue max_connections must be greater than 0");
        }

        if self.worker.workers == 0 {
            anyhow::bail!("At least one worker is required");
        }

        if self.worker.poll_interval_ms == 0 {
            anyhow::bail!("Worker poll_interval_ms must be greater than 0");
        }

        if self.worker.workers as u32 > self.queue.max_connections {
            tracing::warn!(
                workers = self.worker.workers,
                max_connections = self.queue.max_connections,
                "More workers than queue connections, claims will wait for the pool"
            );
        }

        Ok(())
    }
}
