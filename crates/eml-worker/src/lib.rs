//! EML workers and job definitions
//!
//! Ties the job queue to the pipeline engine: job definitions name a
//! pipeline assembled from configured components, producers enqueue
//! [`JobDescriptor`]s, and [`Worker`]s claim and run them.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod definitions;
pub mod job;
pub mod worker;

pub use config::WorkerConfig;
pub use definitions::{
    ComponentDefinition, ComponentStage, DefinitionError, DefinitionRepository, FileDefinitions,
    JobDefinition,
};
pub use job::JobDescriptor;
pub use worker::{run_workers, StopPolicy, Worker, WorkerContext, WorkerStats};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// EML - extract, map and load pipelines driven by a SQL job queue
#[derive(Parser, Debug)]
#[command(name = "eml")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (TOML); `eml.toml` is used when present
    #[arg(short, long, env = "EML_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the queue and graph version tables
    Init,

    /// Enqueue a run of a job definition
    Push {
        /// Job definition identifier
        job: String,

        /// Seconds to wait before the job becomes due
        #[arg(short, long, default_value_t = 0)]
        delay: i64,

        /// Free-form note on who requested the run
        #[arg(long)]
        triggered_by: Option<String>,
    },

    /// Claim and run queued jobs
    Work {
        /// Number of concurrent workers (overrides configuration)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Exit once the queue has no due job
        #[arg(long)]
        once: bool,
    },

    /// Run a job definition immediately, bypassing the queue
    Run {
        /// Job definition identifier
        job: String,
    },

    /// Show queue size and known job definitions
    Status,
}
