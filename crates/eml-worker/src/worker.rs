//! Queue workers
//!
//! A worker claims one job at a time, resolves its definition into a
//! pipeline and runs it to completion before claiming the next. Several
//! workers may share one queue; the queue's claim protocol ensures each job
//! runs once.

use anyhow::{Context, Result};
use eml_pipeline::{
    BuildContext, GraphRegistry, MemoryGraphRegistry, Registry, RunSummary, SqlGraphRegistry,
};
use eml_queue::JobQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{WorkerConfig, WorkerSettings};
use crate::definitions::{DefinitionRepository, FileDefinitions};
use crate::job::JobDescriptor;

/// Everything a worker needs, shared by all workers of a process
pub struct WorkerContext {
    pub queue: Arc<dyn JobQueue>,
    pub definitions: Arc<dyn DefinitionRepository>,
    pub registry: Registry,
    pub graphs: Arc<dyn GraphRegistry>,
}

impl WorkerContext {
    /// Connect the queue and graph store and load definitions as configured
    pub async fn connect(config: &WorkerConfig) -> Result<Self> {
        let queue = eml_queue::connect(&config.queue)
            .await
            .context("Failed to connect to the job queue")?;

        let definitions = FileDefinitions::load(&config.definitions)
            .await
            .context("Failed to load job definitions")?;

        let graphs: Arc<dyn GraphRegistry> = match &config.graphs.url {
            Some(url) => Arc::new(
                SqlGraphRegistry::connect(url, &config.graphs.table)
                    .await
                    .context("Failed to connect to the graph version store")?,
            ),
            None => {
                warn!("No graph store configured, graph versions are kept in memory");
                Arc::new(MemoryGraphRegistry::new())
            }
        };

        Ok(Self {
            queue,
            definitions: Arc::new(definitions),
            registry: Registry::builtin(),
            graphs,
        })
    }

    /// Create the queue and graph version tables if missing
    pub async fn init(&self) -> Result<()> {
        self.queue.init().await.context("Failed to create the queue table")?;
        self.graphs
            .init()
            .await
            .context("Failed to create the graph version table")?;
        Ok(())
    }

    /// Build and run the pipeline of job definition `identifier`
    pub async fn run_job(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let config = self
            .definitions
            .resolve(identifier)
            .await
            .with_context(|| format!("Failed to resolve job '{identifier}'"))?;

        let build = BuildContext::new(Arc::clone(&self.graphs));
        let mut pipeline = self
            .registry
            .build(&config, &build)
            .with_context(|| format!("Failed to build pipeline for job '{identifier}'"))?;

        let result = pipeline.run(cancel).await;
        if let (Err(_), Some(summary)) = (&result, pipeline.last_run()) {
            for lost in &summary.load.lost {
                warn!(
                    job = identifier,
                    unit = %lost.unit,
                    reason = %lost.reason,
                    "Unit permanently lost"
                );
            }
        }
        result.with_context(|| format!("Job '{identifier}' failed"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    /// Claims that failed transiently and were retried
    pub claim_retries: u64,
}

impl WorkerStats {
    pub fn jobs_claimed(&self) -> u64 {
        self.jobs_succeeded + self.jobs_failed + self.jobs_cancelled
    }

    fn merge(&mut self, other: WorkerStats) {
        self.jobs_succeeded += other.jobs_succeeded;
        self.jobs_failed += other.jobs_failed;
        self.jobs_cancelled += other.jobs_cancelled;
        self.claim_retries += other.claim_retries;
    }
}

/// When a worker stops on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPolicy {
    /// Keep polling until cancelled
    Never,
    /// Stop as soon as the queue has no due job
    WhenIdle,
}

pub struct Worker {
    worker_id: Uuid,
    hostname: String,
    ctx: Arc<WorkerContext>,
    poll_interval: Duration,
    claim_backoff: Duration,
    stop: StopPolicy,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(ctx: Arc<WorkerContext>, settings: &WorkerSettings, stop: StopPolicy) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            hostname: hostname::get()
                .unwrap_or_else(|_| "unknown".into())
                .to_string_lossy()
                .to_string(),
            ctx,
            poll_interval: settings.poll_interval(),
            claim_backoff: settings.claim_backoff(),
            stop,
            stats: WorkerStats::default(),
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Claim and run jobs until cancelled, idle (per [`StopPolicy`]) or the
    /// queue fails permanently
    pub async fn run(mut self, cancel: CancellationToken) -> Result<WorkerStats> {
        info!(
            worker_id = %self.worker_id,
            hostname = %self.hostname,
            table = self.ctx.queue.table(),
            strategy = %self.ctx.queue.strategy(),
            "Worker started"
        );

        loop {
            if cancel.is_cancelled() {
                info!(worker_id = %self.worker_id, "Worker stop requested");
                break;
            }

            match self.ctx.queue.pop().await {
                Ok(Some(item)) => self.handle(&item, &cancel).await,
                Ok(None) => {
                    if self.stop == StopPolicy::WhenIdle {
                        debug!(worker_id = %self.worker_id, "Queue drained");
                        break;
                    }
                    if !pause(self.poll_interval, &cancel).await {
                        break;
                    }
                }
                Err(e) if e.is_transient() => {
                    self.stats.claim_retries += 1;
                    warn!(worker_id = %self.worker_id, error = %e, "Claim failed, retrying");
                    if !pause(self.claim_backoff, &cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    error!(
                        worker_id = %self.worker_id,
                        error = %e,
                        "Queue failure, stopping worker"
                    );
                    return Err(e).context("Worker stopped on a queue failure");
                }
            }
        }

        info!(
            worker_id = %self.worker_id,
            succeeded = self.stats.jobs_succeeded,
            failed = self.stats.jobs_failed,
            cancelled = self.stats.jobs_cancelled,
            claim_retries = self.stats.claim_retries,
            "Worker stopped"
        );
        Ok(self.stats)
    }

    async fn handle(&mut self, item: &[u8], cancel: &CancellationToken) {
        let descriptor = match JobDescriptor::decode(item) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.stats.jobs_failed += 1;
                error!(
                    worker_id = %self.worker_id,
                    error = %e,
                    payload = %String::from_utf8_lossy(item),
                    "Discarding undecodable job payload"
                );
                return;
            }
        };

        let run_id = Uuid::new_v4();
        info!(
            worker_id = %self.worker_id,
            %run_id,
            job = %descriptor.job,
            requested_at = %descriptor.requested_at,
            triggered_by = descriptor.triggered_by.as_deref().unwrap_or("-"),
            "Job claimed"
        );

        match self.ctx.run_job(&descriptor.job, cancel).await {
            Ok(summary) if summary.cancelled => {
                self.stats.jobs_cancelled += 1;
                warn!(
                    %run_id,
                    job = %descriptor.job,
                    chunks = summary.chunks_processed,
                    discarded = summary.load.lost.len(),
                    "Job cancelled"
                );
            }
            Ok(summary) => {
                self.stats.jobs_succeeded += 1;
                info!(
                    %run_id,
                    job = %descriptor.job,
                    chunks = summary.chunks_processed,
                    units_delivered = summary.load.units_delivered,
                    units_lost = summary.load.lost.len(),
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "Job completed"
                );
                for lost in &summary.load.lost {
                    warn!(
                        %run_id,
                        unit = %lost.unit,
                        reason = %lost.reason,
                        "Unit permanently lost"
                    );
                }
            }
            Err(e) => {
                self.stats.jobs_failed += 1;
                error!(%run_id, job = %descriptor.job, error = %format!("{e:#}"), "Job failed");
            }
        }
    }
}

/// Sleep for `duration`; false if cancelled first
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Run `settings.workers` workers over one shared context
///
/// A worker that stops on a queue failure cancels the others; the first such
/// failure is returned once every worker has stopped.
pub async fn run_workers(
    ctx: Arc<WorkerContext>,
    settings: &WorkerSettings,
    stop: StopPolicy,
    cancel: CancellationToken,
) -> Result<WorkerStats> {
    let shutdown = cancel.child_token();
    let mut workers = JoinSet::new();

    for _ in 0..settings.workers.max(1) {
        let worker = Worker::new(Arc::clone(&ctx), settings, stop);
        workers.spawn(worker.run(shutdown.clone()));
    }
    info!(workers = workers.len(), "Workers running");

    let mut total = WorkerStats::default();
    let mut failure = None;

    while let Some(joined) = workers.join_next().await {
        match joined.context("Worker task panicked")? {
            Ok(stats) => total.merge(stats),
            Err(e) => {
                shutdown.cancel();
                failure.get_or_insert(e);
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(total),
    }
}
