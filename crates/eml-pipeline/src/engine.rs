//! Pipeline engine: drives one extract → map → load run
//!
//! A run is strictly sequential. Each chunk is extracted, mapped and handed
//! to the loader before the next one is pulled, so delivery order matches
//! extraction order. Any stage error ends the run without finalizing the
//! loader. Both a failure and a cancellation observed between chunks abort
//! the loader, so units still buffered are reported as lost.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::extract::Extractor;
use crate::load::{LoadReport, Loader, LossReason};
use crate::map::Mapper;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Extracting,
    Mapping,
    Loading,
    Draining,
    Done,
    Failed,
    Cancelled,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Extracting => "extracting",
            Stage::Mapping => "mapping",
            Stage::Loading => "loading",
            Stage::Draining => "draining",
            Stage::Done => "done",
            Stage::Failed => "failed",
            Stage::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub chunks_processed: u64,
    /// Chunks the loader accepted (non-empty)
    pub chunks_loaded: u64,
    pub elapsed: Duration,
    pub load: LoadReport,
    pub cancelled: bool,
}

pub struct Pipeline {
    name: String,
    extractor: Box<dyn Extractor>,
    mapper: Option<Box<dyn Mapper>>,
    loader: Option<Box<dyn Loader>>,
    stage: Stage,
    processed: u64,
    loaded: u64,
    last_run: Option<RunSummary>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, extractor: Box<dyn Extractor>) -> Self {
        Self {
            name: name.into(),
            extractor,
            mapper: None,
            loader: None,
            stage: Stage::Idle,
            processed: 0,
            loaded: 0,
            last_run: None,
        }
    }

    pub fn with_mapper(mut self, mapper: Box<dyn Mapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn with_loader(mut self, loader: Box<dyn Loader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Summary of the most recent run, including failed ones
    pub fn last_run(&self) -> Option<&RunSummary> {
        self.last_run.as_ref()
    }

    /// Run to completion or until `cancel` fires
    pub async fn run(&mut self, cancel: &CancellationToken) -> PipelineResult<RunSummary> {
        let started = Instant::now();
        self.processed = 0;
        self.loaded = 0;
        self.last_run = None;
        info!(pipeline = %self.name, "Pipeline started");

        match self.drive(cancel, started).await {
            Ok(summary) => {
                self.last_run = Some(summary.clone());
                info!(
                    pipeline = %self.name,
                    stage = %self.stage,
                    chunks_processed = summary.chunks_processed,
                    chunks_loaded = summary.chunks_loaded,
                    batches = summary.load.batches_attempted,
                    units_delivered = summary.load.units_delivered,
                    units_lost = summary.load.lost.len(),
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "Pipeline finished"
                );
                Ok(summary)
            }
            Err(e) => {
                let load = match self.loader.as_mut() {
                    Some(loader) => loader.abort(LossReason::RunFailed(e.to_string())).await,
                    None => LoadReport::default(),
                };
                let summary = self.summary(load, started, false);
                error!(
                    pipeline = %self.name,
                    stage = %self.stage,
                    error = %e,
                    chunks = summary.chunks_processed,
                    units_delivered = summary.load.units_delivered,
                    units_lost = summary.load.lost.len(),
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "Pipeline failed"
                );
                self.stage = Stage::Failed;
                self.last_run = Some(summary);
                Err(e)
            }
        }
    }

    async fn drive(
        &mut self,
        cancel: &CancellationToken,
        started: Instant,
    ) -> PipelineResult<RunSummary> {
        self.stage = Stage::Extracting;
        self.extractor.open().await?;
        info!(pipeline = %self.name, "Extraction started");

        if let Some(loader) = self.loader.as_mut() {
            loader.init().await?;
            info!(pipeline = %self.name, "Loader initialized");
        }

        if self.mapper.is_some() {
            info!(pipeline = %self.name, "Mapping started");
        }
        if self.loader.is_some() {
            info!(pipeline = %self.name, "Loading started");
        }

        loop {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(started).await);
            }

            self.stage = Stage::Extracting;
            if !self.extractor.has_next() {
                break;
            }
            let Some(chunk) = self.extractor.pop()? else {
                break;
            };
            self.processed += 1;

            let chunk = match &self.mapper {
                Some(mapper) => {
                    self.stage = Stage::Mapping;
                    mapper.execute(chunk)?
                }
                None => chunk,
            };

            if let Some(loader) = self.loader.as_mut() {
                self.stage = Stage::Loading;
                if loader.execute(chunk).await? {
                    self.loaded += 1;
                } else {
                    debug!(pipeline = %self.name, chunk = self.processed, "Skipped empty chunk");
                }
            }
        }

        info!(pipeline = %self.name, chunks = self.processed, "Extraction finished");
        if self.mapper.is_some() {
            info!(pipeline = %self.name, chunks = self.processed, "Mapping finished");
        }

        self.stage = Stage::Draining;
        let load = match self.loader.as_mut() {
            Some(loader) => {
                info!(pipeline = %self.name, "Draining loader");
                let report = loader.clean_up().await?;
                info!(
                    pipeline = %self.name,
                    chunks = self.loaded,
                    units_delivered = report.units_delivered,
                    "Loading finished"
                );
                report
            }
            None => LoadReport::default(),
        };

        self.stage = Stage::Done;
        Ok(self.summary(load, started, false))
    }

    async fn cancelled(&mut self, started: Instant) -> RunSummary {
        warn!(pipeline = %self.name, chunks = self.processed, "Pipeline cancelled");

        let load = match self.loader.as_mut() {
            Some(loader) => loader.abort(LossReason::Cancelled).await,
            None => LoadReport::default(),
        };

        self.stage = Stage::Cancelled;
        self.summary(load, started, true)
    }

    fn summary(&self, load: LoadReport, started: Instant, cancelled: bool) -> RunSummary {
        RunSummary {
            chunks_processed: self.processed,
            chunks_loaded: self.loaded,
            elapsed: started.elapsed(),
            load,
            cancelled,
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("mapper", &self.mapper.is_some())
            .field("loader", &self.loader.is_some())
            .finish()
    }
}
