//! Streaming extract → map → load pipelines
//!
//! A [`Pipeline`] pulls [`Chunk`]s from an [`Extractor`], passes each through
//! an optional [`Mapper`], and hands it to a [`Loader`]. Loaders buffer
//! encoded units and deliver them in batches, falling back to unit-by-unit
//! delivery when a batch fails, so one bad record never sinks a run.
//!
//! Pipelines are usually assembled from configuration with the
//! [`Registry`]:
//!
//! ```no_run
//! use eml_pipeline::{BuildContext, PipelineConfig, Registry};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config: PipelineConfig = serde_json::from_str(r#"{
//!     "name": "airports",
//!     "extract": { "type": "csv", "uri": "airports.csv" },
//!     "load": { "type": "file", "path": "airports.ndjson" }
//! }"#)?;
//!
//! let mut pipeline = Registry::builtin().build(&config, &BuildContext::in_memory())?;
//! let summary = pipeline.run(&CancellationToken::new()).await?;
//! tracing::info!(loaded = summary.chunks_loaded, "Run complete");
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod chunk;
pub mod engine;
pub mod error;
pub mod extract;
pub mod graph;
pub mod load;
pub mod map;
pub mod registry;

pub use chunk::Chunk;
pub use engine::{Pipeline, RunSummary, Stage};
pub use error::{
    DeliveryError, ExtractionError, LoadError, MappingError, PipelineError, PipelineResult,
    RegistryError,
};
pub use extract::Extractor;
pub use graph::{Graph, Term, Triple};
pub use load::{
    BufferedLoader, Destination, GraphRegistry, GraphVersion, LoadReport, Loader, LossReason,
    LostUnit, MemoryGraphRegistry, SqlGraphRegistry,
};
pub use map::Mapper;
pub use registry::{BuildContext, ComponentConfig, PipelineConfig, Registry};
