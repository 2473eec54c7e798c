//! Loaders: buffered, batched delivery of chunks into a destination store
//!
//! [`BufferedLoader`] implements buffering and failure handling once; a
//! [`Destination`] only knows how to encode chunks into units and how to
//! send a slice of units to its store.

use async_trait::async_trait;

use crate::chunk::Chunk;
use crate::error::{DeliveryError, LoadError};

pub mod buffer;
pub mod elasticsearch;
pub mod file;
mod http;
pub mod sparql;
pub mod versions;

pub use buffer::{BufferedLoader, LoadReport, LossReason, LostUnit};
pub use elasticsearch::{ElasticsearchConfig, ElasticsearchDestination};
pub use file::{FileConfig, FileDestination};
pub use sparql::{SparqlConfig, SparqlDestination};
pub use versions::{GraphRegistry, GraphVersion, MemoryGraphRegistry, SqlGraphRegistry};

#[async_trait]
pub trait Loader: Send {
    /// Prepare the destination; safe to call more than once
    async fn init(&mut self) -> Result<(), LoadError>;

    /// Buffer one chunk, flushing full batches. `Ok(false)` means the chunk
    /// was empty and ignored.
    async fn execute(&mut self, chunk: Chunk) -> Result<bool, LoadError>;

    /// Flush everything still buffered, then finalize the destination
    async fn clean_up(&mut self) -> Result<LoadReport, LoadError>;

    /// Discard the buffer without finalizing, recording each unit as lost
    /// for `reason`
    async fn abort(&mut self, reason: LossReason) -> LoadReport;
}

#[async_trait]
pub trait Destination: Send + Sync {
    fn name(&self) -> &str;

    async fn prepare(&mut self) -> Result<(), LoadError>;

    /// Serialize a non-empty chunk into zero or more delivery units
    fn encode(&mut self, chunk: Chunk) -> Result<Vec<String>, LoadError>;

    /// Send units as one request
    async fn deliver(&self, units: &[String]) -> Result<(), DeliveryError>;

    /// Runs once after every buffered unit was attempted
    async fn finalize(&mut self) -> Result<(), LoadError>;
}
