//! Mappers: pure chunk-to-chunk transformations

use crate::chunk::Chunk;
use crate::error::MappingError;

pub mod rdf;

pub use rdf::{ColumnMapping, RdfConfig, RdfMapper};

pub trait Mapper: Send + Sync {
    fn execute(&self, chunk: Chunk) -> Result<Chunk, MappingError>;
}

/// Passes every chunk through unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityMapper;

impl Mapper for IdentityMapper {
    fn execute(&self, chunk: Chunk) -> Result<Chunk, MappingError> {
        Ok(chunk)
    }
}
