//! Shared helpers for pipeline integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eml_pipeline::{Chunk, DeliveryError, Destination, LoadError};

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,eml_pipeline=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Destination that accepts everything and remembers each delivery
#[derive(Clone, Default)]
pub struct Recorder {
    pub batches: Arc<Mutex<Vec<Vec<String>>>>,
    pub finalized: Arc<Mutex<u32>>,
}

impl Recorder {
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn finalize_count(&self) -> u32 {
        *self.finalized.lock().unwrap()
    }
}

#[async_trait]
impl Destination for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn prepare(&mut self) -> Result<(), LoadError> {
        Ok(())
    }

    fn encode(&mut self, chunk: Chunk) -> Result<Vec<String>, LoadError> {
        match chunk {
            Chunk::Value(serde_json::Value::String(s)) => Ok(vec![s]),
            Chunk::Value(v) => Ok(vec![v.to_string()]),
            Chunk::Graph(g) => Ok(g.to_ntriples_lines()),
        }
    }

    async fn deliver(&self, units: &[String]) -> Result<(), DeliveryError> {
        self.batches.lock().unwrap().push(units.to_vec());
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), LoadError> {
        *self.finalized.lock().unwrap() += 1;
        Ok(())
    }
}
