//! Local file destination: one line per unit
//!
//! Values are written as NDJSON, graphs as N-Triples.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::Destination;
use crate::chunk::Chunk;
use crate::error::{DeliveryError, LoadError};

pub const DEFAULT_FILE_BUFFER_SIZE: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub path: PathBuf,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Empty the file when the loader is prepared instead of appending
    #[serde(default)]
    pub truncate: bool,
}

fn default_buffer_size() -> usize {
    DEFAULT_FILE_BUFFER_SIZE
}

pub struct FileDestination {
    config: FileConfig,
}

impl FileDestination {
    pub fn new(config: FileConfig) -> Self {
        Self { config }
    }

    pub fn buffer_size(&self) -> usize {
        self.config.buffer_size
    }

    pub fn path(&self) -> &std::path::Path {
        &self.config.path
    }
}

#[async_trait]
impl Destination for FileDestination {
    fn name(&self) -> &str {
        "file"
    }

    async fn prepare(&mut self) -> Result<(), LoadError> {
        if let Some(parent) = self.config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::OpenOptions::new()
            .create(true)
            .append(!self.config.truncate)
            .write(true)
            .truncate(self.config.truncate)
            .open(&self.config.path)
            .await?;

        info!(
            path = %self.config.path.display(),
            truncate = self.config.truncate,
            "Output file ready"
        );
        Ok(())
    }

    fn encode(&mut self, chunk: Chunk) -> Result<Vec<String>, LoadError> {
        match chunk {
            Chunk::Value(value) => Ok(vec![value.to_string()]),
            Chunk::Graph(graph) => Ok(graph.to_ntriples_lines()),
        }
    }

    async fn deliver(&self, units: &[String]) -> Result<(), DeliveryError> {
        let mut text = units.join("\n");
        text.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.path)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }

    async fn finalize(&mut self) -> Result<(), LoadError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::{BufferedLoader, Loader};
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_values_written_as_ndjson() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/rows.ndjson");
        let dest = FileDestination::new(FileConfig {
            path: path.clone(),
            buffer_size: 2,
            truncate: false,
        });

        let mut loader = BufferedLoader::new(dest, 2);
        loader.init().await.unwrap();
        for value in [json!({"a": 1}), json!("b"), json!(3)] {
            loader.execute(Chunk::from(value)).await.unwrap();
        }
        let report = loader.clean_up().await.unwrap();

        assert_eq!(report.units_delivered, 3);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}\n\"b\"\n3\n");
    }

    #[tokio::test]
    async fn test_truncate_replaces_previous_output() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.ndjson");
        std::fs::write(&path, "old\n").unwrap();

        let mut dest = FileDestination::new(FileConfig {
            path: path.clone(),
            buffer_size: 1,
            truncate: true,
        });
        dest.prepare().await.unwrap();
        dest.deliver(&["new".to_string()]).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new\n");
    }
}
