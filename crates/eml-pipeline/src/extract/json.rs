//! JSON extractor
//!
//! Without a pointer the source is read as a stream of JSON values (NDJSON
//! or concatenated documents). A top-level array yields its elements rather
//! than itself. With a JSON pointer the whole document is parsed and the
//! pointed-at array is yielded element by element.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::de::IoRead;
use serde_json::{StreamDeserializer, Value};
use std::io::BufReader;
use std::time::Duration;
use tracing::info;

use super::source::{open_source, SourceReader, DEFAULT_FETCH_TIMEOUT_SECS};
use super::{Extractor, Lookahead, Records};
use crate::chunk::Chunk;
use crate::error::ExtractionError;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonConfig {
    pub uri: String,
    /// RFC 6901 pointer, e.g. `/data/items`
    #[serde(default)]
    pub pointer: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

pub struct JsonExtractor {
    config: JsonConfig,
    records: Lookahead,
}

impl JsonExtractor {
    pub fn new(config: JsonConfig) -> Self {
        Self {
            config,
            records: Lookahead::default(),
        }
    }

    fn pointed(&self, reader: SourceReader, pointer: &str) -> Result<Records, ExtractionError> {
        let mut document: Value =
            serde_json::from_reader(BufReader::new(reader)).map_err(|source| ExtractionError::Json {
                uri: self.config.uri.clone(),
                source,
            })?;

        let target = document
            .pointer_mut(pointer)
            .map(Value::take)
            .ok_or_else(|| ExtractionError::PointerNotFound {
                uri: self.config.uri.clone(),
                pointer: pointer.to_string(),
            })?;

        let values = match target {
            Value::Array(items) => items,
            single => vec![single],
        };
        Ok(Box::new(values.into_iter().map(|v| Ok(Chunk::Value(v)))))
    }
}

#[async_trait]
impl Extractor for JsonExtractor {
    async fn open(&mut self) -> Result<(), ExtractionError> {
        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let reader = open_source(&self.config.uri, timeout).await?;

        let records: Records = match self.config.pointer.as_deref() {
            Some(pointer) => self.pointed(reader, pointer)?,
            None => Box::new(JsonStream::new(self.config.uri.clone(), reader)),
        };
        self.records.start(records);

        info!(uri = %self.config.uri, pointer = ?self.config.pointer, "JSON source opened");
        Ok(())
    }

    fn has_next(&mut self) -> bool {
        self.records.has_next()
    }

    fn pop(&mut self) -> Result<Option<Chunk>, ExtractionError> {
        self.records.pop()
    }
}

/// Lazily parsed stream of values with top-level arrays flattened
struct JsonStream {
    uri: String,
    values: StreamDeserializer<'static, IoRead<BufReader<SourceReader>>, Value>,
    pending: std::vec::IntoIter<Value>,
    failed: bool,
}

impl JsonStream {
    fn new(uri: String, reader: SourceReader) -> Self {
        Self {
            uri,
            values: serde_json::Deserializer::from_reader(BufReader::new(reader)).into_iter(),
            pending: Vec::new().into_iter(),
            failed: false,
        }
    }
}

impl Iterator for JsonStream {
    type Item = Result<Chunk, ExtractionError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(value) = self.pending.next() {
                return Some(Ok(Chunk::Value(value)));
            }
            // A syntax error leaves the stream position undefined
            if self.failed {
                return None;
            }

            match self.values.next()? {
                Ok(Value::Array(items)) => self.pending = items.into_iter(),
                Ok(value) => return Some(Ok(Chunk::Value(value))),
                Err(source) => {
                    self.failed = true;
                    return Some(Err(ExtractionError::Json {
                        uri: self.uri.clone(),
                        source,
                    }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn extract(contents: &str, pointer: Option<&str>) -> Result<Vec<Value>, ExtractionError> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, contents).unwrap();

        let mut extractor = JsonExtractor::new(JsonConfig {
            uri: path.to_string_lossy().to_string(),
            pointer: pointer.map(str::to_string),
            timeout_seconds: 5,
        });
        extractor.open().await?;

        let mut values = Vec::new();
        while extractor.has_next() {
            if let Some(Chunk::Value(v)) = extractor.pop()? {
                values.push(v);
            }
        }
        Ok(values)
    }

    #[tokio::test]
    async fn test_ndjson_stream() {
        let values = extract("{\"a\":1}\n{\"a\":2}\n", None).await.unwrap();
        assert_eq!(values, vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[tokio::test]
    async fn test_top_level_array_is_flattened() {
        let values = extract(r#"["a", "b"] ["c"]"#, None).await.unwrap();
        assert_eq!(values, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[tokio::test]
    async fn test_pointer_selects_nested_array() {
        let doc = r#"{"meta": {}, "data": {"items": [{"id": 1}, {"id": 2}]}}"#;
        let values = extract(doc, Some("/data/items")).await.unwrap();
        assert_eq!(values, vec![json!({"id": 1}), json!({"id": 2})]);
    }

    #[tokio::test]
    async fn test_missing_pointer_is_error() {
        let err = extract(r#"{"data": []}"#, Some("/nope")).await.unwrap_err();
        assert!(matches!(err, ExtractionError::PointerNotFound { .. }));
    }

    #[tokio::test]
    async fn test_malformed_stream_stops_after_error() {
        let err = extract("{\"a\":1}\n{oops\n{\"a\":3}\n", None).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Json { .. }));
    }
}
