//! CSV extractor: one object chunk per record

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::info;

use super::source::{open_source, SourceReader, DEFAULT_FETCH_TIMEOUT_SECS};
use super::{Extractor, Lookahead};
use crate::chunk::Chunk;
use crate::error::{ExtractionError, PipelineError, PipelineResult};

#[derive(Debug, Clone, Deserialize)]
pub struct CsvConfig {
    pub uri: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_has_header")]
    pub has_header: bool,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_delimiter() -> char {
    ','
}

fn default_has_header() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

/// Records keyed by header name, or by column position (`"0"`, `"1"`, ...)
/// when the file has no header row. All rows must have the same width.
pub struct CsvExtractor {
    config: CsvConfig,
    delimiter: u8,
    records: Lookahead,
}

impl CsvExtractor {
    pub fn new(config: CsvConfig) -> PipelineResult<Self> {
        let delimiter = u8::try_from(config.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                let message = format!("delimiter {:?} is not ASCII", config.delimiter);
                PipelineError::config("csv", message)
            })?;

        Ok(Self {
            config,
            delimiter,
            records: Lookahead::default(),
        })
    }

    fn records(
        &self,
        reader: SourceReader,
    ) -> Result<impl Iterator<Item = Result<Chunk, ExtractionError>> + Send, ExtractionError> {
        let uri = self.config.uri.clone();
        let csv_err = |source| ExtractionError::Csv {
            uri: self.config.uri.clone(),
            source,
        };

        let mut reader = ::csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.config.has_header)
            .flexible(false)
            .from_reader(reader);

        let header: Option<Vec<String>> = if self.config.has_header {
            let names = reader.headers().map_err(csv_err)?;
            Some(names.iter().map(str::to_string).collect())
        } else {
            None
        };

        Ok(reader.into_records().map(move |record| {
            let record = record.map_err(|source| ExtractionError::Csv {
                uri: uri.clone(),
                source,
            })?;

            let row: Map<String, Value> = record
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    let key = header
                        .as_ref()
                        .and_then(|names| names.get(i).cloned())
                        .unwrap_or_else(|| i.to_string());
                    (key, Value::String(cell.to_string()))
                })
                .collect();

            Ok(Chunk::Value(Value::Object(row)))
        }))
    }
}

#[async_trait]
impl Extractor for CsvExtractor {
    async fn open(&mut self) -> Result<(), ExtractionError> {
        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let reader = open_source(&self.config.uri, timeout).await?;
        let records = self.records(reader)?;
        self.records.start(Box::new(records));

        info!(uri = %self.config.uri, "CSV source opened");
        Ok(())
    }

    fn has_next(&mut self) -> bool {
        self.records.has_next()
    }

    fn pop(&mut self) -> Result<Option<Chunk>, ExtractionError> {
        self.records.pop()
    }
}
