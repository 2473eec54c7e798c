//! Extractor over values listed directly in the component configuration

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{Extractor, Lookahead};
use crate::chunk::Chunk;
use crate::error::ExtractionError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InlineConfig {
    #[serde(default)]
    pub items: Vec<Value>,
}

pub struct InlineExtractor {
    items: Option<Vec<Value>>,
    records: Lookahead,
}

impl InlineExtractor {
    pub fn new(config: InlineConfig) -> Self {
        Self {
            items: Some(config.items),
            records: Lookahead::default(),
        }
    }
}

impl<T: Into<Value>> FromIterator<T> for InlineExtractor {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(InlineConfig {
            items: iter.into_iter().map(Into::into).collect(),
        })
    }
}

#[async_trait]
impl Extractor for InlineExtractor {
    async fn open(&mut self) -> Result<(), ExtractionError> {
        let items = self.items.take().unwrap_or_default();
        self.records
            .start(Box::new(items.into_iter().map(|v| Ok(Chunk::Value(v)))));
        Ok(())
    }

    fn has_next(&mut self) -> bool {
        self.records.has_next()
    }

    fn pop(&mut self) -> Result<Option<Chunk>, ExtractionError> {
        self.records.pop()
    }
}
