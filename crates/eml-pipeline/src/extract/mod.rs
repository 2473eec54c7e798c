//! Extractors: lazy, finite sequences of chunks read from a source
//!
//! Every extractor is opened once, then drained with
//! [`has_next`](Extractor::has_next) / [`pop`](Extractor::pop). Reading is
//! sequential and on demand. Local files are opened on the blocking pool
//! and then streamed with synchronous reads in `pop`, on the one task that
//! drives the run. HTTP bodies and JSON pointer extraction are read into
//! memory in full first.

use async_trait::async_trait;

use crate::chunk::Chunk;
use crate::error::ExtractionError;

pub mod csv;
pub mod inline;
pub mod json;
pub mod source;
pub mod xml;

pub use self::csv::{CsvConfig, CsvExtractor};
pub use self::inline::{InlineConfig, InlineExtractor};
pub use self::json::{JsonConfig, JsonExtractor};
pub use self::xml::{XmlConfig, XmlExtractor};

#[async_trait]
pub trait Extractor: Send {
    /// Resolve and open the source
    async fn open(&mut self) -> Result<(), ExtractionError>;

    /// Whether [`pop`](Extractor::pop) will yield another chunk or an error
    fn has_next(&mut self) -> bool;

    /// Next chunk, or `None` once exhausted
    fn pop(&mut self) -> Result<Option<Chunk>, ExtractionError>;
}

pub(crate) type Records = Box<dyn Iterator<Item = Result<Chunk, ExtractionError>> + Send>;

/// One-item lookahead over a record iterator
///
/// Starts unopened: `has_next` is false and `pop` fails with
/// [`ExtractionError::NotOpened`] until [`start`](Lookahead::start) is called.
#[derive(Default)]
pub(crate) struct Lookahead {
    records: Option<Records>,
    peeked: Option<Result<Chunk, ExtractionError>>,
    exhausted: bool,
}

impl Lookahead {
    pub fn new(records: Records) -> Self {
        let mut lookahead = Self::default();
        lookahead.start(records);
        lookahead
    }

    pub fn start(&mut self, records: Records) {
        self.records = Some(records);
        self.peeked = None;
        self.exhausted = false;
    }

    pub fn has_next(&mut self) -> bool {
        let Some(records) = self.records.as_mut() else {
            return false;
        };
        if self.peeked.is_none() && !self.exhausted {
            self.peeked = records.next();
            self.exhausted = self.peeked.is_none();
        }
        self.peeked.is_some()
    }

    pub fn pop(&mut self) -> Result<Option<Chunk>, ExtractionError> {
        if self.records.is_none() {
            return Err(ExtractionError::NotOpened);
        }
        if !self.has_next() {
            return Ok(None);
        }
        self.peeked.take().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookahead_peeks_once() {
        let items = vec![Ok(Chunk::from(json!(1))), Ok(Chunk::from(json!(2)))];
        let mut records = Lookahead::new(Box::new(items.into_iter()));

        assert!(records.has_next());
        assert!(records.has_next());
        assert_eq!(records.pop().unwrap(), Some(Chunk::from(json!(1))));
        assert_eq!(records.pop().unwrap(), Some(Chunk::from(json!(2))));
        assert!(!records.has_next());
        assert_eq!(records.pop().unwrap(), None);
    }

    #[test]
    fn test_lookahead_surfaces_errors_through_pop() {
        let items = vec![Err(ExtractionError::NotOpened)];
        let mut records = Lookahead::new(Box::new(items.into_iter()));

        assert!(records.has_next());
        assert!(records.pop().is_err());
        assert!(!records.has_next());
    }

    #[test]
    fn test_unopened_lookahead() {
        let mut records = Lookahead::default();
        assert!(!records.has_next());
        assert!(matches!(records.pop(), Err(ExtractionError::NotOpened)));
    }
}
