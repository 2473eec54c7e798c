//! XML extractor: every `<element>` subtree becomes one object chunk
//!
//! Conversion rules:
//! - attributes are keys prefixed with `@`
//! - child elements are keys by name, repeated children collapse into an array
//! - an element with only text becomes a string
//! - text next to attributes or children is kept under `#text`

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::BufReader;
use std::time::Duration;
use tracing::info;

use super::source::{open_source, SourceReader, DEFAULT_FETCH_TIMEOUT_SECS};
use super::{Extractor, Lookahead};
use crate::chunk::Chunk;
use crate::error::ExtractionError;

#[derive(Debug, Clone, Deserialize)]
pub struct XmlConfig {
    pub uri: String,
    /// Name of the repeating record element
    pub element: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

pub struct XmlExtractor {
    config: XmlConfig,
    records: Lookahead,
}

impl XmlExtractor {
    pub fn new(config: XmlConfig) -> Self {
        Self {
            config,
            records: Lookahead::default(),
        }
    }
}

#[async_trait]
impl Extractor for XmlExtractor {
    async fn open(&mut self) -> Result<(), ExtractionError> {
        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let reader = open_source(&self.config.uri, timeout).await?;
        self.records.start(Box::new(XmlRecords::new(
            self.config.uri.clone(),
            self.config.element.clone(),
            reader,
        )));

        info!(uri = %self.config.uri, element = %self.config.element, "XML source opened");
        Ok(())
    }

    fn has_next(&mut self) -> bool {
        self.records.has_next()
    }

    fn pop(&mut self) -> Result<Option<Chunk>, ExtractionError> {
        self.records.pop()
    }
}

/// An element under construction
struct Frame {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self, quick_xml::Error> {
        let mut fields = Map::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
            let value = attr.unescape_value()?.into_owned();
            fields.insert(key, Value::String(value));
        }

        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            fields,
            text: String::new(),
        })
    }

    fn add_child(&mut self, name: String, value: Value) {
        match self.fields.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                self.fields.insert(name, value);
            }
        }
    }

    /// Text-only elements become strings, anything with attributes or
    /// children becomes an object
    fn close(mut self) -> (String, Value) {
        let value = if self.fields.is_empty() {
            Value::String(self.text)
        } else {
            if !self.text.is_empty() {
                self.fields.insert("#text".to_string(), Value::String(self.text));
            }
            Value::Object(self.fields)
        };
        (self.name, value)
    }
}

struct XmlRecords {
    uri: String,
    element: String,
    reader: Reader<BufReader<SourceReader>>,
    buf: Vec<u8>,
    stack: Vec<Frame>,
    done: bool,
}

impl XmlRecords {
    fn new(uri: String, element: String, source: SourceReader) -> Self {
        let mut reader = Reader::from_reader(BufReader::new(source));
        reader.config_mut().trim_text(true);

        Self {
            uri,
            element,
            reader,
            buf: Vec::new(),
            stack: Vec::new(),
            done: false,
        }
    }

    fn start(&mut self, start: &BytesStart<'_>) -> Result<bool, quick_xml::Error> {
        if self.stack.is_empty() && start.name().as_ref() != self.element.as_bytes() {
            return Ok(false);
        }
        self.stack.push(Frame::open(start)?);
        Ok(true)
    }

    /// Pops the innermost frame; returns the finished record when it was the outermost
    fn end(&mut self) -> Option<Value> {
        let (name, value) = self.stack.pop()?.close();
        match self.stack.last_mut() {
            Some(parent) => {
                parent.add_child(name, value);
                None
            }
            None => Some(value),
        }
    }

    fn next_record(&mut self) -> Result<Option<Value>, quick_xml::Error> {
        loop {
            self.buf.clear();
            let event = self.reader.read_event_into(&mut self.buf)?.into_owned();
            match event {
                Event::Start(start) => {
                    self.start(&start)?;
                }
                Event::Empty(start) => {
                    if self.start(&start)? {
                        if let Some(record) = self.end() {
                            return Ok(Some(record));
                        }
                    }
                }
                Event::End(_) => {
                    if !self.stack.is_empty() {
                        if let Some(record) = self.end() {
                            return Ok(Some(record));
                        }
                    }
                }
                Event::Text(text) => {
                    if let Some(frame) = self.stack.last_mut() {
                        frame.text.push_str(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(frame) = self.stack.last_mut() {
                        frame.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Event::Eof => {
                    return match self.stack.first() {
                        Some(frame) => Err(quick_xml::Error::IllFormed(
                            quick_xml::errors::IllFormedError::MissingEndTag(frame.name.clone()),
                        )),
                        None => Ok(None),
                    };
                }
                _ => {}
            }
        }
    }
}

impl Iterator for XmlRecords {
    type Item = Result<Chunk, ExtractionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(value)) => Some(Ok(Chunk::Value(value))),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(source) => {
                self.done = true;
                Some(Err(ExtractionError::Xml {
                    uri: self.uri.clone(),
                    source,
                }))
            }
        }
    }
}
