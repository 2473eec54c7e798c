//! Tabular row to RDF graph mapping
//!
//! ```toml
//! type = "rdf"
//! base_uri = "http://example.org/"
//! subject = "airport/{id}"
//! class = "http://example.org/Airport"
//!
//! [columns]
//! name = "http://xmlns.com/foaf/0.1/name"
//! altitude = { predicate = "altitude", datatype = "xsd:integer" }
//! country = { predicate = "country", link = "country/{country}" }
//! ```
//!
//! Relative IRIs resolve against `base_uri`. Values substituted into IRI
//! templates are percent-encoded.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::Mapper;
use crate::chunk::Chunk;
use crate::error::{MappingError, PipelineError, PipelineResult};
use crate::graph::{Graph, Term, Triple, RDF_TYPE};

const XSD_PREFIX: &str = "xsd:";
const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema#";

#[derive(Debug, Clone, Deserialize)]
pub struct RdfConfig {
    pub base_uri: String,
    /// IRI template for the row subject, e.g. `airport/{id}`
    pub subject: String,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnMapping>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ColumnMapping {
    /// Column value becomes a plain literal of this predicate
    Predicate(String),
    Detailed {
        predicate: String,
        #[serde(default)]
        datatype: Option<String>,
        #[serde(default)]
        language: Option<String>,
        /// IRI template; when set the object is an IRI instead of a literal
        #[serde(default)]
        link: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(String),
}

/// `{column}` placeholders between literal text
#[derive(Debug, Clone, PartialEq, Eq)]
struct Template {
    segments: Vec<Segment>,
}

impl Template {
    fn parse(template: &str) -> Result<Self, MappingError> {
        let invalid = |reason: &str| MappingError::InvalidTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Text(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| invalid("unclosed '{'"))?;
            let field = &after[..close];
            if field.is_empty() {
                return Err(invalid("empty placeholder"));
            }
            segments.push(Segment::Field(field.to_string()));
            rest = &after[close + 1..];
        }
        if rest.contains('}') {
            return Err(invalid("unmatched '}'"));
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    fn render(&self, row: &Map<String, Value>) -> Result<String, MappingError> {
        self.render_fields(|field| row.get(field).and_then(scalar_text))
    }

    /// Render with `column` bound to one `cell` of a multi-valued column
    fn render_with(
        &self,
        row: &Map<String, Value>,
        column: &str,
        cell: &str,
    ) -> Result<String, MappingError> {
        self.render_fields(|field| {
            if field == column {
                Some(cell.to_string())
            } else {
                row.get(field).and_then(scalar_text)
            }
        })
    }

    fn render_fields<F>(&self, lookup: F) -> Result<String, MappingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field(field) => {
                    let value = lookup(field)
                        .filter(|s| !s.is_empty())
                        .ok_or_else(|| MappingError::MissingField {
                            field: field.clone(),
                        })?;
                    out.push_str(&urlencoding::encode(&value));
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
enum ObjectRule {
    Literal {
        datatype: Option<String>,
        language: Option<String>,
    },
    Link(Template),
}

#[derive(Debug, Clone)]
struct ColumnRule {
    column: String,
    predicate: String,
    object: ObjectRule,
}

/// Maps one object chunk (a row) into a graph describing one subject
#[derive(Debug, Clone)]
pub struct RdfMapper {
    base_uri: String,
    subject: Template,
    class: Option<String>,
    columns: Vec<ColumnRule>,
}

impl RdfMapper {
    pub fn new(config: RdfConfig) -> PipelineResult<Self> {
        let to_config = |e: MappingError| PipelineError::config("rdf", e);
        let base_uri = config.base_uri;

        let subject = Template::parse(&config.subject).map_err(to_config)?;
        let class = config.class.map(|c| resolve(&base_uri, &c));

        let mut columns = Vec::with_capacity(config.columns.len());
        for (column, mapping) in config.columns {
            let rule = match mapping {
                ColumnMapping::Predicate(predicate) => ColumnRule {
                    column,
                    predicate: resolve(&base_uri, &predicate),
                    object: ObjectRule::Literal {
                        datatype: None,
                        language: None,
                    },
                },
                ColumnMapping::Detailed {
                    predicate,
                    datatype,
                    language,
                    link,
                } => {
                    let object = match link {
                        Some(link) => ObjectRule::Link(Template::parse(&link).map_err(to_config)?),
                        None => ObjectRule::Literal {
                            datatype: datatype.map(|dt| expand_datatype(&base_uri, &dt)),
                            language,
                        },
                    };
                    ColumnRule {
                        column,
                        predicate: resolve(&base_uri, &predicate),
                        object,
                    }
                }
            };
            columns.push(rule);
        }

        Ok(Self {
            base_uri,
            subject,
            class,
            columns,
        })
    }
}

impl Mapper for RdfMapper {
    fn execute(&self, chunk: Chunk) -> Result<Chunk, MappingError> {
        let row = match &chunk {
            Chunk::Value(Value::Object(row)) => row,
            other => {
                return Err(MappingError::SchemaMismatch {
                    expected: "object",
                    found: other.kind(),
                })
            }
        };

        let subject = Term::iri(resolve(&self.base_uri, &self.subject.render(row)?));
        let mut graph = Graph::new();

        if let Some(class) = &self.class {
            graph.insert(subject.clone(), Term::iri(RDF_TYPE), Term::iri(class.clone()));
        }

        for rule in &self.columns {
            let cells: Vec<String> = match row.get(&rule.column) {
                Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
                Some(value) => scalar_text(value).into_iter().collect(),
                None => Vec::new(),
            };

            for cell in cells.into_iter().filter(|c| !c.is_empty()) {
                let object = match &rule.object {
                    ObjectRule::Literal { datatype, language } => Term::Literal {
                        value: cell,
                        datatype: datatype.clone(),
                        language: language.clone(),
                    },
                    ObjectRule::Link(template) => {
                        let iri = template.render_with(row, &rule.column, &cell)?;
                        Term::iri(resolve(&self.base_uri, &iri))
                    }
                };
                graph.push(Triple::new(
                    subject.clone(),
                    Term::iri(rule.predicate.clone()),
                    object,
                ));
            }
        }

        Ok(Chunk::Graph(graph))
    }
}

/// Text form of a scalar; `None` for null, arrays and objects
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_absolute(iri: &str) -> bool {
    iri.contains("://") || iri.starts_with("urn:") || iri.starts_with("mailto:")
}

fn resolve(base: &str, iri: &str) -> String {
    if is_absolute(iri) {
        iri.to_string()
    } else {
        format!("{base}{iri}")
    }
}

fn expand_datatype(base: &str, datatype: &str) -> String {
    match datatype.strip_prefix(XSD_PREFIX) {
        Some(local) => format!("{XSD_NAMESPACE}{local}"),
        None => resolve(base, datatype),
    }
}
