//! The unit of data flowing from extractor to loader

use serde_json::Value;

use crate::graph::Graph;

#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// A record: CSV row object, JSON value, or XML element converted to an object
    Value(Value),
    /// A partial RDF graph
    Graph(Graph),
}

impl Chunk {
    /// Null, `""`, `[]`, `{}` and a graph without triples are empty
    pub fn is_empty(&self) -> bool {
        match self {
            Chunk::Value(Value::Null) => true,
            Chunk::Value(Value::String(s)) => s.is_empty(),
            Chunk::Value(Value::Array(a)) => a.is_empty(),
            Chunk::Value(Value::Object(o)) => o.is_empty(),
            Chunk::Value(_) => false,
            Chunk::Graph(g) => g.is_empty(),
        }
    }

    /// Short name of the variant, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Chunk::Value(Value::Object(_)) => "object",
            Chunk::Value(_) => "value",
            Chunk::Graph(_) => "graph",
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Chunk::Value(v) => Some(v),
            Chunk::Graph(_) => None,
        }
    }
}

impl From<Value> for Chunk {
    fn from(value: Value) -> Self {
        Chunk::Value(value)
    }
}

impl From<Graph> for Chunk {
    fn from(graph: Graph) -> Self {
        Chunk::Graph(graph)
    }
}
