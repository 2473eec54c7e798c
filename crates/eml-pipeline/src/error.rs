//! Error types for the pipeline stages

use thiserror::Error;

/// Failure while reading the source; aborts the run
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Failed to open {uri}: {source}")]
    Open {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch {uri}: {source}")]
    Fetch {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Fetching {uri} returned HTTP {status}")]
    HttpStatus { uri: String, status: u16 },

    #[error("CSV error in {uri}: {source}")]
    Csv {
        uri: String,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error in {uri}: {source}")]
    Json {
        uri: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("XML error in {uri}: {source}")]
    Xml {
        uri: String,
        #[source]
        source: quick_xml::Error,
    },

    #[error("JSON pointer '{pointer}' does not match anything in {uri}")]
    PointerNotFound { uri: String, pointer: String },

    #[error("Extractor was read before open()")]
    NotOpened,
}

/// Failure while mapping one chunk; aborts the run
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Missing field '{field}'")]
    MissingField { field: String },

    #[error("Expected {expected} chunk, got {found}")]
    SchemaMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Invalid template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },
}

/// Outcome of one failed delivery attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Network, authentication, throttling or timeout; worth one retry
    #[error("transport failure: {0}")]
    Transport(String),

    /// The destination understood the request and refused the data
    #[error("rejected: {0}")]
    Rejected(String),
}

impl DeliveryError {
    pub fn is_transport(&self) -> bool {
        matches!(self, DeliveryError::Transport(_))
    }
}

/// Failure in loader setup, finalization, or chunk encoding; aborts the run
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to prepare {destination}: {source}")]
    Init {
        destination: String,
        #[source]
        source: DeliveryError,
    },

    #[error("Failed to finalize {destination}: {source}")]
    Finalize {
        destination: String,
        #[source]
        source: DeliveryError,
    },

    #[error("{destination} cannot load a {kind} chunk")]
    UnsupportedChunk {
        destination: String,
        kind: &'static str,
    },

    #[error("Failed to encode chunk for {destination}: {message}")]
    Encode {
        destination: String,
        message: String,
    },

    #[error("Invalid {destination} configuration: {message}")]
    Config {
        destination: String,
        message: String,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Graph registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Graph version store failure
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    InvalidTable(#[from] eml_common::EmlError),

    #[error("Invalid version timestamp '{value}' for {graph_id}")]
    InvalidVersion { graph_id: String, value: String },
}

/// Any failure that ends a pipeline run or prevents one from being built
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Mapping failed: {0}")]
    Mapping(#[from] MappingError),

    #[error("Loading failed: {0}")]
    Load(#[from] LoadError),

    #[error("Unknown {stage} component type '{kind}'")]
    UnknownComponent { stage: &'static str, kind: String },

    #[error("Invalid configuration for {component}: {message}")]
    Config { component: String, message: String },
}

impl PipelineError {
    pub fn config(component: impl Into<String>, message: impl ToString) -> Self {
        PipelineError::Config {
            component: component.into(),
            message: message.to_string(),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = PipelineError::UnknownComponent {
            stage: "extract",
            kind: "parquet".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown extract component type 'parquet'");

        let err: PipelineError = MappingError::MissingField {
            field: "id".to_string(),
        }
        .into();
        assert!(err.to_string().contains("Missing field 'id'"));
    }

    #[test]
    fn test_delivery_error_kind() {
        assert!(DeliveryError::Transport("timeout".into()).is_transport());
        assert!(!DeliveryError::Rejected("bad triple".into()).is_transport());
    }
}
