//! SPARQL 1.1 Update destination
//!
//! Each run loads into a new named graph `{graph_name}#{unix_seconds}`. Once
//! every batch was attempted, the graph is stamped with `dcterms:created`,
//! recorded as the current version, and previous versions are cleared.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::http;
use super::versions::{GraphRegistry, GraphVersion};
use super::Destination;
use crate::chunk::Chunk;
use crate::error::{DeliveryError, LoadError};
use crate::graph::{Term, Triple, DCTERMS_CREATED, XSD_DATE_TIME};

pub const DEFAULT_SPARQL_BUFFER_SIZE: usize = 1000;
pub const DEFAULT_SPARQL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct SparqlConfig {
    /// SPARQL Update endpoint
    pub endpoint: String,
    pub graph_name: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_buffer_size() -> usize {
    DEFAULT_SPARQL_BUFFER_SIZE
}

fn default_timeout() -> u64 {
    DEFAULT_SPARQL_TIMEOUT_SECS
}

pub struct SparqlDestination {
    config: SparqlConfig,
    client: reqwest::Client,
    version: GraphVersion,
    registry: Arc<dyn GraphRegistry>,
}

impl SparqlDestination {
    pub fn new(
        config: SparqlConfig,
        registry: Arc<dyn GraphRegistry>,
        started_at: DateTime<Utc>,
    ) -> Result<Self, LoadError> {
        validate_graph_name(&config.graph_name)?;
        let client = http::client(Duration::from_secs(config.timeout_seconds))?;
        let version = GraphVersion::new(config.graph_name.clone(), started_at);

        Ok(Self {
            config,
            client,
            version,
            registry,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.config.buffer_size
    }

    /// The graph this run writes into
    pub fn version(&self) -> &GraphVersion {
        &self.version
    }

    async fn update(&self, statement: String) -> Result<(), DeliveryError> {
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .form(&[("update", statement)]);
        if let Some(user) = &self.config.user {
            request = request.basic_auth(user, self.config.password.as_deref());
        }
        http::send(request).await.map(|_| ())
    }

    fn insert_data(&self, lines: &[String]) -> String {
        format!(
            "INSERT DATA {{ GRAPH <{}> {{\n{}\n}} }}",
            self.version.graph_id,
            lines.join("\n")
        )
    }

    fn finalize_error(&self, source: DeliveryError) -> LoadError {
        LoadError::Finalize {
            destination: self.name().to_string(),
            source,
        }
    }
}

/// Graph ids are written between `<…>` in Update statements, so the name
/// must be an absolute IRI without characters that would end the IRIREF. It
/// must not carry a fragment either, the version suffix adds one.
fn validate_graph_name(name: &str) -> Result<(), LoadError> {
    let invalid = |message: String| LoadError::Config {
        destination: "sparql".to_string(),
        message,
    };

    let has_scheme = name
        .split_once(':')
        .is_some_and(|(scheme, rest)| !scheme.is_empty() && !rest.is_empty());
    if !has_scheme {
        return Err(invalid(format!("graph_name '{name}' is not an absolute IRI")));
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || "<>\"{}|^`\\#".contains(*c))
    {
        return Err(invalid(format!("graph_name '{name}' contains {c:?}")));
    }
    Ok(())
}

#[async_trait]
impl Destination for SparqlDestination {
    fn name(&self) -> &str {
        "sparql"
    }

    async fn prepare(&mut self) -> Result<(), LoadError> {
        self.registry.init().await?;
        info!(
            endpoint = %self.config.endpoint,
            graph_id = %self.version.graph_id,
            "Loading into new graph version"
        );
        Ok(())
    }

    fn encode(&mut self, chunk: Chunk) -> Result<Vec<String>, LoadError> {
        match chunk {
            Chunk::Graph(graph) => Ok(graph.to_ntriples_lines()),
            other => Err(LoadError::UnsupportedChunk {
                destination: self.name().to_string(),
                kind: other.kind(),
            }),
        }
    }

    async fn deliver(&self, units: &[String]) -> Result<(), DeliveryError> {
        self.update(self.insert_data(units)).await
    }

    async fn finalize(&mut self) -> Result<(), LoadError> {
        let created = Triple::new(
            Term::iri(self.version.graph_id.clone()),
            Term::iri(DCTERMS_CREATED),
            Term::typed(
                self.version.version.to_rfc3339_opts(SecondsFormat::Secs, true),
                XSD_DATE_TIME,
            ),
        );
        self.update(self.insert_data(&[created.to_ntriples()]))
            .await
            .map_err(|e| self.finalize_error(e))?;

        self.registry.save(&self.version).await?;
        info!(graph_id = %self.version.graph_id, "Graph version is now current");

        for old in self.registry.list(&self.config.graph_name).await? {
            if old.graph_id == self.version.graph_id {
                continue;
            }
            match self.update(format!("CLEAR GRAPH <{}>", old.graph_id)).await {
                Ok(()) => {
                    self.registry.delete(&old.graph_id).await?;
                    info!(graph_id = %old.graph_id, "Cleared previous graph version");
                }
                Err(e) => {
                    warn!(
                        graph_id = %old.graph_id,
                        error = %e,
                        "Failed to clear previous graph version, keeping its record"
                    );
                }
            }
        }

        Ok(())
    }
}
