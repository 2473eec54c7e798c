//! Job definitions: named pipelines assembled from reusable components
//!
//! Components are declared once and referenced by id from jobs:
//!
//! ```toml
//! [[components]]
//! id = "airports-csv"
//! stage = "extract"
//! config = { type = "csv", uri = "data/airports.csv" }
//!
//! [[components]]
//! id = "triplestore"
//! stage = "load"
//! config = { type = "sparql", endpoint = "http://localhost:8890/sparql", graph_name = "http://example.org/airports" }
//!
//! [[jobs]]
//! identifier = "airports"
//! extractor = "airports-csv"
//! loader = "triplestore"
//! ```

use async_trait::async_trait;
use eml_pipeline::{ComponentConfig, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStage {
    Extract,
    Map,
    Load,
}

impl fmt::Display for ComponentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComponentStage::Extract => "extract",
            ComponentStage::Map => "map",
            ComponentStage::Load => "load",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub id: String,
    pub stage: ComponentStage,
    pub config: ComponentConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub identifier: String,
    pub extractor: String,
    #[serde(default)]
    pub mapper: Option<String>,
    #[serde(default)]
    pub loader: Option<String>,
}

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Unknown job '{0}'")]
    UnknownJob(String),

    #[error("Job '{job}' references unknown component '{component}'")]
    UnknownComponent { job: String, component: String },

    #[error(
        "Job '{job}' uses component '{component}' as {expected}, but it is a {found} component"
    )]
    WrongStage {
        job: String,
        component: String,
        expected: ComponentStage,
        found: ComponentStage,
    },

    #[error("Duplicate {kind} '{id}'")]
    Duplicate { kind: &'static str, id: String },

    #[error("Failed to read definitions from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid definitions file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Resolves job identifiers into pipeline configurations
#[async_trait]
pub trait DefinitionRepository: Send + Sync {
    async fn resolve(&self, identifier: &str) -> Result<PipelineConfig, DefinitionError>;

    async fn identifiers(&self) -> Result<Vec<String>, DefinitionError>;
}

#[derive(Debug, Default, Deserialize)]
struct DefinitionsFile {
    #[serde(default)]
    components: Vec<ComponentDefinition>,
    #[serde(default)]
    jobs: Vec<JobDefinition>,
}

/// Definitions loaded once from a TOML file
#[derive(Debug, Clone, Default)]
pub struct FileDefinitions {
    components: HashMap<String, ComponentDefinition>,
    jobs: HashMap<String, JobDefinition>,
}

impl FileDefinitions {
    pub fn new(
        components: Vec<ComponentDefinition>,
        jobs: Vec<JobDefinition>,
    ) -> Result<Self, DefinitionError> {
        let mut definitions = Self::default();

        for component in components {
            if definitions.components.contains_key(&component.id) {
                return Err(DefinitionError::Duplicate {
                    kind: "component",
                    id: component.id,
                });
            }
            definitions.components.insert(component.id.clone(), component);
        }
        for job in jobs {
            if definitions.jobs.contains_key(&job.identifier) {
                return Err(DefinitionError::Duplicate {
                    kind: "job",
                    id: job.identifier,
                });
            }
            definitions.jobs.insert(job.identifier.clone(), job);
        }

        // Surface broken references at load time, not when a job is claimed
        for job in definitions.jobs.values() {
            definitions.assemble(job)?;
        }

        Ok(definitions)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, DefinitionError> {
        let file: DefinitionsFile = toml::from_str(text)?;
        Self::new(file.components, file.jobs)
    }

    pub async fn load(path: &Path) -> Result<Self, DefinitionError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| DefinitionError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let definitions = Self::from_toml_str(&text)?;

        info!(
            path = %path.display(),
            components = definitions.components.len(),
            jobs = definitions.jobs.len(),
            "Job definitions loaded"
        );
        Ok(definitions)
    }

    fn component(
        &self,
        job: &JobDefinition,
        id: &str,
        expected: ComponentStage,
    ) -> Result<ComponentConfig, DefinitionError> {
        let component = self
            .components
            .get(id)
            .ok_or_else(|| DefinitionError::UnknownComponent {
                job: job.identifier.clone(),
                component: id.to_string(),
            })?;

        if component.stage != expected {
            return Err(DefinitionError::WrongStage {
                job: job.identifier.clone(),
                component: id.to_string(),
                expected,
                found: component.stage,
            });
        }
        Ok(component.config.clone())
    }

    fn assemble(&self, job: &JobDefinition) -> Result<PipelineConfig, DefinitionError> {
        Ok(PipelineConfig {
            name: job.identifier.clone(),
            extract: self.component(job, &job.extractor, ComponentStage::Extract)?,
            map: job
                .mapper
                .as_deref()
                .map(|id| self.component(job, id, ComponentStage::Map))
                .transpose()?,
            load: job
                .loader
                .as_deref()
                .map(|id| self.component(job, id, ComponentStage::Load))
                .transpose()?,
        })
    }
}

#[async_trait]
impl DefinitionRepository for FileDefinitions {
    async fn resolve(&self, identifier: &str) -> Result<PipelineConfig, DefinitionError> {
        let job = self
            .jobs
            .get(identifier)
            .ok_or_else(|| DefinitionError::UnknownJob(identifier.to_string()))?;
        self.assemble(job)
    }

    async fn identifiers(&self) -> Result<Vec<String>, DefinitionError> {
        let mut ids: Vec<String> = self.jobs.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DEFINITIONS: &str = r#"
[[components]]
id = "rows"
stage = "extract"
config = { type = "inline", items = [{ id = "1" }] }

[[components]]
id = "to-rdf"
stage = "map"

[components.config]
type = "rdf"
base_uri = "http://example.org/"
subject = "row/{id}"

[[components]]
id = "out"
stage = "load"
config = { type = "file", path = "out.nt", buffer_size = 10 }

[[jobs]]
identifier = "rows"
extractor = "rows"
mapper = "to-rdf"
loader = "out"

[[jobs]]
identifier = "dry-run"
extractor = "rows"
"#;

    #[tokio::test]
    async fn test_resolves_job_into_pipeline_config() {
        let definitions = FileDefinitions::from_toml_str(DEFINITIONS).unwrap();

        let config = definitions.resolve("rows").await.unwrap();
        assert_eq!(config.name, "rows");
        assert_eq!(config.extract.kind, "inline");
        assert_eq!(config.extract.options.get("items"), Some(&json!([{"id": "1"}])));
        assert_eq!(config.map.as_ref().map(|m| m.kind.as_str()), Some("rdf"));
        assert_eq!(config.load.unwrap().options.get("buffer_size"), Some(&json!(10)));

        let dry = definitions.resolve("dry-run").await.unwrap();
        assert!(dry.map.is_none() && dry.load.is_none());

        assert_eq!(definitions.identifiers().await.unwrap(), vec!["dry-run", "rows"]);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let definitions = FileDefinitions::from_toml_str(DEFINITIONS).unwrap();
        assert!(matches!(
            definitions.resolve("missing").await,
            Err(DefinitionError::UnknownJob(id)) if id == "missing"
        ));
    }

    #[test]
    fn test_component_used_in_wrong_stage() {
        let text = format!("{DEFINITIONS}\n[[jobs]]\nidentifier = \"bad\"\nextractor = \"out\"\n");
        let err = FileDefinitions::from_toml_str(&text).unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::WrongStage {
                expected: ComponentStage::Extract,
                found: ComponentStage::Load,
                ..
            }
        ));
    }

    #[test]
    fn test_dangling_reference_and_duplicates() {
        let text = format!("{DEFINITIONS}\n[[jobs]]\nidentifier = \"bad\"\nextractor = \"nope\"\n");
        assert!(matches!(
            FileDefinitions::from_toml_str(&text),
            Err(DefinitionError::UnknownComponent { ref component, .. }) if component == "nope"
        ));

        let text =
            format!("{DEFINITIONS}\n[[jobs]]\nidentifier = \"rows\"\nextractor = \"rows\"\n");
        assert!(matches!(
            FileDefinitions::from_toml_str(&text),
            Err(DefinitionError::Duplicate { kind: "job", .. })
        ));
    }
}
