//! Component registry: builds pipelines from configuration
//!
//! A component is configured by a `type` tag plus free-form options:
//!
//! ```toml
//! type = "csv"
//! uri = "data/airports.csv"
//! delimiter = ";"
//! ```
//!
//! The registry maps each tag to a factory per stage. [`Registry::builtin`]
//! knows every component shipped with this crate; callers may register more.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::engine::Pipeline;
use crate::error::{PipelineError, PipelineResult};
use crate::extract::{
    CsvConfig, CsvExtractor, Extractor, InlineConfig, InlineExtractor, JsonConfig, JsonExtractor,
    XmlConfig, XmlExtractor,
};
use crate::load::{
    BufferedLoader, ElasticsearchConfig, ElasticsearchDestination, FileConfig, FileDestination,
    GraphRegistry, Loader, MemoryGraphRegistry, SparqlConfig, SparqlDestination,
};
use crate::map::{Mapper, RdfConfig, RdfMapper};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl ComponentConfig {
    pub fn new(kind: impl Into<String>, options: Value) -> Self {
        let options = match options {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            kind: kind.into(),
            options,
        }
    }

    /// Deserialize the options into a component's typed configuration
    pub fn parse<T: DeserializeOwned>(&self) -> PipelineResult<T> {
        serde_json::from_value(Value::Object(self.options.clone()))
            .map_err(|e| PipelineError::config(&self.kind, e))
    }
}

/// Everything needed to build one pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub extract: ComponentConfig,
    #[serde(default)]
    pub map: Option<ComponentConfig>,
    #[serde(default)]
    pub load: Option<ComponentConfig>,
}

/// Shared state handed to every factory
#[derive(Clone)]
pub struct BuildContext {
    pub graph_registry: Arc<dyn GraphRegistry>,
    /// Run timestamp used for graph versions and document stamps
    pub started_at: DateTime<Utc>,
}

impl BuildContext {
    pub fn new(graph_registry: Arc<dyn GraphRegistry>) -> Self {
        Self {
            graph_registry,
            started_at: Utc::now(),
        }
    }

    /// Context backed by an in-memory graph registry
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryGraphRegistry::new()))
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }
}

pub type ExtractorFactory =
    fn(&ComponentConfig, &BuildContext) -> PipelineResult<Box<dyn Extractor>>;
pub type MapperFactory = fn(&ComponentConfig, &BuildContext) -> PipelineResult<Box<dyn Mapper>>;
pub type LoaderFactory = fn(&ComponentConfig, &BuildContext) -> PipelineResult<Box<dyn Loader>>;

#[derive(Default)]
pub struct Registry {
    extractors: HashMap<String, ExtractorFactory>,
    mappers: HashMap<String, MapperFactory>,
    loaders: HashMap<String, LoaderFactory>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register_extractor("csv", |c, _| {
            Ok(Box::new(CsvExtractor::new(c.parse::<CsvConfig>()?)?))
        });
        registry.register_extractor("json", |c, _| {
            Ok(Box::new(JsonExtractor::new(c.parse::<JsonConfig>()?)))
        });
        registry.register_extractor("xml", |c, _| {
            Ok(Box::new(XmlExtractor::new(c.parse::<XmlConfig>()?)))
        });
        registry.register_extractor("inline", |c, _| {
            Ok(Box::new(InlineExtractor::new(c.parse::<InlineConfig>()?)))
        });

        registry.register_mapper("rdf", |c, _| {
            Ok(Box::new(RdfMapper::new(c.parse::<RdfConfig>()?)?))
        });

        registry.register_loader("sparql", |c, ctx| {
            let dest = SparqlDestination::new(
                c.parse::<SparqlConfig>()?,
                Arc::clone(&ctx.graph_registry),
                ctx.started_at,
            )?;
            let size = dest.buffer_size();
            Ok(Box::new(BufferedLoader::new(dest, size)))
        });
        registry.register_loader("elasticsearch", |c, ctx| {
            let dest =
                ElasticsearchDestination::new(c.parse::<ElasticsearchConfig>()?, ctx.started_at)?;
            let size = dest.buffer_size();
            Ok(Box::new(BufferedLoader::new(dest, size)))
        });
        registry.register_loader("file", |c, _| {
            let dest = FileDestination::new(c.parse::<FileConfig>()?);
            let size = dest.buffer_size();
            Ok(Box::new(BufferedLoader::new(dest, size)))
        });

        registry
    }

    pub fn register_extractor(&mut self, kind: &str, factory: ExtractorFactory) {
        self.extractors.insert(kind.to_string(), factory);
    }

    pub fn register_mapper(&mut self, kind: &str, factory: MapperFactory) {
        self.mappers.insert(kind.to_string(), factory);
    }

    pub fn register_loader(&mut self, kind: &str, factory: LoaderFactory) {
        self.loaders.insert(kind.to_string(), factory);
    }

    pub fn build_extractor(
        &self,
        config: &ComponentConfig,
        ctx: &BuildContext,
    ) -> PipelineResult<Box<dyn Extractor>> {
        let factory = lookup(&self.extractors, "extract", &config.kind)?;
        factory(config, ctx)
    }

    pub fn build_mapper(
        &self,
        config: &ComponentConfig,
        ctx: &BuildContext,
    ) -> PipelineResult<Box<dyn Mapper>> {
        let factory = lookup(&self.mappers, "map", &config.kind)?;
        factory(config, ctx)
    }

    pub fn build_loader(
        &self,
        config: &ComponentConfig,
        ctx: &BuildContext,
    ) -> PipelineResult<Box<dyn Loader>> {
        let factory = lookup(&self.loaders, "load", &config.kind)?;
        factory(config, ctx)
    }

    pub fn build(&self, config: &PipelineConfig, ctx: &BuildContext) -> PipelineResult<Pipeline> {
        let mut pipeline = Pipeline::new(&config.name, self.build_extractor(&config.extract, ctx)?);
        if let Some(map) = &config.map {
            pipeline = pipeline.with_mapper(self.build_mapper(map, ctx)?);
        }
        if let Some(load) = &config.load {
            pipeline = pipeline.with_loader(self.build_loader(load, ctx)?);
        }

        debug!(
            pipeline = %config.name,
            extract = %config.extract.kind,
            map = config.map.as_ref().map(|c| c.kind.as_str()),
            load = config.load.as_ref().map(|c| c.kind.as_str()),
            "Pipeline built"
        );
        Ok(pipeline)
    }
}

fn lookup<'a, F>(
    factories: &'a HashMap<String, F>,
    stage: &'static str,
    kind: &str,
) -> PipelineResult<&'a F> {
    factories
        .get(kind)
        .ok_or_else(|| PipelineError::UnknownComponent {
            stage,
            kind: kind.to_string(),
        })
}
