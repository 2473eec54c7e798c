//! Elasticsearch destination over the REST API
//!
//! Documents are stamped with the run timestamp and bulk-indexed under
//! client-generated ids, so a unit re-sent by the per-unit fallback
//! overwrites instead of duplicating. Finalization deletes every document
//! stamped before this run.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use super::http;
use super::Destination;
use crate::chunk::Chunk;
use crate::error::{DeliveryError, LoadError, PipelineError, PipelineResult};

pub const DEFAULT_ES_PORT: u16 = 9200;
pub const DEFAULT_ES_BUFFER_SIZE: usize = 500;
pub const DEFAULT_ES_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TIMESTAMP_FIELD: &str = "__eml_timestamp__";

#[derive(Debug, Clone, Deserialize)]
pub struct ElasticsearchConfig {
    /// Host name or base URL; `http://` is assumed without a scheme
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub index: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    #[serde(default = "default_shards")]
    pub shards: u32,
    #[serde(default)]
    pub replicas: u32,
}

fn default_port() -> u16 {
    DEFAULT_ES_PORT
}

fn default_buffer_size() -> usize {
    DEFAULT_ES_BUFFER_SIZE
}

fn default_timeout() -> u64 {
    DEFAULT_ES_TIMEOUT_SECS
}

fn default_timestamp_field() -> String {
    DEFAULT_TIMESTAMP_FIELD.to_string()
}

fn default_shards() -> u32 {
    2
}

pub struct ElasticsearchDestination {
    config: ElasticsearchConfig,
    client: reqwest::Client,
    base: Url,
    /// Run timestamp written into every document
    stamp: String,
}

impl ElasticsearchDestination {
    pub fn new(config: ElasticsearchConfig, started_at: DateTime<Utc>) -> PipelineResult<Self> {
        let base = base_url(&config.host, config.port)?;
        let client = http::client(Duration::from_secs(config.timeout_seconds))?;

        Ok(Self {
            stamp: started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            config,
            client,
            base,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.config.buffer_size
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}{}",
            self.base.as_str().trim_end_matches('/'),
            self.config.index,
            path
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.request(method, self.url(path));
        match &self.config.username {
            Some(user) => request.basic_auth(user, self.config.password.as_deref()),
            None => request,
        }
    }

    fn init_error(&self, source: DeliveryError) -> LoadError {
        LoadError::Init {
            destination: self.name().to_string(),
            source,
        }
    }
}

fn base_url(host: &str, port: u16) -> PipelineResult<Url> {
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };

    let invalid = |message: String| PipelineError::config("elasticsearch", message);

    let mut url =
        Url::parse(&with_scheme).map_err(|e| invalid(format!("invalid host '{host}': {e}")))?;
    if url.port().is_none() {
        url.set_port(Some(port))
            .map_err(|_| invalid(format!("host '{host}' cannot take a port")))?;
    }
    Ok(url)
}

/// First item-level error of a bulk response with `errors: true`
fn bulk_error(response: &Value) -> Option<String> {
    if !response.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }

    let reason = response
        .get("items")
        .and_then(Value::as_array)
        .and_then(|items| {
            items.iter().find_map(|item| {
                item.as_object()?
                    .values()
                    .find_map(|action| action.get("error"))
                    .map(Value::to_string)
            })
        })
        .unwrap_or_else(|| "bulk request reported errors".to_string());
    Some(reason)
}

#[async_trait]
impl Destination for ElasticsearchDestination {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    async fn prepare(&mut self) -> Result<(), LoadError> {
        let settings = json!({
            "settings": {
                "number_of_shards": self.config.shards,
                "number_of_replicas": self.config.replicas,
            }
        });

        match http::send(self.request(reqwest::Method::PUT, "").json(&settings)).await {
            Ok(_) => info!(index = %self.config.index, "Index created"),
            Err(DeliveryError::Rejected(reason)) => {
                warn!(
                    index = %self.config.index,
                    %reason,
                    "Index not created, assuming it already exists"
                )
            }
            Err(e) => return Err(self.init_error(e)),
        }

        let mut properties = serde_json::Map::new();
        properties.insert(self.config.timestamp_field.clone(), json!({ "type": "date" }));
        let mapping = json!({ "properties": properties });
        http::send(self.request(reqwest::Method::PUT, "/_mapping").json(&mapping))
            .await
            .map_err(|e| self.init_error(e))?;

        Ok(())
    }

    fn encode(&mut self, chunk: Chunk) -> Result<Vec<String>, LoadError> {
        let mut document = match chunk {
            Chunk::Value(Value::Object(document)) => document,
            other => {
                return Err(LoadError::UnsupportedChunk {
                    destination: self.name().to_string(),
                    kind: other.kind(),
                })
            }
        };
        document.insert(
            self.config.timestamp_field.clone(),
            Value::String(self.stamp.clone()),
        );

        let action = json!({ "index": { "_id": Uuid::new_v4().to_string() } });
        Ok(vec![format!("{action}\n{}", Value::Object(document))])
    }

    async fn deliver(&self, units: &[String]) -> Result<(), DeliveryError> {
        let mut body = units.join("\n");
        body.push('\n');

        let response = http::send(
            self.request(reqwest::Method::POST, "/_bulk")
                .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                .body(body),
        )
        .await?;

        let parsed: Value = serde_json::from_str(&response)
            .map_err(|e| DeliveryError::Rejected(format!("unreadable bulk response: {e}")))?;
        match bulk_error(&parsed) {
            Some(reason) => Err(DeliveryError::Rejected(reason)),
            None => Ok(()),
        }
    }

    async fn finalize(&mut self) -> Result<(), LoadError> {
        let mut range = serde_json::Map::new();
        range.insert(self.config.timestamp_field.clone(), json!({ "lt": self.stamp }));
        let query = json!({ "query": { "range": range } });

        let response = http::send(
            self.request(reqwest::Method::POST, "/_delete_by_query?conflicts=proceed")
                .json(&query),
        )
        .await
        .map_err(|source| LoadError::Finalize {
            destination: self.name().to_string(),
            source,
        })?;

        let deleted = serde_json::from_str::<Value>(&response)
            .ok()
            .and_then(|v| v.get("deleted").and_then(Value::as_u64))
            .unwrap_or(0);
        info!(index = %self.config.index, deleted, "Removed documents from previous runs");
        Ok(())
    }
}
