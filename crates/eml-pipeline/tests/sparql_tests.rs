//! SPARQL destination against a mock Update endpoint

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use common::init_test_tracing;
use eml_pipeline::load::{SparqlConfig, SparqlDestination};
use eml_pipeline::{
    BufferedLoader, GraphRegistry, GraphVersion, Loader, LossReason, MemoryGraphRegistry, Pipeline,
};
use eml_pipeline::extract::InlineExtractor;
use eml_pipeline::map::RdfMapper;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const GRAPH: &str = "http://example.org/airports";

fn update_statement(request: &Request) -> String {
    url::form_urlencoded::parse(&request.body)
        .find(|(key, _)| key == "update")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}

async fn statements(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(update_statement)
        .collect()
}

fn mapper() -> RdfMapper {
    RdfMapper::new(
        serde_json::from_value(json!({
            "base_uri": "http://example.org/",
            "subject": "airport/{id}",
            "columns": {"name": "name"}
        }))
        .unwrap(),
    )
    .unwrap()
}

fn loader(
    server: &MockServer,
    registry: Arc<MemoryGraphRegistry>,
    buffer_size: usize,
) -> BufferedLoader<SparqlDestination> {
    let config: SparqlConfig = serde_json::from_value(json!({
        "endpoint": format!("{}/sparql", server.uri()),
        "graph_name": GRAPH,
        "buffer_size": buffer_size,
        "timeout_seconds": 5
    }))
    .unwrap();
    let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let dest = SparqlDestination::new(config, registry, at).unwrap();
    BufferedLoader::new(dest, buffer_size)
}

fn airports() -> InlineExtractor {
    [
        json!({"id": "1", "name": "Goroka"}),
        json!({"id": "2", "name": "Madang"}),
        json!({"id": "3", "name": "Mount Hagen"}),
    ]
    .into_iter()
    .collect()
}

#[tokio::test]
async fn test_run_loads_new_graph_and_clears_previous_version() {
    init_test_tracing();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sparql"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let registry = Arc::new(MemoryGraphRegistry::new());
    let previous = GraphVersion::new(GRAPH, Utc.timestamp_opt(1_600_000_000, 0).unwrap());
    registry.save(&previous).await.unwrap();

    let mut pipeline = Pipeline::new("airports", Box::new(airports()))
        .with_mapper(Box::new(mapper()))
        .with_loader(Box::new(loader(&server, Arc::clone(&registry), 2)));
    let summary = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.load.units_delivered, 3);
    assert_eq!(summary.load.batches_attempted, 2);

    let sent = statements(&server).await;
    assert_eq!(sent.len(), 4, "{sent:#?}");
    assert!(sent[0].starts_with("INSERT DATA { GRAPH <http://example.org/airports#1700000000> {"));
    assert!(sent[0]
        .contains("<http://example.org/airport/1> <http://example.org/name> \"Goroka\" ."));
    assert!(sent[1].contains("\"Mount Hagen\""));
    assert!(sent[2].contains("<http://purl.org/dc/terms/created>"));
    assert!(sent[2]
        .contains("\"2023-11-14T22:13:20Z\"^^<http://www.w3.org/2001/XMLSchema#dateTime>"));
    assert_eq!(sent[3], "CLEAR GRAPH <http://example.org/airports#1600000000>");

    let versions = registry.list(GRAPH).await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].graph_id, "http://example.org/airports#1700000000");
}

#[tokio::test]
async fn test_failed_clear_keeps_previous_record() {
    init_test_tracing();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sparql"))
        .and(body_string_contains("CLEAR+GRAPH"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sparql"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let registry = Arc::new(MemoryGraphRegistry::new());
    let previous = GraphVersion::new(GRAPH, Utc.timestamp_opt(1_600_000_000, 0).unwrap());
    registry.save(&previous).await.unwrap();

    let mut loader = loader(&server, Arc::clone(&registry), 10);
    loader.init().await.unwrap();
    let report = loader.clean_up().await.unwrap();
    assert!(report.lost.is_empty());

    let mut ids: Vec<String> = registry
        .list(GRAPH)
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.graph_id)
        .collect();
    ids.sort();
    assert_eq!(
        ids,
        vec![
            "http://example.org/airports#1600000000".to_string(),
            "http://example.org/airports#1700000000".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_rejected_batch_is_retried_per_triple() {
    init_test_tracing();

    let server = MockServer::start().await;
    // The endpoint refuses any update that mentions the second airport
    Mock::given(method("POST"))
        .and(path("/sparql"))
        .and(body_string_contains("Madang"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad literal"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sparql"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let registry = Arc::new(MemoryGraphRegistry::new());
    let mut pipeline = Pipeline::new("airports", Box::new(airports()))
        .with_mapper(Box::new(mapper()))
        .with_loader(Box::new(loader(&server, registry, 3)));
    let summary = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.load.batches_attempted, 1);
    assert_eq!(summary.load.batches_delivered, 0);
    assert_eq!(summary.load.units_delivered, 2);
    assert_eq!(summary.load.lost.len(), 1);
    assert!(summary.load.lost[0].unit.contains("Madang"));
    assert!(matches!(summary.load.lost[0].reason, LossReason::Rejected(_)));

    // batch, three single triples, created stamp
    assert_eq!(statements(&server).await.len(), 5);
}

#[tokio::test]
async fn test_unavailable_endpoint_abandons_batch_after_retry() {
    init_test_tracing();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sparql"))
        .and(body_string_contains("Goroka"))
        .respond_with(ResponseTemplate::new(503))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sparql"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let registry = Arc::new(MemoryGraphRegistry::new());
    let mut pipeline = Pipeline::new("airports", Box::new(airports()))
        .with_mapper(Box::new(mapper()))
        .with_loader(Box::new(loader(&server, registry, 2)));
    let summary = pipeline.run(&CancellationToken::new()).await.unwrap();

    // First batch (Goroka, Madang) fails twice and is dropped whole
    assert_eq!(summary.load.lost.len(), 2);
    assert!(summary
        .load
        .lost
        .iter()
        .all(|lost| matches!(lost.reason, LossReason::Transport(_))));
    assert_eq!(summary.load.units_delivered, 1);
}
