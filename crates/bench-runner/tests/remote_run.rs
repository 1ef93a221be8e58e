//! End-to-end remote-mode orchestration against a mock aggregator API.

use bench_backends::RemoteBackend;
use bench_core::{GenerationStatus, RunConfig, RunIndex};
use bench_runner::aggregator::INDEX_FILE;
use bench_runner::Orchestrator;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ok_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 9, "completion_tokens": 18, "total_tokens": 27, "cost": 0.001}
    })
}

fn read_index(orchestrator: &Orchestrator) -> RunIndex {
    let text = std::fs::read_to_string(orchestrator.aggregator().out_dir().join(INDEX_FILE))
        .expect("read index");
    serde_json::from_str(&text).expect("parse index")
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_pool_bounds_concurrent_generations() {
    let server = MockServer::start().await;
    let delay = Duration::from_millis(300);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ok_body("<html><body>ok</body></html>"))
                .set_delay(delay),
        )
        .expect(4)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let config = RunConfig::remote(dir.path().join("run"), 2)
        .with_generation_timeout(Duration::from_secs(5));
    let orchestrator = Orchestrator::new(config.clone()).expect("orchestrator");
    let backend =
        Arc::new(RemoteBackend::with_base_url(&server.uri(), "sk-test", &config).expect("backend"));

    let models: Vec<String> = (0..4).map(|i| format!("vendor/model-{i}")).collect();
    let started = Instant::now();
    let summary = orchestrator.run_remote(backend, &models).await;
    let elapsed = started.elapsed();

    assert_eq!(summary.attempted, 4);
    assert_eq!(summary.succeeded, 4);
    assert!(!summary.has_write_failures());

    // Width 2 over 4 requests of ~300ms each needs at least two batches.
    assert!(
        elapsed >= delay * 2,
        "4 requests at width 2 finished in {elapsed:?}, pool bound was not enforced"
    );

    let index = read_index(&orchestrator);
    assert_eq!(index.records.len(), 4);
    for record in &index.records {
        assert_eq!(record.generation.status, GenerationStatus::Ok);
        assert!(record.artifacts.raw_text.is_some());
        assert!(record.artifacts.html.is_some());
        assert!(record.generation.tokens_per_second().is_some());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_generation_still_produces_a_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({"model": "vendor/broken"})))
        .respond_with(ResponseTemplate::new(500).set_body_string("exploded"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({"model": "vendor/fine"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("fine")))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let config = RunConfig::remote(dir.path().join("run"), 2)
        .with_generation_timeout(Duration::from_secs(5));
    let orchestrator = Orchestrator::new(config.clone()).expect("orchestrator");
    let backend =
        Arc::new(RemoteBackend::with_base_url(&server.uri(), "sk-test", &config).expect("backend"));

    let models = vec!["vendor/broken".to_string(), "vendor/fine".to_string()];
    let summary = orchestrator.run_remote(backend, &models).await;

    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.succeeded, 1);

    let index = read_index(&orchestrator);
    assert_eq!(index.records.len(), 2, "no record may be silently dropped");

    let broken = index
        .records
        .iter()
        .find(|r| r.model_id == "vendor/broken")
        .expect("broken record");
    assert_eq!(broken.generation.status, GenerationStatus::EndpointError);
    assert!(broken.error.as_deref().is_some());
    assert!(broken.artifacts.raw_text.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn existing_records_are_skipped_on_rerun() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("once")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let config = RunConfig::remote(dir.path().join("run"), 1)
        .with_generation_timeout(Duration::from_secs(5));
    let models = vec!["vendor/model".to_string()];

    let orchestrator = Orchestrator::new(config.clone()).expect("orchestrator");
    let backend =
        Arc::new(RemoteBackend::with_base_url(&server.uri(), "sk-test", &config).expect("backend"));
    let first = orchestrator.run_remote(Arc::clone(&backend), &models).await;
    assert_eq!(first.attempted, 1);
    assert_eq!(first.skipped, 0);

    // Same run directory: the committed record short-circuits the model.
    let rerun = Orchestrator::new(config).expect("orchestrator");
    let second = rerun.run_remote(backend, &models).await;
    assert_eq!(second.attempted, 0);
    assert_eq!(second.skipped, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_record_carries_timeout_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ok_body("late"))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let config = RunConfig::remote(dir.path().join("run"), 1)
        .with_generation_timeout(Duration::from_millis(250));
    let orchestrator = Orchestrator::new(config.clone()).expect("orchestrator");
    let backend =
        Arc::new(RemoteBackend::with_base_url(&server.uri(), "sk-test", &config).expect("backend"));

    let summary = orchestrator
        .run_remote(backend, &["vendor/slow".to_string()])
        .await;
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.succeeded, 0);

    let index = read_index(&orchestrator);
    assert_eq!(index.records.len(), 1);
    assert_eq!(index.records[0].generation.status, GenerationStatus::Timeout);
}
