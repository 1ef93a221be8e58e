//! Local-mode failure paths: the pipeline must commit a record even when
//! the control CLI is absent and every load fails.

use bench_backends::LocalBackend;
use bench_core::{RunConfig, RunIndex};
use bench_runner::aggregator::INDEX_FILE;
use bench_runner::Orchestrator;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test(flavor = "multi_thread")]
async fn load_failure_still_commits_an_error_record() {
    // The mock serves the HTTP side; the `lms` control CLI is not on PATH
    // in the test environment, so unload/load/catalog all fail. The
    // pipeline must reach Finalizing regardless.
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let config = RunConfig::local(dir.path().join("run"))
        .with_generation_timeout(Duration::from_secs(2));
    let orchestrator = Orchestrator::new(config.clone()).expect("orchestrator");
    let backend = LocalBackend::with_base_url(&server.uri(), &config).expect("backend");

    let summary = orchestrator
        .run_local(&backend, &["demo/8b".to_string()])
        .await;

    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.succeeded, 0);
    assert!(!summary.has_write_failures());

    let text = std::fs::read_to_string(orchestrator.aggregator().out_dir().join(INDEX_FILE))
        .expect("read index");
    let index: RunIndex = serde_json::from_str(&text).expect("parse index");
    assert_eq!(index.records.len(), 1);

    let record = &index.records[0];
    assert_eq!(record.model_id, "demo/8b");
    assert!(record.error.is_some(), "load failure must be encoded in the record");
    assert!(record.resolved_key.is_some());
    assert!(record.load_time_seconds.is_none());
    // Generation was never attempted, so telemetry stays absent.
    assert!(record.memory.is_none());
    assert!(record.power.is_none());
}
