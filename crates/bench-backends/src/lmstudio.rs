//! Local inference server backend.
//!
//! The local server is driven two ways: a companion control CLI (`lms`) for
//! load/unload/inventory, invoked as a subprocess, and an HTTP endpoint
//! pair for generation. Load time is measured as wall clock around the CLI
//! invocation. The REST inventory is preferred over the CLI listing because
//! its identifiers match what the chat endpoints accept.

use crate::client::{ChatOutcome, EndpointClient};
use crate::resolver::InstalledModel;
use bench_core::{BenchError, BenchResult, GenerationParams, PromptConfig, RunConfig};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

/// Default base URL of the local server.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:1234";

/// Environment variable overriding the local server's base URL.
pub const BASE_URL_ENV: &str = "LMSTUDIO_API_BASE";

/// Substrings identifying the local backend's processes for memory
/// attribution, matched case-insensitively against name and command line.
pub const PROCESS_MATCHERS: [&str; 3] = ["lm studio", "lmstudio", "lms"];

/// Rich-stats endpoint path (primary).
const REST_CHAT_PATH: &str = "/api/v0/chat/completions";
/// Compatibility endpoint path (fallback).
const COMPAT_CHAT_PATH: &str = "/v1/chat/completions";
/// Model inventory path.
const REST_MODELS_PATH: &str = "/api/v0/models";

/// How long to poll for server readiness, and at what cadence.
const READINESS_ATTEMPTS: u32 = 60;
const READINESS_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// Control-CLI wrapper for the local server.
#[derive(Debug, Clone)]
pub struct LmsCli {
    tool: String,
    gpu_offload: String,
}

impl LmsCli {
    /// Wrapper around the default `lms` binary.
    pub fn new(gpu_offload: impl Into<String>) -> Self {
        Self {
            tool: "lms".to_string(),
            gpu_offload: gpu_offload.into(),
        }
    }

    /// Best-effort unload of every loaded model. Failure is logged and
    /// swallowed: an already-empty server reports an error here.
    pub async fn unload_all(&self) {
        match Command::new(&self.tool).args(["unload", "--all"]).output().await {
            Ok(out) if out.status.success() => debug!("unloaded all models"),
            Ok(out) => debug!(status = %out.status, "unload --all reported failure"),
            Err(e) => warn!(error = %e, "could not invoke control CLI for unload"),
        }
    }

    /// Load a model by key, returning the wall-clock load time in seconds.
    pub async fn load(&self, key: &str) -> BenchResult<f64> {
        let started = Instant::now();
        let out = Command::new(&self.tool)
            .args(["load", key, "--gpu", &self.gpu_offload, "-y"])
            .output()
            .await
            .map_err(|e| BenchError::ControlCli(format!("{}: {e}", self.tool)))?;

        if !out.status.success() {
            return Err(BenchError::LoadFailure {
                model: key.to_string(),
                message: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(started.elapsed().as_secs_f64())
    }

    /// Start the server if it is not already running. The CLI exits
    /// non-zero when the server is already up, so failures are tolerated
    /// and readiness is probed over HTTP instead.
    pub async fn start_server(&self) {
        match Command::new(&self.tool).args(["server", "start"]).output().await {
            Ok(out) if out.status.success() => debug!("server start issued"),
            Ok(out) => debug!(status = %out.status, "server start reported failure"),
            Err(e) => warn!(error = %e, "could not invoke control CLI for server start"),
        }
    }

    /// Installed-model catalog via the listing subcommand.
    pub async fn installed_models(&self) -> BenchResult<Vec<InstalledModel>> {
        let out = Command::new(&self.tool)
            .args(["ls", "--llm", "--json"])
            .output()
            .await
            .map_err(|e| BenchError::ControlCli(format!("{}: {e}", self.tool)))?;
        if !out.status.success() {
            return Err(BenchError::ControlCli(format!(
                "ls --llm --json exited with {}",
                out.status
            )));
        }
        let catalog: Vec<InstalledModel> = serde_json::from_slice(&out.stdout)?;
        Ok(catalog)
    }
}

/// Local backend: control CLI plus chat endpoint pair.
#[derive(Debug)]
pub struct LocalBackend {
    cli: LmsCli,
    client: EndpointClient,
    http: reqwest::Client,
    models_url: Url,
}

impl LocalBackend {
    /// Build from the run configuration, honoring the base-URL override
    /// from the environment.
    pub fn from_env(config: &RunConfig) -> BenchResult<Self> {
        let base = std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(&base, config)
    }

    /// Build against an explicit base URL (tests point this at a mock).
    pub fn with_base_url(base: &str, config: &RunConfig) -> BenchResult<Self> {
        let base: Url = base
            .parse()
            .map_err(|e| BenchError::Configuration(format!("invalid base URL '{base}': {e}")))?;
        let join = |path: &str| {
            base.join(path)
                .map_err(|e| BenchError::Configuration(format!("invalid path '{path}': {e}")))
        };

        let client = EndpointClient::new(
            join(REST_CHAT_PATH)?,
            Some(join(COMPAT_CHAT_PATH)?),
            config.connect_timeout,
            config.generation_timeout,
        )
        .map_err(|e| BenchError::Configuration(format!("http client: {e}")))?;

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| BenchError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            cli: LmsCli::new(config.gpu_offload.clone()),
            client,
            http,
            models_url: join(REST_MODELS_PATH)?,
        })
    }

    /// Access the control CLI.
    pub fn cli(&self) -> &LmsCli {
        &self.cli
    }

    /// Start the server if needed and wait until the inventory endpoint
    /// responds.
    pub async fn ensure_server(&self) -> BenchResult<()> {
        self.cli.start_server().await;
        for attempt in 0..READINESS_ATTEMPTS {
            match self.http.get(self.models_url.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(attempts = attempt + 1, "local server ready");
                    return Ok(());
                }
                Ok(resp) => debug!(status = %resp.status(), "server not ready"),
                Err(e) => debug!(error = %e, "server not reachable"),
            }
            tokio::time::sleep(READINESS_DELAY).await;
        }
        Err(BenchError::EndpointUnavailable(format!(
            "local server did not come up at {}",
            self.models_url
        )))
    }

    /// API-facing identifiers of every installed LLM.
    ///
    /// Prefers the REST inventory; falls back to the CLI listing when the
    /// inventory is empty or unreachable.
    pub async fn list_model_ids(&self) -> BenchResult<Vec<String>> {
        match self.rest_model_ids().await {
            Ok(ids) if !ids.is_empty() => return Ok(ids),
            Ok(_) => debug!("REST inventory empty, falling back to CLI listing"),
            Err(e) => debug!(error = %e, "REST inventory unavailable, falling back to CLI listing"),
        }
        let catalog = self.cli.installed_models().await?;
        Ok(catalog.into_iter().map(|m| m.key).collect())
    }

    async fn rest_model_ids(&self) -> BenchResult<Vec<String>> {
        let resp = self
            .http
            .get(self.models_url.clone())
            .send()
            .await
            .map_err(|e| BenchError::EndpointUnavailable(e.to_string()))?;
        let models: ModelsResponse = resp
            .json()
            .await
            .map_err(|e| BenchError::EndpointUnavailable(e.to_string()))?;
        Ok(models
            .data
            .into_iter()
            .filter(|m| m.kind.as_deref().map_or(true, |k| k == "llm"))
            .map(|m| m.id)
            .collect())
    }

    /// Installed-model catalog for load-key resolution.
    pub async fn installed_catalog(&self) -> BenchResult<Vec<InstalledModel>> {
        self.cli.installed_models().await
    }

    /// Issue the single generation call for `model_id`.
    pub async fn generate(
        &self,
        model_id: &str,
        prompt: &PromptConfig,
        params: &GenerationParams,
    ) -> ChatOutcome {
        self.client.generate(model_id, prompt, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_core::GenerationStatus;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> RunConfig {
        RunConfig::local("out").with_generation_timeout(Duration::from_secs(2))
    }

    fn chat_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30},
            "stats": {"tokens_per_second": 42.0, "time_to_first_token": 0.5}
        })
    }

    #[tokio::test]
    async fn primary_endpoint_is_preferred() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REST_CHAT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("rich")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(COMPAT_CHAT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("compat")))
            .expect(0)
            .mount(&server)
            .await;

        let backend = LocalBackend::with_base_url(&server.uri(), &test_config()).expect("backend");
        let outcome = backend
            .generate("demo/8b", &PromptConfig::default(), &GenerationParams::default())
            .await;

        assert_eq!(outcome.status, GenerationStatus::Ok);
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.response.expect("response").content(), Some("rich"));
    }

    #[tokio::test]
    async fn not_found_triggers_single_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REST_CHAT_PATH))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(COMPAT_CHAT_PATH))
            .and(body_partial_json(serde_json::json!({"model": "demo/8b"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("compat")))
            .expect(1)
            .mount(&server)
            .await;

        let backend = LocalBackend::with_base_url(&server.uri(), &test_config()).expect("backend");
        let outcome = backend
            .generate("demo/8b", &PromptConfig::default(), &GenerationParams::default())
            .await;

        assert_eq!(outcome.status, GenerationStatus::Ok);
        assert!(outcome.used_fallback);
        assert_eq!(outcome.response.expect("response").content(), Some("compat"));
    }

    #[tokio::test]
    async fn timeout_never_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REST_CHAT_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_body("late"))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(COMPAT_CHAT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("compat")))
            .expect(0)
            .mount(&server)
            .await;

        let config = test_config().with_generation_timeout(Duration::from_millis(300));
        let backend = LocalBackend::with_base_url(&server.uri(), &config).expect("backend");
        let outcome = backend
            .generate("demo/8b", &PromptConfig::default(), &GenerationParams::default())
            .await;

        assert_eq!(outcome.status, GenerationStatus::Timeout);
        assert!(!outcome.used_fallback);
        assert!(outcome.response.is_none());
    }

    #[tokio::test]
    async fn server_error_is_terminal_without_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REST_CHAT_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(COMPAT_CHAT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("compat")))
            .expect(0)
            .mount(&server)
            .await;

        let backend = LocalBackend::with_base_url(&server.uri(), &test_config()).expect("backend");
        let outcome = backend
            .generate("demo/8b", &PromptConfig::default(), &GenerationParams::default())
            .await;

        assert_eq!(outcome.status, GenerationStatus::EndpointError);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn connect_failure_falls_back() {
        // Primary points at a port nothing listens on; fallback is live.
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPAT_CHAT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("compat")))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config();
        let primary =
            Url::parse("http://127.0.0.1:9/api/v0/chat/completions").expect("url");
        let fallback = Url::parse(&format!("{}{COMPAT_CHAT_PATH}", server.uri())).expect("url");
        let client = EndpointClient::new(
            primary,
            Some(fallback),
            config.connect_timeout,
            config.generation_timeout,
        )
        .expect("client");

        let outcome = client
            .generate("demo/8b", &PromptConfig::default(), &GenerationParams::default())
            .await;

        assert_eq!(outcome.status, GenerationStatus::Ok);
        assert!(outcome.used_fallback);
    }

    #[tokio::test]
    async fn rest_inventory_filters_to_llms() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(REST_MODELS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"id": "demo/8b", "type": "llm"},
                    {"id": "embed/mini", "type": "embeddings"},
                    {"id": "other/7b", "type": "llm"}
                ]
            })))
            .mount(&server)
            .await;

        let backend = LocalBackend::with_base_url(&server.uri(), &test_config()).expect("backend");
        let ids = backend.list_model_ids().await.expect("ids");
        assert_eq!(ids, vec!["demo/8b".to_string(), "other/7b".to_string()]);
    }
}
