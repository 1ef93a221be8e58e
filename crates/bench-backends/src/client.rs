//! Chat endpoint client with primary/fallback routing.
//!
//! Exactly one generation call is made per model, under a hard wall-clock
//! budget: a short fixed connect timeout plus a configurable read timeout.
//! A timeout is terminal; there is no retry, so a run's total duration
//! stays bounded.
//!
//! The primary endpoint (rich per-request statistics) is tried first. The
//! compatibility fallback is attempted only when the primary response is a
//! 404 or the connection could not be established, which are the only
//! signals that the primary is absent. A timeout or any other error class
//! never triggers the fallback.

use bench_core::{GenerationParams, GenerationStatus, PromptConfig, UsageStats};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// One chat message in the request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Message role (`system` | `user` | `assistant`).
    pub role: &'static str,
    /// Message content.
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ReasoningHint<'a> {
    effort: &'a str,
}

#[derive(Debug, Serialize)]
struct UsageInclude {
    include: bool,
}

/// Request body for both endpoint variants. Optional parameters are
/// omitted entirely when unset so server/model defaults apply.
#[derive(Debug, Serialize)]
struct ChatPayload<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningHint<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_length: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<UsageInclude>,
}

/// Raw usage payload as backends report it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: Option<u64>,
    /// Tokens generated.
    pub completion_tokens: Option<u64>,
    /// Prompt plus completion.
    pub total_tokens: Option<u64>,
    /// Per-request cost (remote aggregator only).
    pub cost: Option<f64>,
}

impl From<RawUsage> for UsageStats {
    fn from(raw: RawUsage) -> Self {
        Self {
            prompt_tokens: raw.prompt_tokens,
            completion_tokens: raw.completion_tokens,
            total_tokens: raw.total_tokens,
            cost: raw.cost,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

/// Parsed chat response, shared by both endpoint variants. Fields the
/// compatibility endpoint does not emit simply stay `None`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    /// Token usage, when reported.
    #[serde(default)]
    pub usage: Option<RawUsage>,
    /// Rich per-request statistics (tokens/sec, time-to-first-token, ...),
    /// primary endpoint only.
    #[serde(default)]
    pub stats: Option<serde_json::Value>,
    /// Model metadata passthrough.
    #[serde(default)]
    pub model_info: Option<serde_json::Value>,
}

impl ChatResponse {
    /// Content of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// Outcome of the single generation call for one model.
#[derive(Debug)]
pub struct ChatOutcome {
    /// Terminal status.
    pub status: GenerationStatus,
    /// Wall-clock duration of the call (including a fallback attempt).
    pub generation_time_seconds: f64,
    /// Parsed response when `status` is `Ok`.
    pub response: Option<ChatResponse>,
    /// Whether the compatibility fallback produced the response.
    pub used_fallback: bool,
    /// Failure description when `status` is not `Ok`.
    pub error: Option<String>,
}

/// Why one endpoint call failed, classified for fallback eligibility.
#[derive(Debug)]
enum CallError {
    /// Read/total timeout elapsed. Never falls back.
    Timeout,
    /// TCP/TLS connection could not be established. Eligible for fallback.
    Connect(String),
    /// HTTP 404, meaning the endpoint path is absent. Eligible for fallback.
    NotFound,
    /// Any other failure: HTTP error status, decode error, transport fault.
    Other(String),
}

impl CallError {
    fn warrants_fallback(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::NotFound)
    }

    fn message(&self) -> String {
        match self {
            Self::Timeout => "generation timed out".to_string(),
            Self::Connect(m) => format!("connection failed: {m}"),
            Self::NotFound => "endpoint not found (404)".to_string(),
            Self::Other(m) => m.clone(),
        }
    }
}

/// Client for the chat endpoint pair of one backend.
#[derive(Debug, Clone)]
pub struct EndpointClient {
    http: reqwest::Client,
    primary: Url,
    fallback: Option<Url>,
    bearer: Option<Secret<String>>,
    read_timeout: Duration,
    include_usage: bool,
}

impl EndpointClient {
    /// Build a client with the given endpoint pair and timeouts.
    pub fn new(
        primary: Url,
        fallback: Option<Url>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            http,
            primary,
            fallback,
            bearer: None,
            read_timeout,
            include_usage: false,
        })
    }

    /// Attach a bearer credential sent with every request.
    #[must_use]
    pub fn with_bearer(mut self, token: Secret<String>) -> Self {
        self.bearer = Some(token);
        self
    }

    /// Ask the backend to include cost accounting in its usage payload.
    #[must_use]
    pub fn with_usage_accounting(mut self) -> Self {
        self.include_usage = true;
        self
    }

    /// Perform the single generation call for `model`.
    ///
    /// Classification is strict: a timeout yields `Timeout` with no
    /// fallback; a 404 or connect failure triggers exactly one fallback
    /// attempt when a fallback endpoint exists; everything else is an
    /// endpoint error.
    pub async fn generate(
        &self,
        model: &str,
        prompt: &PromptConfig,
        params: &GenerationParams,
    ) -> ChatOutcome {
        let payload = self.payload(model, prompt, params);
        let started = Instant::now();

        let primary_err = match self.post_chat(&self.primary, &payload).await {
            Ok(response) => {
                return ChatOutcome {
                    status: GenerationStatus::Ok,
                    generation_time_seconds: started.elapsed().as_secs_f64(),
                    response: Some(response),
                    used_fallback: false,
                    error: None,
                }
            }
            Err(e) => e,
        };

        if let (true, Some(fallback)) = (primary_err.warrants_fallback(), self.fallback.as_ref()) {
            debug!(primary = %self.primary, reason = %primary_err.message(),
                "falling back to compatibility endpoint");
            return match self.post_chat(fallback, &payload).await {
                Ok(response) => ChatOutcome {
                    status: GenerationStatus::Ok,
                    generation_time_seconds: started.elapsed().as_secs_f64(),
                    response: Some(response),
                    used_fallback: true,
                    error: None,
                },
                Err(fallback_err) => self.failed_outcome(fallback_err, started, true),
            };
        }

        self.failed_outcome(primary_err, started, false)
    }

    fn failed_outcome(&self, error: CallError, started: Instant, used_fallback: bool) -> ChatOutcome {
        let status = match error {
            CallError::Timeout => GenerationStatus::Timeout,
            _ => GenerationStatus::EndpointError,
        };
        warn!(error = %error.message(), ?status, "generation call failed");
        ChatOutcome {
            status,
            generation_time_seconds: started.elapsed().as_secs_f64(),
            response: None,
            used_fallback,
            error: Some(error.message()),
        }
    }

    fn payload<'a>(
        &self,
        model: &'a str,
        prompt: &PromptConfig,
        params: &'a GenerationParams,
    ) -> ChatPayload<'a> {
        ChatPayload {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompt.system.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt.user.clone(),
                },
            ],
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            reasoning: params
                .reasoning_effort
                .as_deref()
                .map(|effort| ReasoningHint { effort }),
            context_length: params.context_length,
            stream: false,
            usage: self.include_usage.then_some(UsageInclude { include: true }),
        }
    }

    async fn post_chat(
        &self,
        url: &Url,
        payload: &ChatPayload<'_>,
    ) -> Result<ChatResponse, CallError> {
        let mut request = self
            .http
            .post(url.clone())
            .timeout(self.read_timeout)
            .json(payload);
        if let Some(bearer) = &self.bearer {
            request = request.bearer_auth(bearer.expose_secret());
        }

        let response = request.send().await.map_err(classify_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CallError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Other(format!(
                "http {status}: {}",
                body.chars().take(500).collect::<String>()
            )));
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| CallError::Other(format!("failed to decode response: {e}")))
    }
}

fn classify_transport_error(error: reqwest::Error) -> CallError {
    // Order matters: exceeding the connect timeout reports both is_connect
    // and is_timeout, and a connection that never established is evidence
    // the primary is absent, not that the budget ran out.
    if error.is_connect() {
        CallError::Connect(error.to_string())
    } else if error.is_timeout() {
        CallError::Timeout
    } else {
        CallError::Other(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> GenerationParams {
        GenerationParams {
            temperature: Some(0.2),
            ..GenerationParams::default()
        }
    }

    #[test]
    fn payload_omits_unset_parameters() {
        let client = EndpointClient::new(
            Url::parse("http://127.0.0.1:1234/api/v0/chat/completions").expect("url"),
            None,
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
        .expect("client");

        let generation_params = params();
        let payload = client.payload("demo/8b", &PromptConfig::default(), &generation_params);
        let body = serde_json::to_value(&payload).expect("serialize");

        assert_eq!(body["model"], "demo/8b");
        assert_eq!(body["temperature"], json!(0.2));
        assert_eq!(body["stream"], json!(false));
        assert!(body.get("top_p").is_none());
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("reasoning").is_none());
        assert!(body.get("usage").is_none());
    }

    #[test]
    fn usage_accounting_adds_include_flag() {
        let client = EndpointClient::new(
            Url::parse("https://example.com/v1/chat/completions").expect("url"),
            None,
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
        .expect("client")
        .with_usage_accounting();

        let generation_params = GenerationParams::default();
        let payload = client.payload("m", &PromptConfig::default(), &generation_params);
        let body = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(body["usage"]["include"], json!(true));
    }

    #[test]
    fn response_content_reads_first_choice() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "hello"}}],
            "usage": {"completion_tokens": 3}
        }))
        .expect("deserialize");
        assert_eq!(response.content(), Some("hello"));
        assert_eq!(response.usage.as_ref().and_then(|u| u.completion_tokens), Some(3));
    }
}
