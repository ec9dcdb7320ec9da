//! OpenAI-compatible completion client.
//!
//! Sends one non-streaming chat completion request to one model and reports
//! the outcome as a [`ModelCallResult`]. The client never returns an error:
//! transport, HTTP and provider failures are all folded into
//! `ModelCallResult::Failure` so a caller fanning out to many models keeps
//! each failure in its own slot.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::config::ProviderConfig;
use super::errors::InferenceError;
use super::registry::ModelDescriptor;
use super::response::{parse_completion_response, ParsedCompletion};
use super::types::{ChatCompletionRequest, ChatMessage, ModelCallResult, ModelReply, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ─── CompletionClient ────────────────────────────────────────────────────────

/// One chat-completion call to one model.
///
/// Implementations must not panic on provider failures and must not return
/// errors: everything is reported through `ModelCallResult`.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        model: &ModelDescriptor,
        messages: &[ChatMessage],
        temperature: f32,
        tools: Option<&[ToolDefinition]>,
    ) -> ModelCallResult;

    /// Check credentials and endpoint settings before any network call.
    fn ensure_configured(&self) -> Result<(), InferenceError> {
        Ok(())
    }
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// HTTP client for an OpenAI-compatible provider (OpenRouter by default).
pub struct InferenceClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
    referer: Option<String>,
    app_title: Option<String>,
    timeout_secs: u64,
}

impl InferenceClient {
    /// Build a client from provider settings.
    ///
    /// Does NOT check connectivity or credentials; see
    /// [`CompletionClient::ensure_configured`].
    pub fn new(provider: &ProviderConfig) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(provider.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: provider.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            api_key: provider.api_key.clone(),
            referer: provider.referer.clone(),
            app_title: provider.app_title.clone(),
            timeout_secs: provider.request_timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send the request and decode the body. Errors are folded by the caller.
    async fn request(
        &self,
        model: &ModelDescriptor,
        messages: &[ChatMessage],
        temperature: f32,
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ParsedCompletion, InferenceError> {
        self.ensure_configured()?;

        let url = format!("{}/chat/completions", self.base_url);
        let tools = tools.filter(|t| !t.is_empty()).map(|t| t.to_vec());

        let body = ChatCompletionRequest {
            model: model.id.clone(),
            messages: messages.to_vec(),
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            temperature,
        };

        // Log the request metadata (not the full body, it can be huge)
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            temperature = body.temperature,
            "completion request"
        );

        let mut request = self.http.post(&url).bearer_auth(&self.api_key).json(&body);
        if let Some(ref referer) = self.referer {
            request = request.header("HTTP-Referer", referer);
        }
        if let Some(ref title) = self.app_title {
            request = request.header("X-Title", title);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(&url, e))?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.timeout_secs,
                }
            } else {
                InferenceError::MalformedResponse {
                    reason: format!("failed to read response body: {e}"),
                }
            }
        })?;

        if !status.is_success() {
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        parse_completion_response(&body_text)
    }

    fn map_send_error(&self, url: &str, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: self.timeout_secs,
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl CompletionClient for InferenceClient {
    async fn complete(
        &self,
        model: &ModelDescriptor,
        messages: &[ChatMessage],
        temperature: f32,
        tools: Option<&[ToolDefinition]>,
    ) -> ModelCallResult {
        let started = Instant::now();
        let outcome = self.request(model, messages, temperature, tools).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(parsed) => {
                let cost = model.cost_for(&parsed.usage, parsed.provider_cost);
                tracing::info!(
                    model = %model.id,
                    latency_ms,
                    prompt_tokens = parsed.usage.prompt_tokens,
                    completion_tokens = parsed.usage.completion_tokens,
                    cost,
                    tool_calls = parsed.tool_calls.len(),
                    "completion succeeded"
                );
                ModelCallResult::Success(ModelReply {
                    content: parsed.content,
                    usage: parsed.usage,
                    latency_ms,
                    cost,
                    tool_calls: parsed.tool_calls,
                })
            }
            Err(e) => {
                tracing::warn!(
                    model = %model.id,
                    latency_ms,
                    provider_reported = e.is_provider_reported(),
                    error = %e,
                    "completion failed"
                );
                ModelCallResult::failure(e.reason())
            }
        }
    }

    fn ensure_configured(&self) -> Result<(), InferenceError> {
        if self.api_key.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "provider API key is not set".into(),
            });
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
