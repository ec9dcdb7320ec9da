//! Chat-completion response decoding.
//!
//! Turns a provider response body into content, tool-call requests, usage and
//! the optional provider-reported cost. Only native JSON tool calls are
//! recognised.

use serde::Deserialize;
use uuid::Uuid;

use super::errors::InferenceError;
use super::types::{ToolCallRequest, Usage};

/// Decoded completion, before latency and pricing are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCompletion {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
    pub provider_cost: Option<f64>,
}

#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageBody>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageBody,
}

#[derive(Deserialize)]
struct MessageBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallBody>>,
}

#[derive(Deserialize)]
struct ToolCallBody {
    #[serde(default)]
    id: Option<String>,
    function: FunctionBody,
}

#[derive(Deserialize)]
struct FunctionBody {
    name: String,
    /// Usually a JSON-encoded string; some providers send an object.
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: Option<u32>,
    #[serde(default)]
    cost: Option<f64>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Parse a non-streaming chat completion body.
///
/// A non-null `error` or an empty `choices` list is a failure; the provider
/// message is carried verbatim.
pub fn parse_completion_response(body: &str) -> Result<ParsedCompletion, InferenceError> {
    let resp: CompletionBody =
        serde_json::from_str(body).map_err(|e| InferenceError::MalformedResponse {
            reason: format!("failed to parse completion response: {e}"),
        })?;

    if let Some(err) = resp.error {
        let message = match (err.message, err.code) {
            (Some(m), _) if !m.is_empty() => m,
            (_, Some(code)) => format!("provider error code {code}"),
            _ => "unknown provider error".to_string(),
        };
        return Err(InferenceError::ProviderError { message });
    }

    let choice = resp.choices.into_iter().next().ok_or(InferenceError::EmptyResponse)?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCallRequest {
            id: tc
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
            tool_name: tc.function.name,
            arguments_json: arguments_to_string(tc.function.arguments),
        })
        .collect();

    let (usage, provider_cost) = match resp.usage {
        Some(u) => (
            Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u
                    .total_tokens
                    .unwrap_or(u.prompt_tokens.saturating_add(u.completion_tokens)),
            },
            u.cost,
        ),
        None => (Usage::default(), None),
    };

    Ok(ParsedCompletion {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        usage,
        provider_cost,
    })
}

fn arguments_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
