//! Multi-model dispatcher.
//!
//! Fans one conversation out to every selected model at once and collects
//! exactly one [`ModelCallResult`] per model, in input order. Nothing escapes:
//! a failing or even panicking call becomes `Failure` in its own slot and the
//! siblings are unaffected.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::future::join_all;
use futures::FutureExt;

use crate::inference::client::CompletionClient;
use crate::inference::registry::ModelDescriptor;
use crate::inference::types::{ChatMessage, ModelCallResult, ToolDefinition};

use super::conversation::to_chat_messages;
use super::types::Message;

/// Send the same conversation to every model concurrently.
///
/// Returns one result per model, in the order of `models`.
pub async fn dispatch(
    client: &dyn CompletionClient,
    conversation: &[Message],
    models: &[ModelDescriptor],
    temperature: f32,
    tools: Option<&[ToolDefinition]>,
) -> Vec<ModelCallResult> {
    let wire = to_chat_messages(conversation);
    let calls = models
        .iter()
        .map(|model| call_guarded(client, model, &wire, temperature, tools));
    let results = join_all(calls).await;
    log_round(models, &results);
    results
}

/// Send each model its own conversation concurrently.
///
/// Used once tool exchanges make the per-model histories diverge. Results
/// follow the order of `branches`.
pub async fn dispatch_branches(
    client: &dyn CompletionClient,
    branches: &[(ModelDescriptor, Vec<Message>)],
    temperature: f32,
    tools: Option<&[ToolDefinition]>,
) -> Vec<ModelCallResult> {
    let wires: Vec<Vec<ChatMessage>> = branches
        .iter()
        .map(|(_, conversation)| to_chat_messages(conversation))
        .collect();
    let calls = branches
        .iter()
        .zip(&wires)
        .map(|((model, _), wire)| call_guarded(client, model, wire, temperature, tools));
    let results = join_all(calls).await;

    let models: Vec<ModelDescriptor> = branches.iter().map(|(m, _)| m.clone()).collect();
    log_round(&models, &results);
    results
}

async fn call_guarded(
    client: &dyn CompletionClient,
    model: &ModelDescriptor,
    messages: &[ChatMessage],
    temperature: f32,
    tools: Option<&[ToolDefinition]>,
) -> ModelCallResult {
    match AssertUnwindSafe(client.complete(model, messages, temperature, tools))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => {
            let reason = panic_reason(payload.as_ref());
            tracing::error!(model = %model.id, reason = %reason, "completion call panicked");
            ModelCallResult::failure(format!("completion call panicked: {reason}"))
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Log results in input order, independent of completion order.
fn log_round(models: &[ModelDescriptor], results: &[ModelCallResult]) {
    for (model, result) in models.iter().zip(results) {
        match result {
            ModelCallResult::Success(reply) => tracing::debug!(
                model = %model.id,
                latency_ms = reply.latency_ms,
                total_tokens = reply.usage.total_tokens,
                tool_calls = reply.tool_calls.len(),
                "dispatch result"
            ),
            ModelCallResult::Failure { reason } => tracing::debug!(
                model = %model.id,
                reason = %reason,
                "dispatch failure"
            ),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
