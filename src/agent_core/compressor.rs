//! Context compressor.
//!
//! Every `period` persisted messages the whole log is condensed into a
//! summary by one dedicated, tool-free completion call. On success the
//! summary is promoted: older summaries are demoted, the new one is inserted
//! as current, and every message is marked as no longer needing resend. On
//! failure nothing changes and the previous summary stays active.

use crate::inference::client::CompletionClient;
use crate::inference::registry::ModelDescriptor;
use crate::inference::types::{ChatMessage, ModelCallResult, Role};

use super::database::ConversationStore;
use super::errors::AgentError;
use super::types::{NewSummary, PersistedMessage, Summary};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Default compression period, in persisted messages.
pub const DEFAULT_COMPRESSION_PERIOD: u64 = 11;

/// System prompt for the summary call.
pub const SUMMARIZER_PROMPT: &str = "You condense conversations. Summarize the dialog below \
so it can replace the full history as context for future replies. Keep the user's goals, \
stated facts and preferences, decisions reached, tool results that still matter, and open \
questions. Write plain prose without preamble.";

// ─── Trigger ────────────────────────────────────────────────────────────────

/// True when a log of `count` messages sits on a period boundary.
pub fn should_compress(count: u64, period: u64) -> bool {
    period > 0 && count > 0 && count % period == 0
}

// ─── Transcript ─────────────────────────────────────────────────────────────

/// Role-labelled linear transcript of the log, oldest first.
pub fn build_transcript(log: &[PersistedMessage]) -> String {
    log.iter()
        .map(|p| {
            let label = match p.message.role() {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
            };
            format!("{label}: {}", p.message.content())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Summary Call ───────────────────────────────────────────────────────────

/// Ask `model` for a summary of `transcript`. Never sends tools.
pub async fn summarize(
    client: &dyn CompletionClient,
    model: &ModelDescriptor,
    temperature: f32,
    transcript: &str,
) -> Result<NewSummary, AgentError> {
    let messages = [
        ChatMessage::system(SUMMARIZER_PROMPT),
        ChatMessage::user(transcript),
    ];

    match client.complete(model, &messages, temperature, None).await {
        ModelCallResult::Success(reply) => {
            let text = reply.content.trim();
            if text.is_empty() {
                return Err(AgentError::CompressionFailed {
                    reason: "summary model returned no text".into(),
                });
            }
            Ok(NewSummary {
                text: text.to_string(),
                usage: reply.usage,
                cost: reply.cost,
            })
        }
        ModelCallResult::Failure { reason } => Err(AgentError::CompressionFailed { reason }),
    }
}

// ─── Promotion ──────────────────────────────────────────────────────────────

/// Make `summary` the only current summary and mark every message as sent.
///
/// Each step is individually atomic and the sequence is safe to re-run: any
/// leftover current rows from an interrupted attempt are demoted first.
pub fn promote(store: &ConversationStore, summary: &NewSummary) -> Result<Summary, AgentError> {
    let demoted = store.mark_all_summaries_not_current()?;
    let inserted = store.insert_summary(summary)?;
    let folded = store.mark_all_not_needing_resend()?;
    tracing::debug!(demoted, folded, summary_id = inserted.id, "summary promoted");
    Ok(inserted)
}

/// Summarize the full log and promote the result.
pub async fn compress(
    client: &dyn CompletionClient,
    store: &ConversationStore,
    model: &ModelDescriptor,
    temperature: f32,
) -> Result<Summary, AgentError> {
    let log = store.all_messages()?;
    let transcript = build_transcript(&log);

    tracing::info!(model = %model.id, messages = log.len(), "generating context summary");
    let summary = summarize(client, model, temperature, &transcript).await?;
    let promoted = promote(store, &summary)?;

    tracing::info!(
        summary_id = promoted.id,
        prompt_tokens = promoted.usage.prompt_tokens,
        completion_tokens = promoted.usage.completion_tokens,
        cost = promoted.cost,
        "context summary stored"
    );
    Ok(promoted)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
