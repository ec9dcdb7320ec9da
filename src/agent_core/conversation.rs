//! Outbound conversation assembly.
//!
//! Responsibilities:
//! - Build the message list sent to models from the persisted log
//! - Fold the current summary into the system prompt when compression is on
//! - Convert domain messages into wire `ChatMessage`s

use crate::inference::types::ChatMessage;

use super::types::{Message, PersistedMessage};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Label placed before the summary inside the system prompt.
pub const SUMMARY_CONTEXT_LABEL: &str = "Context of the previous dialog:";

// ─── Assembly ───────────────────────────────────────────────────────────────

/// Build the outbound conversation for a turn.
///
/// With a summary: `[system prompt + summary] + [messages needing resend]`.
/// Without one: `[system prompt] + [entire log]`. An empty system prompt with
/// no summary produces no system message at all.
pub fn build_outbound(
    system_prompt: &str,
    summary: Option<&str>,
    log: &[PersistedMessage],
) -> Vec<Message> {
    let mut outbound = Vec::with_capacity(log.len() + 1);

    match summary {
        Some(summary) => {
            outbound.push(Message::system(system_with_summary(system_prompt, summary)));
            outbound.extend(
                log.iter()
                    .filter(|p| p.needs_resend)
                    .map(|p| p.message.clone()),
            );
        }
        None => {
            if !system_prompt.trim().is_empty() {
                outbound.push(Message::system(system_prompt));
            }
            outbound.extend(log.iter().map(|p| p.message.clone()));
        }
    }

    outbound
}

/// System prompt with the summary appended.
pub fn system_with_summary(system_prompt: &str, summary: &str) -> String {
    if system_prompt.trim().is_empty() {
        format!("{SUMMARY_CONTEXT_LABEL} {summary}")
    } else {
        format!("{system_prompt}\n\n{SUMMARY_CONTEXT_LABEL} {summary}")
    }
}

/// Wire form of a conversation.
pub fn to_chat_messages(conversation: &[Message]) -> Vec<ChatMessage> {
    conversation.iter().map(Message::to_chat_message).collect()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
