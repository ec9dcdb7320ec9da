//! Shared types for the agent core.
//!
//! Conversation messages, persisted records and summaries used across the
//! store, the tool-call loop and the compressor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inference::types::{ChatMessage, Role, ToolCallRequest, Usage};

// ─── Conversation Messages ──────────────────────────────────────────────────

/// Parsed form of a terminal answer that followed the `{title, body, tags}`
/// response shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredReply {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Who answered and what it cost. Attached to every finalized answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub model_id: String,
    pub model_name: String,
    pub temperature: f32,
    /// Summed over every round the model took part in.
    pub latency_ms: u64,
    pub usage: Usage,
    pub cost: f64,
}

/// One conversation message.
///
/// Immutable once appended. Tool exchanges (`AssistantToolCalls` and
/// `ToolResult`) normally live only inside a turn's working conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    AssistantStructured {
        reply: StructuredReply,
        /// The exact text the model produced.
        raw: String,
        meta: ResponseMeta,
    },
    AssistantPlain {
        content: String,
        meta: Option<ResponseMeta>,
    },
    AssistantToolCalls {
        content: String,
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: String,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::System { .. } => Role::System,
            Message::User { .. } => Role::User,
            Message::AssistantStructured { .. }
            | Message::AssistantPlain { .. }
            | Message::AssistantToolCalls { .. } => Role::Assistant,
            Message::ToolResult { .. } => Role::Tool,
        }
    }

    /// The text sent back to models. Structured answers resend their raw JSON.
    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::AssistantPlain { content, .. }
            | Message::AssistantToolCalls { content, .. }
            | Message::ToolResult { content, .. } => content,
            Message::AssistantStructured { raw, .. } => raw,
        }
    }

    pub fn meta(&self) -> Option<&ResponseMeta> {
        match self {
            Message::AssistantStructured { meta, .. } => Some(meta),
            Message::AssistantPlain { meta, .. } => meta.as_ref(),
            _ => None,
        }
    }

    /// Wire form for the completion request.
    pub fn to_chat_message(&self) -> ChatMessage {
        match self {
            Message::System { content } => ChatMessage::system(content.clone()),
            Message::User { content } => ChatMessage::user(content.clone()),
            Message::AssistantStructured { raw, .. } => ChatMessage::assistant(raw.clone()),
            Message::AssistantPlain { content, .. } => ChatMessage::assistant(content.clone()),
            Message::AssistantToolCalls {
                content,
                tool_calls,
            } => ChatMessage::assistant_tool_calls(
                Some(content.clone()).filter(|c| !c.is_empty()),
                tool_calls,
            ),
            Message::ToolResult {
                tool_call_id,
                tool_name,
                content,
            } => ChatMessage::tool_result(tool_call_id.clone(), tool_name.clone(), content.clone()),
        }
    }
}

/// A message as stored in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMessage {
    /// UUID v4.
    pub id: String,
    /// Display/audit only; insertion order is the ordering key.
    pub timestamp: DateTime<Utc>,
    /// True until a compression promotion folds this message into a summary.
    pub needs_resend: bool,
    pub message: Message,
}

// ─── Summaries ──────────────────────────────────────────────────────────────

/// A stored dialog summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Auto-incremented row ID.
    pub id: i64,
    pub text: String,
    pub usage: Usage,
    pub cost: f64,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for inserting a summary (no DB fields).
#[derive(Debug, Clone, PartialEq)]
pub struct NewSummary {
    pub text: String,
    pub usage: Usage,
    pub cost: f64,
}

// ─── Turn Outcomes ──────────────────────────────────────────────────────────

/// A model whose call failed during a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelFailure {
    pub model_id: String,
    pub model_name: String,
    pub reason: String,
}

// ─── Tests ──────────────────────────────────────────────────────────────────
