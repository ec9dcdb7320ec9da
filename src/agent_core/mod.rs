//! Agent Core — turn resolution and persistence for Chorus.
//!
//! Submodules:
//! - `dispatcher`: Concurrent fan-out of one conversation to many models
//! - `tool_loop`: Bounded tool-call state machine for one turn
//! - `response_analysis`: Structured `{title, body, tags}` answer parsing
//! - `compressor`: Periodic summaries and their promotion
//! - `conversation`: Outbound message assembly (full history or summary + tail)
//! - `database`: SQLite persistence for messages and summaries
//! - `totals`: Running token and cost totals
//! - `session`: `ChatSession`, the control surface
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types

pub mod compressor;
pub mod conversation;
pub mod database;
pub mod dispatcher;
pub mod errors;
pub mod response_analysis;
pub mod session;
pub mod tool_loop;
pub mod totals;
pub mod types;

#[cfg(test)]
pub mod testing;

// Re-exports for convenience
pub use database::ConversationStore;
pub use dispatcher::dispatch;
pub use errors::AgentError;
pub use session::{ChatSession, SessionSettings, TurnReport};
pub use tool_loop::{run_tool_loop, LoopOutcome, TurnRequest};
pub use totals::RunningTotals;
pub use types::{Message, ModelFailure, PersistedMessage, ResponseMeta, StructuredReply, Summary};
