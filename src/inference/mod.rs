//! Inference Client — OpenAI-compatible API client for remote LLM providers.
//!
//! This module handles all communication with the completion endpoint:
//! - Non-streaming chat completions with native JSON tool calls
//! - Usage, latency and cost reporting per call
//! - The static model catalog and its pricing
//! - Configuration loading from `chorus.yaml`
//!
//! The client speaks the OpenAI Chat Completions API, so any provider that
//! does (OpenRouter by default) is a config change, not a code change.

pub mod client;
pub mod config;
pub mod errors;
pub mod registry;
pub mod response;
pub mod types;

// Re-exports for convenience
pub use client::{CompletionClient, InferenceClient};
pub use config::{AgentConfig, ChorusConfig, ProviderConfig, ToolServerConfig};
pub use errors::InferenceError;
pub use registry::{ModelDescriptor, ModelRegistry};
pub use types::{
    ChatMessage, ModelCallResult, ModelReply, Role, ToolCallRequest, ToolDefinition, Usage,
};
