//! Scripted test doubles for the completion client and tool executor.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::inference::client::CompletionClient;
use crate::inference::errors::InferenceError;
use crate::inference::registry::ModelDescriptor;
use crate::inference::types::{
    ChatMessage, ModelCallResult, ModelReply, ToolCallRequest, ToolDefinition, Usage,
};
use crate::mcp_client::client::ToolExecutor;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::types::ToolSpec;

// ─── Builders ───────────────────────────────────────────────────────────────

pub fn model(id: &str) -> ModelDescriptor {
    ModelDescriptor {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        price_per_million_prompt_tokens: 0.15,
        price_per_million_completion_tokens: 0.6,
    }
}

/// Terminal answer with fixed usage (10 prompt, 5 completion).
pub fn reply(content: &str) -> ModelCallResult {
    ModelCallResult::Success(ModelReply {
        content: content.to_string(),
        usage: Usage::new(10, 5),
        latency_ms: 7,
        cost: 0.001,
        tool_calls: Vec::new(),
    })
}

/// Tool-call reply from `(id, tool, arguments)` triples.
pub fn tool_reply(calls: &[(&str, &str, &str)]) -> ModelCallResult {
    ModelCallResult::Success(ModelReply {
        content: String::new(),
        usage: Usage::new(10, 5),
        latency_ms: 7,
        cost: 0.001,
        tool_calls: calls
            .iter()
            .map(|(id, name, args)| ToolCallRequest {
                id: id.to_string(),
                tool_name: name.to_string(),
                arguments_json: args.to_string(),
            })
            .collect(),
    })
}

pub fn tool_spec(name: &str) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: format!("{name} tool"),
        input_schema: serde_json::json!({"type": "object", "properties": {}}),
    }
}

// ─── ScriptedClient ─────────────────────────────────────────────────────────

/// One recorded `complete` invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model_id: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub tool_count: usize,
}

/// Completion client that replays per-model scripts.
///
/// Each model has a FIFO of results; once empty, the model's `repeat` result
/// (if any) is returned forever, else a failure.
#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<ModelCallResult>>>,
    repeats: HashMap<String, ModelCallResult>,
    delays: HashMap<String, Duration>,
    panics: HashSet<String>,
    unconfigured: bool,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(self, model_id: &str, result: ModelCallResult) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(model_id.to_string()).or_default().push_back(result);
        }
        self
    }

    pub fn repeat(mut self, model_id: &str, result: ModelCallResult) -> Self {
        self.repeats.insert(model_id.to_string(), result);
        self
    }

    pub fn delay(mut self, model_id: &str, delay: Duration) -> Self {
        self.delays.insert(model_id.to_string(), delay);
        self
    }

    pub fn panic_for(mut self, model_id: &str) -> Self {
        self.panics.insert(model_id.to_string());
        self
    }

    pub fn unconfigured(mut self) -> Self {
        self.unconfigured = true;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, model_id: &str) -> usize {
        self.calls().iter().filter(|c| c.model_id == model_id).count()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(
        &self,
        model: &ModelDescriptor,
        messages: &[ChatMessage],
        temperature: f32,
        tools: Option<&[ToolDefinition]>,
    ) -> ModelCallResult {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                model_id: model.id.clone(),
                messages: messages.to_vec(),
                temperature,
                tool_count: tools.map(|t| t.len()).unwrap_or(0),
            });
        }

        if let Some(delay) = self.delays.get(&model.id) {
            tokio::time::sleep(*delay).await;
        }
        if self.panics.contains(&model.id) {
            panic!("scripted panic for {}", model.id);
        }

        let next = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut s| s.get_mut(&model.id).and_then(|q| q.pop_front()));
        next.or_else(|| self.repeats.get(&model.id).cloned())
            .unwrap_or_else(|| ModelCallResult::failure(format!("no scripted reply for {}", model.id)))
    }

    fn ensure_configured(&self) -> Result<(), InferenceError> {
        if self.unconfigured {
            return Err(InferenceError::ConfigError {
                reason: "provider API key is not set".into(),
            });
        }
        Ok(())
    }
}

// ─── ScriptedExecutor ───────────────────────────────────────────────────────

/// Tool executor with canned results keyed by tool name.
#[derive(Default)]
pub struct ScriptedExecutor {
    tools: Vec<ToolSpec>,
    results: HashMap<String, Result<String, String>>,
    list_error: Option<String>,
    calls: Mutex<Vec<(String, String)>>,
    list_calls: Mutex<usize>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool that answers `output`.
    pub fn tool(mut self, name: &str, output: &str) -> Self {
        self.tools.push(tool_spec(name));
        self.results.insert(name.to_string(), Ok(output.to_string()));
        self
    }

    /// Register a tool whose every call fails with `reason`.
    pub fn failing_tool(mut self, name: &str, reason: &str) -> Self {
        self.tools.push(tool_spec(name));
        self.results.insert(name.to_string(), Err(reason.to_string()));
        self
    }

    pub fn failing_catalog(mut self, reason: &str) -> Self {
        self.list_error = Some(reason.to_string());
        self
    }

    /// `(tool name, arguments)` for every call, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.lock().map(|c| *c).unwrap_or_default()
    }
}

#[async_trait]
impl ToolExecutor for ScriptedExecutor {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError> {
        if let Ok(mut n) = self.list_calls.lock() {
            *n += 1;
        }
        match self.list_error {
            Some(ref reason) => Err(McpError::InitFailed {
                reason: reason.clone(),
            }),
            None => Ok(self.tools.clone()),
        }
    }

    async fn call_tool(&self, name: &str, arguments_json: &str) -> Result<String, McpError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((name.to_string(), arguments_json.to_string()));
        }
        match self.results.get(name) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(reason)) => Err(McpError::ToolFailed {
                tool: name.to_string(),
                message: reason.clone(),
            }),
            None => Err(McpError::UnknownTool {
                name: name.to_string(),
            }),
        }
    }
}
