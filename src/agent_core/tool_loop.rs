//! Tool-call loop — the bounded agentic controller for one turn.
//!
//! Runs as an explicit state machine:
//!
//! ```text
//! Dispatching(round) ──► Resolving(round) ──► Dispatching(round + 1) ──► … ──► Terminal
//! ```
//!
//! Every selected model owns a conversation branch. A model that answers
//! without tool calls is finalized on the spot and drops out; a model that
//! asks for tools gets its assistant tool-call message and one tool-result
//! message per request appended to its branch, then is re-dispatched. The
//! loop stops when no active model asks for tools or when the round counter
//! reaches the ceiling. Reaching the ceiling is not an error.

use crate::inference::client::CompletionClient;
use crate::inference::registry::ModelDescriptor;
use crate::inference::types::{ModelCallResult, ModelReply, ToolCallRequest, ToolDefinition, Usage};
use crate::mcp_client::client::ToolExecutor;

use super::dispatcher::dispatch_branches;
use super::response_analysis::finalize_answer;
use super::types::{Message, ModelFailure, ResponseMeta};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Default dispatch-round ceiling per turn.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Prefix of the tool-result content when a tool call fails.
pub const TOOL_ERROR_PREFIX: &str = "Error executing tool:";

// ─── Public Types ───────────────────────────────────────────────────────────

/// Everything the loop needs for one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Outbound conversation shared by every model at round 1.
    pub conversation: Vec<Message>,
    /// Selected models, in display order.
    pub models: Vec<ModelDescriptor>,
    pub temperature: f32,
    /// Active tool catalog; empty means no `tools` field is sent.
    pub tools: Vec<ToolDefinition>,
    pub max_iterations: u32,
}

/// A model's finalized answer.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalAnswer {
    pub model_id: String,
    pub message: Message,
}

/// Result of resolving one turn. Answers and failures follow model order.
#[derive(Debug, Clone, Default)]
pub struct LoopOutcome {
    pub answers: Vec<FinalAnswer>,
    pub failures: Vec<ModelFailure>,
    /// Models still asking for tools at the ceiling with nothing to show.
    pub unresolved: Vec<String>,
    /// Dispatch rounds performed.
    pub rounds: u32,
    pub ceiling_reached: bool,
    /// Usage spent by models that ended without a finalized answer.
    pub unaccounted_usage: Usage,
    pub unaccounted_cost: f64,
}

impl LoopOutcome {
    fn charge(&mut self, branch: &Branch) {
        self.unaccounted_usage = self.unaccounted_usage.combine(branch.usage);
        self.unaccounted_cost += branch.cost;
    }

    pub fn answer_messages(&self) -> Vec<Message> {
        self.answers.iter().map(|a| a.message.clone()).collect()
    }
}

// ─── State Machine ──────────────────────────────────────────────────────────

/// Per-model working state across rounds.
#[derive(Debug, Clone)]
struct Branch {
    /// Position in the selected-model list.
    slot: usize,
    model: ModelDescriptor,
    conversation: Vec<Message>,
    usage: Usage,
    cost: f64,
    latency_ms: u64,
}

impl Branch {
    fn absorb(&mut self, reply: &ModelReply) {
        self.usage = self.usage.combine(reply.usage);
        self.cost += reply.cost;
        self.latency_ms += reply.latency_ms;
    }

    fn meta(&self, temperature: f32) -> ResponseMeta {
        ResponseMeta {
            model_id: self.model.id.clone(),
            model_name: self.model.display_name.clone(),
            temperature,
            latency_ms: self.latency_ms,
            usage: self.usage,
            cost: self.cost,
        }
    }
}

enum LoopState {
    Dispatching { round: u32, branches: Vec<Branch> },
    Resolving { round: u32, pending: Vec<(Branch, ModelReply)> },
    Terminal,
}

/// Resolve one turn.
pub async fn run_tool_loop(
    client: &dyn CompletionClient,
    executor: &dyn ToolExecutor,
    request: TurnRequest,
) -> LoopOutcome {
    let max_iterations = request.max_iterations.max(1);
    let temperature = request.temperature;
    let tools = (!request.tools.is_empty()).then_some(request.tools.as_slice());

    let branches = request
        .models
        .iter()
        .enumerate()
        .map(|(slot, model)| Branch {
            slot,
            model: model.clone(),
            conversation: request.conversation.clone(),
            usage: Usage::default(),
            cost: 0.0,
            latency_ms: 0,
        })
        .collect();

    let mut answers: Vec<(usize, FinalAnswer)> = Vec::new();
    let mut failures: Vec<(usize, ModelFailure)> = Vec::new();
    let mut outcome = LoopOutcome::default();
    let mut state = LoopState::Dispatching { round: 1, branches };

    loop {
        state = match state {
            LoopState::Dispatching { round, branches } => {
                if branches.is_empty() {
                    LoopState::Terminal
                } else {
                    outcome.rounds = round;
                    let inputs: Vec<(ModelDescriptor, Vec<Message>)> = branches
                        .iter()
                        .map(|b| (b.model.clone(), b.conversation.clone()))
                        .collect();
                    let results = dispatch_branches(client, &inputs, temperature, tools).await;

                    let mut pending = Vec::new();
                    for (mut branch, result) in branches.into_iter().zip(results) {
                        match result {
                            ModelCallResult::Failure { reason } => {
                                tracing::warn!(model = %branch.model.id, round, reason = %reason, "model call failed");
                                outcome.charge(&branch);
                                failures.push((
                                    branch.slot,
                                    ModelFailure {
                                        model_id: branch.model.id.clone(),
                                        model_name: branch.model.display_name.clone(),
                                        reason,
                                    },
                                ));
                            }
                            ModelCallResult::Success(reply) => {
                                branch.absorb(&reply);
                                if reply.requests_tools() {
                                    tracing::info!(
                                        model = %branch.model.id,
                                        round,
                                        tool_calls = reply.tool_calls.len(),
                                        "model requested tools"
                                    );
                                    pending.push((branch, reply));
                                } else {
                                    answers.push((branch.slot, finalize(&branch, reply.content, temperature)));
                                }
                            }
                        }
                    }

                    if pending.is_empty() {
                        LoopState::Terminal
                    } else {
                        LoopState::Resolving { round, pending }
                    }
                }
            }

            LoopState::Resolving { round, pending } => {
                let at_ceiling = round >= max_iterations;
                let mut next = Vec::with_capacity(pending.len());
                for (mut branch, reply) in pending {
                    let content = reply.content;
                    branch.conversation.push(Message::AssistantToolCalls {
                        content: content.clone(),
                        tool_calls: reply.tool_calls.clone(),
                    });
                    for call in &reply.tool_calls {
                        let result = execute_tool_call(executor, call).await;
                        branch.conversation.push(Message::ToolResult {
                            tool_call_id: call.id.clone(),
                            tool_name: call.tool_name.clone(),
                            content: result,
                        });
                    }

                    if !at_ceiling {
                        next.push(branch);
                    } else if content.trim().is_empty() {
                        outcome.charge(&branch);
                        outcome.unresolved.push(branch.model.id.clone());
                    } else {
                        answers.push((branch.slot, finalize(&branch, content, temperature)));
                    }
                }

                if at_ceiling {
                    outcome.ceiling_reached = true;
                    tracing::warn!(
                        max_iterations,
                        unresolved = outcome.unresolved.len(),
                        "tool-call iteration ceiling reached"
                    );
                    LoopState::Terminal
                } else {
                    LoopState::Dispatching {
                        round: round + 1,
                        branches: next,
                    }
                }
            }

            LoopState::Terminal => break,
        };
    }

    answers.sort_by_key(|(slot, _)| *slot);
    failures.sort_by_key(|(slot, _)| *slot);
    outcome.answers = answers.into_iter().map(|(_, a)| a).collect();
    outcome.failures = failures.into_iter().map(|(_, f)| f).collect();
    outcome
}

fn finalize(branch: &Branch, content: String, temperature: f32) -> FinalAnswer {
    FinalAnswer {
        model_id: branch.model.id.clone(),
        message: finalize_answer(content, branch.meta(temperature)),
    }
}

/// Run one tool call. Failures become the tool-result text.
pub async fn execute_tool_call(executor: &dyn ToolExecutor, call: &ToolCallRequest) -> String {
    tracing::debug!(tool = %call.tool_name, arguments = %call.arguments_json, "executing tool");
    match executor.call_tool(&call.tool_name, &call.arguments_json).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(tool = %call.tool_name, error = %e, "tool call failed");
            format!("{TOOL_ERROR_PREFIX} {e}")
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::testing::{model, reply, tool_reply, ScriptedClient, ScriptedExecutor};
    use crate::inference::types::Role;
    use crate::mcp_client::registry::to_tool_definition;

    fn request(models: &[&str], tools: &[&str]) -> TurnRequest {
        TurnRequest {
            conversation: vec![Message::system("sys"), Message::user("what's the weather?")],
            models: models.iter().map(|id| model(id)).collect(),
            temperature: 0.4,
            tools: tools
                .iter()
                .map(|t| to_tool_definition(&crate::agent_core::testing::tool_spec(t)))
                .collect(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    #[tokio::test]
    async fn test_terminal_answer_never_touches_executor() {
        let client = ScriptedClient::new().push("a", reply("plain answer"));
        let executor = ScriptedExecutor::new().tool("weather", "sunny");

        let outcome = run_tool_loop(&client, &executor, request(&["a"], &["weather"])).await;

        assert_eq!(outcome.rounds, 1);
        assert!(!outcome.ceiling_reached);
        assert!(executor.calls().is_empty());
        assert_eq!(outcome.answers.len(), 1);
        assert_eq!(outcome.answers[0].message.content(), "plain answer");
        assert_eq!(client.calls()[0].tool_count, 1);
    }

    #[tokio::test]
    async fn test_tool_results_pair_with_requests() {
        let client = ScriptedClient::new()
            .push(
                "a",
                tool_reply(&[("c1", "weather", r#"{"city":"Oslo"}"#), ("c2", "time", "{}")]),
            )
            .push("a", reply("It is sunny at noon."));
        let executor = ScriptedExecutor::new()
            .tool("weather", "sunny")
            .tool("time", "noon");

        let outcome = run_tool_loop(&client, &executor, request(&["a"], &["weather", "time"])).await;

        assert_eq!(outcome.rounds, 2);
        assert_eq!(
            executor.calls(),
            vec![
                ("weather".to_string(), r#"{"city":"Oslo"}"#.to_string()),
                ("time".to_string(), "{}".to_string()),
            ]
        );

        let second = &client.calls()[1].messages;
        // sys, user, assistant(tool_calls), tool, tool
        assert_eq!(second.len(), 5);
        let calls = second[2].tool_calls.as_ref().unwrap();
        assert_eq!(second[2].role, Role::Assistant);
        assert_eq!(second[3].role, Role::Tool);
        assert_eq!(second[3].tool_call_id.as_deref(), Some(calls[0].id.as_str()));
        assert_eq!(second[3].content.as_deref(), Some("sunny"));
        assert_eq!(second[4].tool_call_id.as_deref(), Some(calls[1].id.as_str()));
        assert_eq!(second[4].content.as_deref(), Some("noon"));

        assert_eq!(outcome.answers[0].message.content(), "It is sunny at noon.");
    }

    #[tokio::test]
    async fn test_ceiling_stops_after_exactly_five_rounds() {
        let client = ScriptedClient::new().repeat("loopy", tool_reply(&[("c", "weather", "{}")]));
        let executor = ScriptedExecutor::new().tool("weather", "sunny");

        let outcome = run_tool_loop(&client, &executor, request(&["loopy"], &["weather"])).await;

        assert_eq!(client.call_count("loopy"), 5);
        assert_eq!(outcome.rounds, 5);
        assert!(outcome.ceiling_reached);
        assert_eq!(executor.calls().len(), 5, "last round's tool calls still run");
        assert!(outcome.answers.is_empty());
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.unresolved, vec!["loopy"]);
        assert_eq!(outcome.unaccounted_usage, Usage::new(50, 25));
        assert!((outcome.unaccounted_cost - 0.005).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_ceiling_finalizes_existing_content() {
        let mut partial = tool_reply(&[("c", "weather", "{}")]);
        if let ModelCallResult::Success(ref mut r) = partial {
            r.content = "Best guess: sunny".to_string();
        }
        let client = ScriptedClient::new().repeat("a", partial);
        let executor = ScriptedExecutor::new().tool("weather", "sunny");
        let mut req = request(&["a"], &["weather"]);
        req.max_iterations = 2;

        let outcome = run_tool_loop(&client, &executor, req).await;

        assert_eq!(client.call_count("a"), 2);
        assert!(outcome.ceiling_reached);
        assert_eq!(executor.calls().len(), 2);
        assert_eq!(outcome.answers[0].message.content(), "Best guess: sunny");
        assert!(outcome.unresolved.is_empty());
        assert_eq!(outcome.unaccounted_usage, Usage::default());
    }

    #[tokio::test]
    async fn test_terminal_models_are_not_reinvoked() {
        let client = ScriptedClient::new()
            .push("direct", reply("direct answer"))
            .push("tooly", tool_reply(&[("c1", "weather", "{}")]))
            .push("tooly", reply("tool answer"));
        let executor = ScriptedExecutor::new().tool("weather", "sunny");

        let outcome =
            run_tool_loop(&client, &executor, request(&["tooly", "direct"], &["weather"])).await;

        assert_eq!(client.call_count("direct"), 1);
        assert_eq!(client.call_count("tooly"), 2);
        let ids: Vec<_> = outcome.answers.iter().map(|a| a.model_id.as_str()).collect();
        assert_eq!(ids, vec!["tooly", "direct"], "answers follow selection order");
    }

    #[tokio::test]
    async fn test_tool_failure_is_fed_back_to_model() {
        let client = ScriptedClient::new()
            .push("a", tool_reply(&[("c1", "weather", "{}")]))
            .push("a", reply("sorry, no weather"));
        let executor = ScriptedExecutor::new().failing_tool("weather", "upstream down");

        let outcome = run_tool_loop(&client, &executor, request(&["a"], &["weather"])).await;

        let tool_msg = &client.calls()[1].messages[3];
        let content = tool_msg.content.as_deref().unwrap();
        assert!(content.starts_with(TOOL_ERROR_PREFIX), "{content}");
        assert!(content.contains("upstream down"));
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.answers.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_collected_per_model() {
        let client = ScriptedClient::new()
            .push("ok", reply("fine"))
            .push("bad", ModelCallResult::failure("quota exceeded"));
        let executor = ScriptedExecutor::new();

        let outcome = run_tool_loop(&client, &executor, request(&["bad", "ok"], &[])).await;

        assert_eq!(outcome.answers.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].model_id, "bad");
        assert_eq!(outcome.failures[0].model_name, "BAD");
        assert_eq!(outcome.failures[0].reason, "quota exceeded");
        assert_eq!(client.calls()[0].tool_count, 0);
    }

    #[tokio::test]
    async fn test_usage_accumulates_across_rounds() {
        let client = ScriptedClient::new()
            .push("a", tool_reply(&[("c1", "weather", "{}")]))
            .push("a", reply(r#"{"title":"Weather","body":"Sunny","tags":["wx"]}"#));
        let executor = ScriptedExecutor::new().tool("weather", "sunny");

        let outcome = run_tool_loop(&client, &executor, request(&["a"], &["weather"])).await;

        let message = &outcome.answers[0].message;
        assert!(matches!(message, Message::AssistantStructured { .. }));
        let meta = message.meta().unwrap();
        assert_eq!(meta.usage, Usage::new(20, 10));
        assert_eq!(meta.latency_ms, 14);
        assert!((meta.cost - 0.002).abs() < 1e-12);
        assert_eq!(meta.temperature, 0.4);
    }

    #[tokio::test]
    async fn test_single_iteration_ceiling() {
        let client = ScriptedClient::new().repeat("a", tool_reply(&[("c", "weather", "{}")]));
        let executor = ScriptedExecutor::new().tool("weather", "sunny");
        let mut req = request(&["a"], &["weather"]);
        req.max_iterations = 1;

        let outcome = run_tool_loop(&client, &executor, req).await;
        assert_eq!(outcome.rounds, 1);
        assert!(outcome.ceiling_reached);
        assert_eq!(client.call_count("a"), 1);
        assert_eq!(executor.calls().len(), 1);
        assert_eq!(outcome.unresolved, vec!["a"]);
    }

    #[tokio::test]
    async fn test_failure_after_tool_round_keeps_spent_usage() {
        let client = ScriptedClient::new()
            .push("a", tool_reply(&[("c1", "weather", "{}")]))
            .push("a", ModelCallResult::failure("connection reset"));
        let executor = ScriptedExecutor::new().tool("weather", "sunny");

        let outcome = run_tool_loop(&client, &executor, request(&["a"], &["weather"])).await;

        assert!(outcome.answers.is_empty());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.unaccounted_usage, Usage::new(10, 5));
        assert_eq!(outcome.unaccounted_usage.total_tokens, 15);
        assert!((outcome.unaccounted_cost - 0.001).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_concurrent_tool_branches_stay_isolated() {
        let client = ScriptedClient::new()
            .push("a", tool_reply(&[("ca", "weather", r#"{"city":"Oslo"}"#)]))
            .push("a", reply("Oslo is sunny."))
            .push("b", tool_reply(&[("cb", "time", "{}")]))
            .push("b", reply("It is noon."));
        let executor = ScriptedExecutor::new()
            .tool("weather", "sunny")
            .tool("time", "noon");

        let outcome =
            run_tool_loop(&client, &executor, request(&["a", "b"], &["weather", "time"])).await;

        assert_eq!(outcome.rounds, 2);
        assert_eq!(executor.calls().len(), 2);

        let second_request = |id: &str| {
            client
                .calls()
                .into_iter()
                .filter(|c| c.model_id == id)
                .nth(1)
                .unwrap()
                .messages
        };
        let a = second_request("a");
        let b = second_request("b");
        // sys, user, assistant(tool_calls), tool
        assert_eq!(a.len(), 4);
        assert_eq!(b.len(), 4);
        assert_eq!(a[3].tool_call_id.as_deref(), Some("ca"));
        assert_eq!(a[3].content.as_deref(), Some("sunny"));
        assert_eq!(b[3].tool_call_id.as_deref(), Some("cb"));
        assert_eq!(b[3].content.as_deref(), Some("noon"));
        assert!(a.iter().all(|m| m.tool_call_id.as_deref() != Some("cb")));
        assert!(b.iter().all(|m| m.tool_call_id.as_deref() != Some("ca")));

        let contents: Vec<_> = outcome.answers.iter().map(|a| a.message.content()).collect();
        assert_eq!(contents, vec!["Oslo is sunny.", "It is noon."]);
    }
}
