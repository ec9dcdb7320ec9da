//! Chat session — the control surface over one conversation.
//!
//! A `ChatSession` owns the conversation store, the completion client, the
//! tool executor and the per-session settings (selected models, system
//! prompt, temperature, compression flag). `send_message` runs one full turn:
//! validate, persist the user message, resolve through the tool-call loop,
//! persist finalized answers, then compress when the log hits a period
//! boundary.
//!
//! Turns are sequential. A second `send_message` while one is in flight is
//! rejected with `AgentError::TurnInProgress`. `clear_chat` during a turn
//! abandons it: late results are discarded instead of persisted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::watch;

use crate::inference::client::{CompletionClient, InferenceClient};
use crate::inference::config::{AgentConfig, ChorusConfig};
use crate::inference::registry::{ModelDescriptor, ModelRegistry};
use crate::inference::types::ToolDefinition;
use crate::mcp_client::client::{McpClient, NoTools, ToolExecutor};
use crate::mcp_client::registry::to_tool_definition;

use super::compressor::{compress, should_compress};
use super::conversation::build_outbound;
use super::database::ConversationStore;
use super::errors::AgentError;
use super::tool_loop::{run_tool_loop, TurnRequest};
use super::totals::RunningTotals;
use super::types::{Message, ModelFailure, PersistedMessage, Summary};

// ─── Public Types ───────────────────────────────────────────────────────────

/// User-adjustable settings for a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSettings {
    pub system_prompt: String,
    pub temperature: f32,
    pub compression_enabled: bool,
    /// Selected model ids, in dispatch order.
    pub selected_model_ids: Vec<String>,
}

/// What happened during one `send_message` call.
#[derive(Debug, Clone, Default)]
pub struct TurnReport {
    /// Persisted user message, when the turn got that far.
    pub user_message: Option<PersistedMessage>,
    /// Finalized answers as persisted, in model order.
    pub answers: Vec<PersistedMessage>,
    pub failures: Vec<ModelFailure>,
    pub rounds: u32,
    pub ceiling_reached: bool,
    /// Summary promoted at the end of this turn.
    pub summary: Option<Summary>,
    pub compression_error: Option<String>,
    /// The conversation was cleared while the turn was in flight.
    pub abandoned: bool,
}

// ─── Internal State ─────────────────────────────────────────────────────────

struct SessionState {
    settings: SessionSettings,
    /// Current summary pointer. `None` whenever compression is off.
    summary: Option<Summary>,
    totals: RunningTotals,
    tools: Vec<ToolDefinition>,
    last_error: Option<String>,
}

/// Snapshot taken at the start of a turn.
struct TurnInputs {
    models: Vec<ModelDescriptor>,
    settings: SessionSettings,
    summary_text: Option<String>,
    tools: Vec<ToolDefinition>,
}

/// Resets an `AtomicBool` when dropped.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    /// Set the flag, or `None` if it was already set.
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlagGuard(flag))
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ─── ChatSession ────────────────────────────────────────────────────────────

pub struct ChatSession {
    agent: AgentConfig,
    registry: ModelRegistry,
    summary_model: ModelDescriptor,
    store: ConversationStore,
    client: Arc<dyn CompletionClient>,
    executor: Arc<dyn ToolExecutor>,
    state: Mutex<SessionState>,
    busy: AtomicBool,
    generating_summary: AtomicBool,
    /// Bumped by `clear_chat`; a turn that sees a different value abandons.
    epoch: AtomicU64,
}

impl ChatSession {
    /// Build a session around explicit collaborators.
    pub fn open(
        config: &ChorusConfig,
        store: ConversationStore,
        client: Arc<dyn CompletionClient>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let registry = config.registry()?;
        let summary_model = config
            .summary_model()
            .cloned()
            .ok_or_else(|| AgentError::UnknownModel {
                model_id: config.agent.summary_model.clone().unwrap_or_default(),
            })?;

        let totals = RunningTotals::from_log(&store.all_messages()?, &store.all_summaries()?);
        let settings = SessionSettings {
            system_prompt: config.agent.system_prompt.clone(),
            temperature: clamp_temperature(config.agent.default_temperature).unwrap_or(1.0),
            compression_enabled: false,
            selected_model_ids: registry.default_selection(config.default_selection),
        };

        tracing::info!(
            models = registry.all().len(),
            selected = ?settings.selected_model_ids,
            total_tokens = totals.total_tokens,
            "chat session opened"
        );

        Ok(Self {
            agent: config.agent.clone(),
            registry,
            summary_model,
            store,
            client,
            executor,
            state: Mutex::new(SessionState {
                settings,
                summary: None,
                totals,
                tools: Vec::new(),
                last_error: None,
            }),
            busy: AtomicBool::new(false),
            generating_summary: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        })
    }

    /// Build the HTTP completion client, the optional MCP tool client and the
    /// SQLite store from configuration.
    pub fn from_config(config: &ChorusConfig, db_path: &str) -> Result<Self, AgentError> {
        let client: Arc<dyn CompletionClient> = Arc::new(InferenceClient::new(&config.provider)?);
        let executor: Arc<dyn ToolExecutor> = match config.tool_server {
            Some(ref server) => Arc::new(McpClient::new(server).map_err(|e| {
                AgentError::ConfigError {
                    reason: e.to_string(),
                }
            })?),
            None => Arc::new(NoTools),
        };
        let store = ConversationStore::open(db_path)?;
        Self::open(config, store, client, executor)
    }

    fn state(&self) -> Result<MutexGuard<'_, SessionState>, AgentError> {
        self.state.lock().map_err(|_| AgentError::DatabaseError {
            reason: "session state lock poisoned".into(),
        })
    }

    fn set_error(&self, message: String) {
        if let Ok(mut state) = self.state.lock() {
            state.last_error = Some(message);
        }
    }

    // ─── Tools ──────────────────────────────────────────────────────────

    /// Fetch the tool catalog. On failure the catalog stays empty and the
    /// error is also placed in `last_error`.
    pub async fn load_tools(&self) -> Result<usize, AgentError> {
        match self.executor.list_tools().await {
            Ok(specs) => {
                let tools: Vec<ToolDefinition> = specs.iter().map(to_tool_definition).collect();
                let count = tools.len();
                self.state()?.tools = tools;
                tracing::info!(tools = count, "tool catalog loaded");
                Ok(count)
            }
            Err(e) => {
                let err = AgentError::ToolCatalogError {
                    reason: e.to_string(),
                };
                tracing::warn!(error = %e, "tool catalog unavailable, continuing without tools");
                let mut state = self.state()?;
                state.tools.clear();
                state.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    // ─── Turns ──────────────────────────────────────────────────────────

    /// Run one turn for `text`.
    ///
    /// Returns `Err` only for configuration problems (blank text, missing
    /// credentials, no selected models), a turn already in flight, or a store
    /// failure. Per-model and compression failures are in the report.
    pub async fn send_message(&self, text: &str) -> Result<TurnReport, AgentError> {
        let TurnInputs {
            models,
            settings,
            summary_text,
            tools,
        } = match self.validate_turn(text) {
            Ok(inputs) => inputs,
            Err(e) => {
                if e.is_configuration() {
                    self.set_error(e.to_string());
                }
                return Err(e);
            }
        };

        let _busy = FlagGuard::acquire(&self.busy).ok_or(AgentError::TurnInProgress)?;
        let epoch = self.epoch.load(Ordering::Acquire);
        self.state()?.last_error = None;

        let user_message = self.store.append_message(&Message::user(text))?;
        let log = self.store.all_messages()?;
        let conversation = build_outbound(&settings.system_prompt, summary_text.as_deref(), &log);

        tracing::info!(
            models = models.len(),
            outbound_messages = conversation.len(),
            tools = tools.len(),
            compressed = summary_text.is_some(),
            "turn started"
        );

        let outcome = run_tool_loop(
            self.client.as_ref(),
            self.executor.as_ref(),
            TurnRequest {
                conversation,
                models,
                temperature: settings.temperature,
                tools,
                max_iterations: self.agent.max_tool_iterations,
            },
        )
        .await;

        let mut report = TurnReport {
            user_message: Some(user_message),
            failures: outcome.failures.clone(),
            rounds: outcome.rounds,
            ceiling_reached: outcome.ceiling_reached,
            ..TurnReport::default()
        };

        if self.epoch.load(Ordering::Acquire) != epoch {
            tracing::info!("conversation cleared during turn, discarding results");
            report.abandoned = true;
            return Ok(report);
        }

        report.answers = self.store.append_messages(&outcome.answer_messages())?;
        {
            let mut state = self.state()?;
            for meta in report.answers.iter().filter_map(|p| p.message.meta()) {
                state.totals.add(meta.usage, meta.cost);
            }
            state
                .totals
                .add(outcome.unaccounted_usage, outcome.unaccounted_cost);
            if !outcome.failures.is_empty() {
                state.last_error = Some(describe_failures(&outcome.failures));
            }
        }

        if settings.compression_enabled {
            self.maybe_compress(epoch, &mut report).await?;
        }

        tracing::info!(
            answers = report.answers.len(),
            failures = report.failures.len(),
            rounds = report.rounds,
            "turn finished"
        );
        Ok(report)
    }

    /// Check inputs and snapshot what the turn needs.
    fn validate_turn(&self, text: &str) -> Result<TurnInputs, AgentError> {
        if text.trim().is_empty() {
            return Err(AgentError::EmptyMessage);
        }
        self.client.ensure_configured()?;

        let state = self.state()?;
        let models = self.resolve_selection(&state.settings.selected_model_ids);
        if models.is_empty() {
            return Err(AgentError::NoModelsSelected);
        }
        let summary_text = state
            .summary
            .as_ref()
            .filter(|_| state.settings.compression_enabled)
            .map(|s| s.text.clone());
        Ok(TurnInputs {
            models,
            settings: state.settings.clone(),
            summary_text,
            tools: state.tools.clone(),
        })
    }

    async fn maybe_compress(&self, epoch: u64, report: &mut TurnReport) -> Result<(), AgentError> {
        let count = self.store.count()?;
        if !should_compress(count, self.agent.compression_period) {
            return Ok(());
        }

        let result = {
            let _generating = FlagGuard::acquire(&self.generating_summary);
            compress(
                self.client.as_ref(),
                &self.store,
                &self.summary_model,
                self.agent.summary_temperature,
            )
            .await
        };

        if self.epoch.load(Ordering::Acquire) != epoch {
            // cleared mid-compression: the promoted row belongs to the old log
            self.store.clear_summaries()?;
            report.abandoned = true;
            return Ok(());
        }

        match result {
            Ok(summary) => {
                let mut state = self.state()?;
                state.totals.add(summary.usage, summary.cost);
                if state.settings.compression_enabled {
                    state.summary = Some(summary.clone());
                }
                report.summary = Some(summary);
            }
            Err(e) => {
                tracing::warn!(error = %e, messages = count, "context compression failed, keeping previous summary");
                self.state()?.last_error = Some(e.to_string());
                report.compression_error = Some(e.to_string());
            }
        }
        Ok(())
    }

    fn resolve_selection(&self, ids: &[String]) -> Vec<ModelDescriptor> {
        ids.iter()
            .filter_map(|id| self.registry.get(id).cloned())
            .collect()
    }

    // ─── Settings ───────────────────────────────────────────────────────

    /// Turn compression on or off.
    ///
    /// Off drops the in-memory summary pointer (stored summaries stay). On
    /// reloads the current summary from the store.
    pub fn toggle_context_compression(&self, enabled: bool) -> Result<(), AgentError> {
        let summary = if enabled {
            self.store.current_summary()?
        } else {
            None
        };
        let mut state = self.state()?;
        state.settings.compression_enabled = enabled;
        state.summary = summary;
        tracing::info!(enabled, has_summary = state.summary.is_some(), "context compression toggled");
        Ok(())
    }

    /// Add or remove a model from the selection. Returns whether it is now
    /// selected. Newly selected models go to the end of the dispatch order.
    pub fn toggle_model_selection(&self, model_id: &str) -> Result<bool, AgentError> {
        if !self.registry.contains(model_id) {
            return Err(AgentError::UnknownModel {
                model_id: model_id.to_string(),
            });
        }
        let mut state = self.state()?;
        let selected = &mut state.settings.selected_model_ids;
        match selected.iter().position(|id| id == model_id) {
            Some(pos) => {
                selected.remove(pos);
                Ok(false)
            }
            None => {
                selected.push(model_id.to_string());
                Ok(true)
            }
        }
    }

    pub fn update_system_prompt(&self, prompt: impl Into<String>) -> Result<(), AgentError> {
        self.state()?.settings.system_prompt = prompt.into();
        Ok(())
    }

    /// Restore the configured system prompt.
    pub fn reset_system_prompt(&self) -> Result<(), AgentError> {
        self.state()?.settings.system_prompt = self.agent.system_prompt.clone();
        Ok(())
    }

    /// Set the sampling temperature, clamped into `[0, 2]`. NaN is ignored.
    /// Returns the temperature now in effect.
    pub fn update_temperature(&self, temperature: f32) -> Result<f32, AgentError> {
        let mut state = self.state()?;
        if let Some(t) = clamp_temperature(temperature) {
            state.settings.temperature = t;
        }
        Ok(state.settings.temperature)
    }

    /// Delete every message and summary and reset totals. Abandons any turn
    /// in flight.
    pub fn clear_chat(&self) -> Result<(), AgentError> {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.store.clear_all()?;
        let mut state = self.state()?;
        state.summary = None;
        state.totals = RunningTotals::default();
        state.last_error = None;
        tracing::info!("conversation cleared");
        Ok(())
    }

    pub fn clear_error(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.last_error = None;
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn messages(&self) -> Result<Vec<PersistedMessage>, AgentError> {
        self.store.all_messages()
    }

    /// Live view of the message log.
    pub fn subscribe(&self) -> watch::Receiver<Vec<PersistedMessage>> {
        self.store.subscribe()
    }

    pub fn available_models(&self) -> &[ModelDescriptor] {
        self.registry.all()
    }

    pub fn selected_models(&self) -> Result<Vec<ModelDescriptor>, AgentError> {
        let state = self.state()?;
        Ok(self.resolve_selection(&state.settings.selected_model_ids))
    }

    pub fn running_totals(&self) -> Result<RunningTotals, AgentError> {
        Ok(self.state()?.totals)
    }

    /// The summary used for outbound assembly, if compression is on.
    pub fn current_summary(&self) -> Result<Option<Summary>, AgentError> {
        Ok(self.state()?.summary.clone())
    }

    pub fn settings(&self) -> Result<SessionSettings, AgentError> {
        Ok(self.state()?.settings.clone())
    }

    pub fn tools(&self) -> Result<Vec<ToolDefinition>, AgentError> {
        Ok(self.state()?.tools.clone())
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.last_error.clone())
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_generating_summary(&self) -> bool {
        self.generating_summary.load(Ordering::Acquire)
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }
}

fn clamp_temperature(t: f32) -> Option<f32> {
    (!t.is_nan()).then(|| t.clamp(0.0, 2.0))
}

fn describe_failures(failures: &[ModelFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.model_name, f.reason))
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Tests ──────────────────────────────────────────────────────────────────
