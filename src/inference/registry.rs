//! Static model catalog.
//!
//! The catalog is loaded once from config and never mutated. Which models are
//! *selected* for a conversation is session state and lives in
//! `agent_core::session`; the registry only answers lookups.

use serde::{Deserialize, Serialize};

use super::errors::InferenceError;
use super::types::Usage;

/// A model the provider can serve, with its per-token pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Provider model id, e.g. `openai/gpt-4o-mini`.
    pub id: String,
    pub display_name: String,
    /// USD per one million prompt tokens.
    #[serde(default)]
    pub price_per_million_prompt_tokens: f64,
    /// USD per one million completion tokens.
    #[serde(default)]
    pub price_per_million_completion_tokens: f64,
}

impl ModelDescriptor {
    /// Cost of one call. A provider-reported cost always wins over pricing.
    pub fn cost_for(&self, usage: &Usage, provider_cost: Option<f64>) -> f64 {
        if let Some(cost) = provider_cost {
            return cost;
        }
        f64::from(usage.prompt_tokens) / 1e6 * self.price_per_million_prompt_tokens
            + f64::from(usage.completion_tokens) / 1e6 * self.price_per_million_completion_tokens
    }
}

/// Read-only catalog of available models, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
}

impl ModelRegistry {
    /// Build a registry, rejecting an empty catalog or duplicate ids.
    pub fn new(models: Vec<ModelDescriptor>) -> Result<Self, InferenceError> {
        if models.is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "model catalog is empty".into(),
            });
        }
        for (i, model) in models.iter().enumerate() {
            if model.id.trim().is_empty() {
                return Err(InferenceError::ConfigError {
                    reason: format!("model at index {i} has an empty id"),
                });
            }
            if models[..i].iter().any(|m| m.id == model.id) {
                return Err(InferenceError::ConfigError {
                    reason: format!("duplicate model id '{}'", model.id),
                });
            }
        }
        Ok(Self { models })
    }

    pub fn all(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Ids of the first `count` models, used as the initial selection.
    pub fn default_selection(&self, count: usize) -> Vec<String> {
        self.models.iter().take(count).map(|m| m.id.clone()).collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
