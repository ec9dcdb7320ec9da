//! Running token and cost totals for a conversation.

use serde::Serialize;

use crate::inference::types::Usage;

use super::types::{PersistedMessage, Summary};

/// Sum of usage and cost over every finalized answer and every summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

impl RunningTotals {
    /// Recompute from the persisted log and summaries.
    pub fn from_log(log: &[PersistedMessage], summaries: &[Summary]) -> Self {
        let mut totals = Self::default();
        for meta in log.iter().filter_map(|p| p.message.meta()) {
            totals.add(meta.usage, meta.cost);
        }
        for summary in summaries {
            totals.add(summary.usage, summary.cost);
        }
        totals
    }

    pub fn add(&mut self, usage: Usage, cost: f64) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total_tokens);
        self.cost += cost;
    }
}
