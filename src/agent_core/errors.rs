//! Agent Core error types.

use thiserror::Error;

/// Errors that can occur during agent core operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Database operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    /// Invalid or missing configuration, detected before any network call.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// `send_message` was called with no models selected.
    #[error("no models selected")]
    NoModelsSelected,

    /// A model id that is not in the catalog.
    #[error("unknown model: '{model_id}'")]
    UnknownModel { model_id: String },

    /// Blank user input.
    #[error("message is empty")]
    EmptyMessage,

    /// A turn is already being resolved for this conversation.
    #[error("a turn is already in progress")]
    TurnInProgress,

    /// The summary call failed; the previous summary stays current.
    #[error("context compression failed: {reason}")]
    CompressionFailed { reason: String },

    /// The tool catalog could not be loaded.
    #[error("failed to load tools: {reason}")]
    ToolCatalogError { reason: String },
}

impl AgentError {
    /// Configuration-class errors are rejected before any network call and
    /// need user action to resolve.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AgentError::ConfigError { .. }
                | AgentError::NoModelsSelected
                | AgentError::UnknownModel { .. }
                | AgentError::EmptyMessage
        )
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::DatabaseError {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}

impl From<crate::inference::InferenceError> for AgentError {
    fn from(e: crate::inference::InferenceError) -> Self {
        AgentError::ConfigError {
            reason: e.to_string(),
        }
    }
}
