//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. The completion
//! client never hands these to the caller directly: they are rendered into
//! `ModelCallResult::Failure` so one model's failure stays in its own slot.

use thiserror::Error;

/// Errors that can occur during inference operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the provider endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The provider did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the provider.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The provider answered with an `error` object.
    #[error("provider error: {message}")]
    ProviderError {
        message: String,
    },

    /// The provider answered with an empty `choices` list.
    #[error("empty response from provider")]
    EmptyResponse,

    /// The response body could not be decoded.
    #[error("malformed response: {reason}")]
    MalformedResponse {
        reason: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    /// Whether the provider itself reported the failure (as opposed to the
    /// transport failing to reach it).
    pub fn is_provider_reported(&self) -> bool {
        matches!(
            self,
            InferenceError::ProviderError { .. }
                | InferenceError::EmptyResponse
                | InferenceError::HttpError { .. }
        )
    }

    /// Human-readable reason used as the `Failure` payload.
    ///
    /// Provider-reported errors carry the provider's own message verbatim.
    pub fn reason(&self) -> String {
        match self {
            InferenceError::ProviderError { message } => message.clone(),
            InferenceError::HttpError { status, body } => {
                extract_error_message(body).unwrap_or_else(|| format!("HTTP {status}: {body}"))
            }
            other => other.to_string(),
        }
    }
}

/// Pull `error.message` out of a JSON error body, if there is one.
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_uses_provider_message() {
        let err = InferenceError::ProviderError {
            message: "rate limited".to_string(),
        };
        assert_eq!(err.reason(), "rate limited");
        assert!(err.is_provider_reported());
    }

    #[test]
    fn test_reason_extracts_message_from_http_body() {
        let err = InferenceError::HttpError {
            status: 402,
            body: r#"{"error":{"message":"insufficient credits","code":402}}"#.to_string(),
        };
        assert_eq!(err.reason(), "insufficient credits");
    }

    #[test]
    fn test_reason_falls_back_to_raw_http_body() {
        let err = InferenceError::HttpError {
            status: 500,
            body: "internal server error".to_string(),
        };
        assert_eq!(err.reason(), "HTTP 500: internal server error");
    }

    #[test]
    fn test_timeout_is_not_provider_reported() {
        let err = InferenceError::Timeout { duration_secs: 5 };
        assert!(!err.is_provider_reported());
        assert!(err.reason().contains("5s"));
    }
}
