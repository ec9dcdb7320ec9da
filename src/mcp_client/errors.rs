//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// The initialization handshake failed.
    #[error("server initialization failed: {reason}")]
    InitFailed {
        reason: String,
    },

    /// HTTP or JSON-RPC framing error (unreachable server, bad body).
    #[error("transport error for '{endpoint}': {reason}")]
    TransportError {
        endpoint: String,
        reason: String,
    },

    /// Non-2xx HTTP response from the tool server.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The tool ran and reported failure (`isError: true`).
    #[error("tool '{tool}' failed: {message}")]
    ToolFailed {
        tool: String,
        message: String,
    },

    /// Tool not found in the catalog.
    #[error("unknown tool: '{name}'")]
    UnknownTool {
        name: String,
    },

    /// Tool call arguments are not valid JSON or miss required fields.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
    },

    /// A tool call timed out.
    #[error("tool call '{tool}' timed out after {timeout_ms}ms")]
    Timeout {
        tool: String,
        timeout_ms: u64,
    },

    /// Configuration error (missing URL, bad client settings).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}
