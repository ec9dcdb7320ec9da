//! MCP Client — JSON-RPC over HTTP for a remote MCP tool server.
//!
//! This module handles:
//! - The `initialize` handshake and session id tracking
//! - Tool discovery (`tools/list`) with a per-session cache
//! - Tool call validation and execution (`tools/call`)
//! - Conversion of the catalog into OpenAI function-tool definitions
//!
//! The tool-call loop only sees the [`ToolExecutor`] trait, so tests swap in
//! scripted executors without a server.

pub mod client;
pub mod errors;
pub mod registry;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{McpClient, NoTools, ToolExecutor};
pub use errors::McpError;
pub use registry::{to_tool_definition, ToolRegistry};
pub use types::ToolSpec;
