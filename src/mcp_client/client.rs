//! MCP Client — high-level interface for tool execution.
//!
//! Owns the session with one remote MCP server: performs the `initialize`
//! handshake once, fetches and caches the tool catalog, and dispatches
//! `tools/call` requests. This is the production [`ToolExecutor`] used by the
//! tool-call loop.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};

use crate::inference::config::ToolServerConfig;

use super::errors::McpError;
use super::registry::ToolRegistry;
use super::transport::{extract_result, HttpTransport};
use super::types::{CallToolResult, InitializeResult, ListToolsResult, ToolSpec, PROTOCOL_VERSION};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Upper bound on `tools/list` pages, guards against a cursor that never ends.
const MAX_LIST_PAGES: usize = 32;

// ─── ToolExecutor ────────────────────────────────────────────────────────────

/// Enumerates and invokes external tools.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// The tool catalog. Implementations may cache it for the session.
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError>;

    /// Invoke `name` with raw JSON arguments, returning the rendered text.
    async fn call_tool(&self, name: &str, arguments_json: &str) -> Result<String, McpError>;
}

/// Executor for sessions with no tool server configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTools;

#[async_trait]
impl ToolExecutor for NoTools {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError> {
        Ok(Vec::new())
    }

    async fn call_tool(&self, name: &str, _arguments_json: &str) -> Result<String, McpError> {
        Err(McpError::UnknownTool {
            name: name.to_string(),
        })
    }
}

// ─── McpClient ───────────────────────────────────────────────────────────────

/// MCP client bound to a single HTTP server.
pub struct McpClient {
    transport: HttpTransport,
    initialized: OnceCell<()>,
    /// Catalog cached after the first successful `tools/list`.
    registry: Mutex<Option<ToolRegistry>>,
    call_timeout_ms: u64,
}

impl McpClient {
    pub fn new(config: &ToolServerConfig) -> Result<Self, McpError> {
        if config.url.trim().is_empty() {
            return Err(McpError::ConfigError {
                reason: "tool_server.url is empty".into(),
            });
        }
        let transport = HttpTransport::new(
            &config.url,
            config.api_key.clone().filter(|k| !k.is_empty()),
            Duration::from_millis(config.call_timeout_ms),
        )?;
        Ok(Self {
            transport,
            initialized: OnceCell::new(),
            registry: Mutex::new(None),
            call_timeout_ms: config.call_timeout_ms,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Run the `initialize` handshake if it has not completed yet.
    async fn ensure_initialized(&self) -> Result<(), McpError> {
        self.initialized
            .get_or_try_init(|| self.handshake())
            .await
            .map(|_| ())
    }

    async fn handshake(&self) -> Result<(), McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "chorus", "version": env!("CARGO_PKG_VERSION")},
        });

        let response = self
            .transport
            .request("initialize", Some(params))
            .await
            .map_err(|e| McpError::InitFailed {
                reason: e.to_string(),
            })?;
        let result = extract_result(response).map_err(|e| McpError::InitFailed {
            reason: e.to_string(),
        })?;
        let info: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::InitFailed {
                reason: format!("invalid initialize result: {e}"),
            })?;

        tracing::info!(
            endpoint = %self.transport.endpoint(),
            protocol = info.protocol_version.as_deref().unwrap_or("unknown"),
            server = info
                .server_info
                .as_ref()
                .and_then(|s| s.name.as_deref())
                .unwrap_or("unknown"),
            "MCP session initialized"
        );

        self.transport.notify("notifications/initialized", None).await
    }

    async fn fetch_catalog(&self) -> Result<Vec<ToolSpec>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let response = self.transport.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(extract_result(response)?)
                .map_err(|e| McpError::TransportError {
                    endpoint: self.transport.endpoint().to_string(),
                    reason: format!("invalid tools/list result: {e}"),
                })?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(pages = MAX_LIST_PAGES, "tools/list pagination cut off");
        Ok(tools)
    }
}

#[async_trait]
impl ToolExecutor for McpClient {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError> {
        self.ensure_initialized().await?;

        let mut cached = self.registry.lock().await;
        if let Some(ref registry) = *cached {
            return Ok(registry.all_tools().to_vec());
        }

        let tools = self.fetch_catalog().await?;
        tracing::info!(count = tools.len(), "loaded MCP tool catalog");
        for tool in &tools {
            tracing::debug!(tool = %tool.name, description = %tool.description, "tool available");
        }
        *cached = Some(ToolRegistry::new(tools.clone()));
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments_json: &str) -> Result<String, McpError> {
        let start = Instant::now();
        self.ensure_initialized().await?;

        let arguments: serde_json::Value = if arguments_json.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(arguments_json).map_err(|e| McpError::InvalidArguments {
                tool: name.to_string(),
                reason: format!("arguments are not valid JSON: {e}"),
            })?
        };

        if let Some(ref registry) = *self.registry.lock().await {
            registry.validate_tool_call(name, &arguments)?;
        }

        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });

        let response = tokio::time::timeout(
            Duration::from_millis(self.call_timeout_ms),
            self.transport.request("tools/call", Some(params)),
        )
        .await
        .map_err(|_| McpError::Timeout {
            tool: name.to_string(),
            timeout_ms: self.call_timeout_ms,
        })??;

        let result: CallToolResult =
            serde_json::from_value(extract_result(response)?).map_err(|e| {
                McpError::TransportError {
                    endpoint: self.transport.endpoint().to_string(),
                    reason: format!("invalid tools/call result: {e}"),
                }
            })?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let rendered = result.render();

        if result.is_error {
            tracing::warn!(tool = %name, elapsed_ms, "tool reported an error");
            return Err(McpError::ToolFailed {
                tool: name.to_string(),
                message: rendered,
            });
        }

        tracing::info!(tool = %name, elapsed_ms, result_len = rendered.len(), "tool call succeeded");
        Ok(rendered)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal MCP-over-HTTP server. Answers each POST according to the
    /// JSON-RPC method and records every method it saw.
    async fn spawn_mock_server(sse: bool) -> (String, Arc<std::sync::Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let body = read_request_body(&mut socket).await;
                    let req: serde_json::Value = serde_json::from_str(&body).unwrap();
                    let method = req["method"].as_str().unwrap_or_default().to_string();
                    log.lock().unwrap().push(method.clone());

                    let result = match method.as_str() {
                        "initialize" => serde_json::json!({
                            "protocolVersion": PROTOCOL_VERSION,
                            "serverInfo": {"name": "mock", "version": "0"}
                        }),
                        "tools/list" => serde_json::json!({"tools": [{
                            "name": "get_weather",
                            "description": "Weather by city",
                            "inputSchema": {"type": "object", "required": ["city"]}
                        }]}),
                        "tools/call" => {
                            let city = req["params"]["arguments"]["city"].as_str().unwrap_or("");
                            if city == "Atlantis" {
                                serde_json::json!({
                                    "content": [{"type": "text", "text": "city not found"}],
                                    "isError": true
                                })
                            } else {
                                serde_json::json!({"content": [
                                    {"type": "text", "text": format!("sunny in {city}")},
                                    {"type": "text", "text": "12C"}
                                ]})
                            }
                        }
                        _ => serde_json::Value::Null,
                    };

                    let (status, content_type, payload) = if req.get("id").is_none() {
                        ("202 Accepted", "application/json", String::new())
                    } else {
                        let msg = serde_json::json!({"jsonrpc": "2.0", "id": req["id"], "result": result});
                        if sse {
                            ("200 OK", "text/event-stream", format!("event: message\ndata: {msg}\n\n"))
                        } else {
                            ("200 OK", "application/json", msg.to_string())
                        }
                    };
                    let response = format!(
                        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nMcp-Session-Id: s-1\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                        payload.len()
                    );
                    socket.write_all(response.as_bytes()).await.ok();
                    socket.shutdown().await.ok();
                });
            }
        });

        (format!("http://{addr}/mcp"), seen)
    }

    async fn read_request_body(socket: &mut tokio::net::TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        l.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if raw.len() >= head_end + 4 + content_length {
                    return text[head_end + 4..].to_string();
                }
            }
        }
        String::new()
    }

    fn config(url: &str) -> ToolServerConfig {
        ToolServerConfig {
            url: url.to_string(),
            api_key: None,
            call_timeout_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn test_initialize_once_and_cache_catalog() {
        let (url, seen) = spawn_mock_server(false).await;
        let client = McpClient::new(&config(&url)).unwrap();

        let first = client.list_tools().await.unwrap();
        let second = client.list_tools().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);

        let methods = seen.lock().unwrap().clone();
        assert_eq!(
            methods,
            vec!["initialize", "notifications/initialized", "tools/list"]
        );
    }

    #[tokio::test]
    async fn test_call_tool_joins_content_over_sse() {
        let (url, _) = spawn_mock_server(true).await;
        let client = McpClient::new(&config(&url)).unwrap();
        client.list_tools().await.unwrap();

        let text = client
            .call_tool("get_weather", r#"{"city":"Oslo"}"#)
            .await
            .unwrap();
        assert_eq!(text, "sunny in Oslo\n12C");
    }

    #[tokio::test]
    async fn test_tool_reported_error_is_err() {
        let (url, _) = spawn_mock_server(false).await;
        let client = McpClient::new(&config(&url)).unwrap();
        let err = client
            .call_tool("get_weather", r#"{"city":"Atlantis"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("city not found"));
    }

    #[tokio::test]
    async fn test_invalid_json_arguments_rejected_locally() {
        let (url, seen) = spawn_mock_server(false).await;
        let client = McpClient::new(&config(&url)).unwrap();
        let err = client.call_tool("get_weather", "{not json").await.unwrap_err();
        assert!(matches!(err, McpError::InvalidArguments { .. }));
        assert!(!seen.lock().unwrap().contains(&"tools/call".to_string()));
    }

    #[tokio::test]
    async fn test_missing_required_field_after_catalog_load() {
        let (url, _) = spawn_mock_server(false).await;
        let client = McpClient::new(&config(&url)).unwrap();
        client.list_tools().await.unwrap();
        let err = client.call_tool("get_weather", "{}").await.unwrap_err();
        assert!(err.to_string().contains("city"));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_init() {
        let client = McpClient::new(&config("http://127.0.0.1:1/mcp")).unwrap();
        assert!(matches!(
            client.list_tools().await,
            Err(McpError::InitFailed { .. })
        ));
    }

    #[test]
    fn test_empty_url_rejected() {
        assert!(McpClient::new(&config("  ")).is_err());
    }

    #[tokio::test]
    async fn test_no_tools_executor() {
        assert!(NoTools.list_tools().await.unwrap().is_empty());
        assert!(NoTools.call_tool("x", "{}").await.is_err());
    }
}
