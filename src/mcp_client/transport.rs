//! JSON-RPC over HTTP transport.
//!
//! Handles low-level communication with a remote MCP server:
//! - POSTing JSON-RPC requests and notifications to a single endpoint
//! - Accepting either a plain JSON body or an SSE body carrying the response
//! - Tracking the `Mcp-Session-Id` header assigned during `initialize`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client as HttpClient;
use tokio::sync::Mutex;

use super::errors::McpError;
use super::types::{JsonRpcRequest, JsonRpcResponse};

// ─── Constants ───────────────────────────────────────────────────────────────

const HEADER_SESSION_ID: &str = "Mcp-Session-Id";

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Request/response JSON-RPC transport over HTTP POST.
pub struct HttpTransport {
    http: HttpClient,
    endpoint: String,
    api_key: Option<String>,
    session_id: Mutex<Option<String>>,
}

impl HttpTransport {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, McpError> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| McpError::ConfigError {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key,
            session_id: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a JSON-RPC request and wait for the matching response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        let body = serde_json::to_value(&req).map_err(|e| self.transport_err(format!(
            "failed to serialize request: {e}"
        )))?;

        let response = self.post(&body).await?;

        if let Some(session) = response
            .headers()
            .get(HEADER_SESSION_ID)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(session.to_string());
        }

        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        let text = response
            .text()
            .await
            .map_err(|e| self.transport_err(format!("failed to read response body: {e}")))?;

        let parsed = if is_sse {
            find_in_event_stream(&text, id)
        } else {
            serde_json::from_str::<JsonRpcResponse>(&text).ok().filter(|r| r.id == id)
        };

        parsed.ok_or_else(|| {
            self.transport_err(format!("no JSON-RPC response for request {id} ({method})"))
        })
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let mut notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }
        self.post(&notification).await.map(|_| ())
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, McpError> {
        let mut rb = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, ACCEPT_BOTH)
            .json(body);

        if let Some(ref key) = self.api_key {
            rb = rb.bearer_auth(key);
        }
        if let Some(ref session) = *self.session_id.lock().await {
            rb = rb.header(HEADER_SESSION_ID, session);
        }

        let response = rb
            .send()
            .await
            .map_err(|e| self.transport_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::HttpError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    fn transport_err(&self, reason: String) -> McpError {
        McpError::TransportError {
            endpoint: self.endpoint.clone(),
            reason,
        }
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Scan `data:` lines of an SSE body for the response with `id`.
fn find_in_event_stream(body: &str, id: u64) -> Option<JsonRpcResponse> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<JsonRpcResponse>(data.trim()).ok())
        .find(|resp| resp.id == id)
}

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: -32603,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
