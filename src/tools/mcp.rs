//! MCP tool provider over streamable HTTP
//!
//! Speaks JSON-RPC 2.0 by POST: `initialize` once, then `tools/list` and
//! `tools/call`. Servers may answer with plain JSON or with a short SSE
//! stream; both are accepted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use super::{ToolContext, ToolProvider, ToolSpec};
use crate::error::Error;
use crate::Result;

const SESSION_HEADER: &str = "Mcp-Session-Id";
const PROTOCOL_VERSION: &str = "2025-03-26";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A remote MCP server reached over HTTP.
pub struct McpHttpProvider {
    name: String,
    url: String,
    client: reqwest::Client,
    session_id: Mutex<Option<String>>,
    initialized: OnceCell<()>,
    next_id: AtomicU64,
}

impl McpHttpProvider {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(name, url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
            session_id: Mutex::new(None),
            initialized: OnceCell::new(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_initialized(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| async {
                let params = json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                });
                let result = self.request("initialize", params).await?;
                let server = result
                    .pointer("/serverInfo/name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                info!("Connected to MCP server '{}' ({})", self.name, server);
                self.notify("notifications/initialized").await
            })
            .await
            .map(|_| ())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!("MCP {} -> {} (id {})", self.name, method, id);
        let text = self.post(&body).await?;
        parse_rpc_response(&text, id)
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let body = json!({"jsonrpc": "2.0", "method": method});
        self.post(&body).await.map(|_| ())
    }

    async fn post(&self, body: &Value) -> Result<String> {
        let mut request = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id.lock().await.as_deref() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(session.to_string());
        }

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::ToolExecution(format!(
                "MCP server '{}' returned {}: {}",
                self.name,
                status,
                text.trim()
            )));
        }
        Ok(text)
    }
}

#[async_trait]
impl ToolProvider for McpHttpProvider {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        self.ensure_initialized().await?;

        let mut specs = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({"cursor": cursor}),
                None => json!({}),
            };
            let page: ToolsPage = serde_json::from_value(self.request("tools/list", params).await?)?;
            specs.extend(page.tools.into_iter().map(ToolSpec::from));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(specs)
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<String> {
        self.ensure_initialized().await?;

        let mut params = json!({"name": name, "arguments": arguments});
        if let Some(msid) = context.correlation_id {
            params["_meta"] = json!({"msid": msid});
        }

        let result = self.request("tools/call", params).await?;
        let text = flatten_content(&result);
        if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            return Err(Error::ToolExecution(text));
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolsPage {
    #[serde(default)]
    tools: Vec<McpTool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

impl From<McpTool> for ToolSpec {
    fn from(tool: McpTool) -> Self {
        ToolSpec::new(
            tool.name,
            tool.description.unwrap_or_default(),
            tool.input_schema.unwrap_or_else(|| json!({"type": "object"})),
        )
    }
}

/// Extract the `result` of the response with the given id.
///
/// The body is either one JSON-RPC object or an SSE stream whose `data:`
/// lines carry JSON-RPC messages; notifications in the stream are skipped.
fn parse_rpc_response(body: &str, id: u64) -> Result<Value> {
    let trimmed = body.trim_start();
    let messages: Vec<Value> = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        match serde_json::from_str::<Value>(trimmed)? {
            Value::Array(items) => items,
            single => vec![single],
        }
    } else {
        sse_data_payloads(body)
            .iter()
            .filter_map(|data| serde_json::from_str(data).ok())
            .collect()
    };

    let response = messages
        .into_iter()
        .find(|message| message.get("id").and_then(Value::as_u64) == Some(id))
        .ok_or_else(|| Error::ToolExecution(format!("no JSON-RPC response for request {id}")))?;

    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(Error::ToolExecution(message.to_string()));
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

/// Join the `data:` lines of each SSE event.
fn sse_data_payloads(body: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if !current.is_empty() {
                payloads.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if !current.is_empty() {
        payloads.push(current.join("\n"));
    }
    payloads
}

/// Render a `tools/call` result as one string.
///
/// Text blocks are joined by newlines; other blocks are kept as JSON.
/// A result without content falls back to `structuredContent`.
fn flatten_content(result: &Value) -> String {
    let blocks = result
        .get("content")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    if blocks.is_empty() {
        return match result.get("structuredContent") {
            Some(structured) => structured.to_string(),
            None => String::new(),
        };
    }

    blocks
        .iter()
        .map(|block| match block.get("type").and_then(Value::as_str) {
            Some("text") => block
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => block.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
