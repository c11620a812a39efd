//! Agent transport: Model Context Protocol over a newline-delimited
//! JSON-RPC 2.0 stream (normally the process's stdin/stdout).
//!
//! Exposes a single tool backed by [`AgentAdapter::advance`]. Tool calls run
//! on their own tasks so the read loop keeps noticing `ping`, cancellation
//! and end-of-stream while a call is blocked on the rendezvous.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::agent::{AdvanceRequest, AgentAdapter};

/// MCP protocol revision this server speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;

/// JSON-RPC request or notification.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// JSON-RPC response
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Tool definition for MCP
#[derive(Debug, Serialize)]
struct Tool {
    name: String,
    description: String,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Serves one [`AgentAdapter`] as an MCP tool server.
#[derive(Debug, Clone)]
pub struct McpServer {
    adapter: AgentAdapter,
    server_name: String,
    server_version: String,
}

impl McpServer {
    pub fn new(adapter: AgentAdapter) -> Self {
        Self {
            adapter,
            server_name: "conductor".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Run until `reader` reaches end of stream.
    ///
    /// End of stream means the agent is gone: the session is aborted so a
    /// blocked operator call is released.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let writer_task = tokio::spawn(write_responses(writer, rx));
        let mut in_flight: HashMap<String, AbortHandle> = HashMap::new();

        let mut lines = BufReader::new(reader).lines();
        let read_result = loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(e) => {
                    break Err(anyhow::Error::new(e).context("failed to read from agent stream"));
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(req) => req,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse agent request");
                    let _ = tx.send(JsonRpcResponse::err(
                        Value::Null,
                        PARSE_ERROR,
                        format!("parse error: {e}"),
                    ));
                    continue;
                }
            };

            self.dispatch(request, &tx, &mut in_flight);
        };

        tracing::info!("agent stream closed");
        self.adapter.disconnect();
        for (_, handle) in in_flight.drain() {
            handle.abort();
        }
        drop(tx);
        writer_task
            .await
            .context("agent writer task panicked")?
            .context("failed to write to agent stream")?;

        read_result
    }

    fn dispatch(
        &self,
        request: JsonRpcRequest,
        tx: &mpsc::UnboundedSender<JsonRpcResponse>,
        in_flight: &mut HashMap<String, AbortHandle>,
    ) {
        tracing::debug!(method = %request.method, "agent request");

        let Some(id) = request.id else {
            // Notifications get no response.
            match request.method.as_str() {
                "notifications/cancelled" => {
                    if let Some(request_id) = request.params.get("requestId") {
                        if let Some(handle) = in_flight.remove(&request_id.to_string()) {
                            tracing::info!(request_id = %request_id, "agent cancelled tool call");
                            handle.abort();
                        }
                    }
                }
                "notifications/initialized" => {}
                other => tracing::debug!(method = other, "ignoring notification"),
            }
            return;
        };

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::ok(id, self.initialize_result()),
            "ping" => JsonRpcResponse::ok(id, json!({})),
            "tools/list" => JsonRpcResponse::ok(id, json!({ "tools": [self.tool()] })),
            "tools/call" => {
                match self.parse_tool_call(request.params) {
                    Ok(advance) => {
                        let key = id.to_string();
                        let handle = self.spawn_tool_call(id, advance, tx.clone());
                        in_flight.retain(|_, h| !h.is_finished());
                        in_flight.insert(key, handle);
                    }
                    Err(message) => {
                        let _ = tx.send(JsonRpcResponse::err(id, INVALID_PARAMS, message));
                    }
                }
                return;
            }
            other => JsonRpcResponse::err(id, METHOD_NOT_FOUND, format!("unknown method: {other}")),
        };
        let _ = tx.send(response);
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": self.server_name,
                "version": self.server_version
            }
        })
    }

    fn tool(&self) -> Tool {
        Tool {
            name: self.adapter.tool_name().to_string(),
            description: "Conductor connection. Follow every step this tool gives you. \
                Call this tool with no arguments when the user asks to enter 'conductor mode'."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "output": {
                        "type": "string",
                        "description": "Result of the previous instructions. Leave this out on the first call."
                    },
                    "success": {
                        "type": "boolean",
                        "description": "Whether the previous instructions were completed. Set to false and explain in 'output' when they were not.",
                        "default": true
                    }
                }
            }),
        }
    }

    fn parse_tool_call(&self, params: Value) -> Result<AdvanceRequest, String> {
        let call: ToolCallParams =
            serde_json::from_value(params).map_err(|e| format!("invalid tools/call params: {e}"))?;
        if call.name != self.adapter.tool_name() {
            return Err(format!("unknown tool: {}", call.name));
        }
        match call.arguments {
            None | Some(Value::Null) => Ok(AdvanceRequest::first()),
            Some(args) => serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}")),
        }
    }

    fn spawn_tool_call(
        &self,
        id: Value,
        advance: AdvanceRequest,
        tx: mpsc::UnboundedSender<JsonRpcResponse>,
    ) -> AbortHandle {
        let adapter = self.adapter.clone();
        let task = tokio::spawn(async move {
            let result = match adapter.advance(advance).await {
                Ok(text) => json!({
                    "content": [{ "type": "text", "text": text }]
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "tool call failed");
                    json!({
                        "content": [{ "type": "text", "text": format!("Error: {e}") }],
                        "isError": true
                    })
                }
            };
            let _ = tx.send(JsonRpcResponse::ok(id, result));
        });
        task.abort_handle()
    }
}

async fn write_responses<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<JsonRpcResponse>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_string(&response)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
