//! End-to-end tests for the MCP agent transport over an in-memory stream.
//!
//! The test plays the agent: it writes newline-delimited JSON-RPC into one
//! end of a `tokio::io::duplex` pipe while `McpServer::serve` runs on the
//! other end, and drives the operator side through `OperatorAdapter`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use conductor_core::agent::COMPLETION_MESSAGE;
use conductor_core::mcp::{McpServer, PROTOCOL_VERSION};
use conductor_core::{
    AgentAdapter, BridgeError, Instruction, OperatorAdapter, Outcome, SessionCoordinator, SessionState,
    Side,
};

// ---------------------------------------------------------------------------
// Test harness
// ---------------------------------------------------------------------------

struct AgentPeer {
    writer: WriteHalf<DuplexStream>,
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
}

impl AgentPeer {
    async fn send(&mut self, message: Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn request(&mut self, id: u64, method: &str, params: Value) {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await;
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for a response")
            .unwrap()
            .expect("server closed the stream");
        serde_json::from_str(&line).unwrap()
    }

    async fn call_tool(&mut self, id: u64, arguments: Option<Value>) {
        let mut params = json!({ "name": "conductor" });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.request(id, "tools/call", params).await;
    }
}

fn start() -> (Arc<SessionCoordinator>, AgentPeer, JoinHandle<anyhow::Result<()>>) {
    let session = Arc::new(SessionCoordinator::new());
    let server = McpServer::new(AgentAdapter::new(Arc::clone(&session)));

    let (agent_end, server_end) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_end);
    let handle = tokio::spawn(async move { server.serve(server_read, server_write).await });

    let (agent_read, agent_write) = tokio::io::split(agent_end);
    let peer = AgentPeer {
        writer: agent_write,
        lines: BufReader::new(agent_read).lines(),
    };
    (session, peer, handle)
}

fn tool_text(response: &Value) -> &str {
    response["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_else(|| panic!("not a tool result: {response}"))
}

fn spawn_relay(
    operator: &OperatorAdapter,
    instruction: Instruction,
) -> JoinHandle<Result<Outcome, BridgeError>> {
    let operator = operator.clone();
    tokio::spawn(async move { operator.relay(instruction).await })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handshake_and_tool_listing() {
    let (_session, mut agent, server) = start();

    agent
        .request(1, "initialize", json!({ "protocolVersion": PROTOCOL_VERSION, "capabilities": {} }))
        .await;
    let init = agent.recv().await;
    assert_eq!(init["id"], 1);
    assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);

    agent
        .send(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .await;

    agent.request(2, "tools/list", json!({})).await;
    let list = agent.recv().await;
    assert_eq!(list["id"], 2);
    let tools = list["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "conductor");

    agent.request(3, "ping", json!({})).await;
    assert_eq!(agent.recv().await["id"], 3);

    agent.request(4, "resources/list", json!({})).await;
    let unknown = agent.recv().await;
    assert_eq!(unknown["error"]["code"], -32601);

    drop(agent);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_lines_and_bad_calls_get_errors() {
    let (_session, mut agent, server) = start();

    agent.writer.write_all(b"{not json\n").await.unwrap();
    let parse = agent.recv().await;
    assert_eq!(parse["error"]["code"], -32700);
    assert_eq!(parse["id"], Value::Null);

    agent
        .request(1, "tools/call", json!({ "name": "something_else" }))
        .await;
    let wrong_tool = agent.recv().await;
    assert_eq!(wrong_tool["error"]["code"], -32602);

    agent.call_tool(2, Some(json!({ "success": "yes" }))).await;
    let bad_args = agent.recv().await;
    assert_eq!(bad_args["error"]["code"], -32602);

    drop(agent);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn relay_round_trip_over_stdio() {
    let (session, mut agent, server) = start();
    let operator = OperatorAdapter::new(Arc::clone(&session));

    agent.call_tool(10, None).await;
    let relay = spawn_relay(&operator, Instruction::new("list files").with_label("listing"));

    let first = agent.recv().await;
    assert_eq!(first["id"], 10);
    assert!(tool_text(&first).contains("list files"));

    agent
        .call_tool(11, Some(json!({ "output": "a.txt\nb.txt", "success": true })))
        .await;
    let outcome = relay.await.unwrap().unwrap();
    assert_eq!(outcome, Outcome::success("a.txt\nb.txt"));

    operator.terminate().unwrap();
    let done = agent.recv().await;
    assert_eq!(done["id"], 11);
    assert_eq!(tool_text(&done), COMPLETION_MESSAGE);

    // A call after the session closed is reported as a tool error.
    agent.call_tool(12, Some(json!({ "output": "extra" }))).await;
    let closed = agent.recv().await;
    assert_eq!(closed["result"]["isError"], true);

    drop(agent);
    server.await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn end_of_stream_releases_blocked_operator() {
    let (session, mut agent, server) = start();
    let operator = OperatorAdapter::new(Arc::clone(&session));

    agent.call_tool(1, None).await;
    let relay = spawn_relay(&operator, Instruction::new("think hard"));
    assert!(tool_text(&agent.recv().await).contains("think hard"));

    // The agent goes away without reporting back.
    drop(agent);
    server.await.unwrap().unwrap();

    assert_eq!(relay.await.unwrap(), Err(BridgeError::PeerDisconnected));
    assert_eq!(session.state(), SessionState::Aborted);
}

#[tokio::test]
async fn cancelled_call_does_not_swallow_instruction() {
    let (session, mut agent, server) = start();
    let operator = OperatorAdapter::new(Arc::clone(&session));

    agent.call_tool(7, None).await;
    agent
        .send(json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": { "requestId": 7, "reason": "user interrupted" }
        }))
        .await;
    // The read loop is sequential: once the ping is answered the cancel has
    // been processed. Give the aborted task a moment to be dropped.
    agent.request(8, "ping", json!({})).await;
    assert_eq!(agent.recv().await["id"], 8);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let relay = spawn_relay(&operator, Instruction::new("after cancel"));
    agent.call_tool(9, None).await;
    let resumed = agent.recv().await;
    assert_eq!(resumed["id"], 9, "cancelled call must not be answered");
    assert!(tool_text(&resumed).contains("after cancel"));

    agent.call_tool(10, Some(json!({ "output": "ok" }))).await;
    assert_eq!(relay.await.unwrap().unwrap().output, "ok");

    drop(agent);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn cancel_racing_a_relay_does_not_lose_instruction() {
    let (session, mut agent, server) = start();
    let operator = OperatorAdapter::new(Arc::clone(&session));

    agent.call_tool(7, None).await;
    while !session.is_attached(Side::Agent) {
        tokio::task::yield_now().await;
    }

    // The relay hands the instruction to call 7 while its cancellation is
    // already on the wire.
    let relay = spawn_relay(&operator, Instruction::new("racing"));
    agent
        .send(json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": { "requestId": 7, "reason": "user interrupted" }
        }))
        .await;
    agent.request(8, "ping", json!({})).await;

    // Call 7 may have answered before the cancel landed; either way the
    // instruction is not gone.
    loop {
        let response = agent.recv().await;
        if response["id"] == 8 {
            break;
        }
        assert_eq!(response["id"], 7);
        assert!(tool_text(&response).contains("racing"));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    agent.call_tool(9, None).await;
    let resumed = agent.recv().await;
    assert_eq!(resumed["id"], 9);
    assert!(tool_text(&resumed).contains("racing"), "got {resumed}");

    agent.call_tool(10, Some(json!({ "output": "ok" }))).await;
    let outcome = tokio::time::timeout(Duration::from_secs(1), relay)
        .await
        .expect("relay should resolve")
        .unwrap()
        .unwrap();
    assert_eq!(outcome.output, "ok");

    drop(agent);
    server.await.unwrap().unwrap();
}
