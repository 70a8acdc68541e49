mod common;
use common::{app, mock_instance, FakeTransport};

use serde_json::{json, Value};
use servicenow_mcp::mcp::server::McpServer;
use std::collections::HashSet;
use std::sync::Arc;

fn server(fake: Arc<FakeTransport>) -> McpServer {
    McpServer::new(Arc::new(app(fake)))
}

async fn call(server: &McpServer, message: Value) -> Value {
    let response = server
        .handle_message(&message.to_string())
        .await
        .expect("response");
    serde_json::to_value(&response).expect("serialize")
}

#[tokio::test]
async fn initialize_advertises_tools() {
    let server = server(FakeTransport::new());

    let response = call(
        &server,
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
    )
    .await;

    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(response["result"]["serverInfo"]["name"], "servicenow-mcp");
    assert!(response["result"]["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn tools_list_has_every_tool_once() {
    let server = server(FakeTransport::new());

    let response = call(&server, json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})).await;

    let tools = response["result"]["tools"].as_array().cloned().unwrap_or_default();
    let names: HashSet<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert_eq!(names.len(), tools.len(), "duplicate tool names");
    for name in [
        "servicenow_connect",
        "servicenow_status",
        "servicenow_query",
        "servicenow_script",
        "servicenow_instance",
        "query",
        "script",
    ] {
        assert!(names.contains(name), "{name} missing");
    }
    for tool in &tools {
        assert_eq!(tool["inputSchema"]["type"], "object");
    }
}

#[tokio::test]
async fn schema_violations_are_invalid_params() {
    let server = server(FakeTransport::new());

    let response = call(
        &server,
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {"name": "script", "arguments": {"script": "gs.print(1)", "mode": "exec"}}
        }),
    )
    .await;

    assert_eq!(response["error"]["code"], -32602);
    let message = response["error"]["message"].as_str().unwrap_or_default();
    assert!(message.contains("Invalid arguments for servicenow_script"));
    assert!(message.contains("expected one of readonly, execute"));
}

#[tokio::test]
async fn unknown_tools_get_a_suggestion() {
    let server = server(FakeTransport::new());

    let response = call(
        &server,
        json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": {"name": "servicenow_qurey", "arguments": {}}
        }),
    )
    .await;

    assert_eq!(response["error"]["code"], -32602);
    let message = response["error"]["message"].as_str().unwrap_or_default();
    assert!(message.contains("servicenow_query"), "{message}");
}

#[tokio::test]
async fn tool_failures_are_results_with_is_error() {
    let server = server(FakeTransport::new());

    let response = call(
        &server,
        json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/call",
            "params": {"name": "servicenow_query", "arguments": {"table": "incident"}}
        }),
    )
    .await;

    assert!(response.get("error").is_none());
    assert_eq!(response["result"]["isError"], true);
    let text = response["result"]["content"][0]["text"].as_str().unwrap_or_default();
    assert!(text.contains("connection_failed"));
}

#[tokio::test]
async fn protocol_errors_and_notifications() {
    let server = server(FakeTransport::new());

    let parse = server.handle_message("{not json").await.expect("response");
    assert_eq!(parse.error.as_ref().map(|e| e.code), Some(-32700));

    let invalid = server.handle_message(r#"{"jsonrpc":"2.0","id":9}"#).await.expect("response");
    assert_eq!(invalid.error.as_ref().map(|e| e.code), Some(-32600));

    let missing = call(&server, json!({"jsonrpc": "2.0", "id": 6, "method": "resources/list"})).await;
    assert_eq!(missing["error"]["code"], -32601);

    let notification = server
        .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;
    assert!(notification.is_none());
}

#[tokio::test]
async fn serve_answers_each_line_in_order() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    let server = server(fake);
    let input = [
        json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string(),
        String::new(),
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string(),
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {"name": "connect", "arguments": {"instance": "dev12345", "username": "admin", "password": "pw"}}
        })
        .to_string(),
    ]
    .join("\n");
    let mut output: Vec<u8> = Vec::new();

    server
        .serve(input.as_bytes(), &mut output)
        .await
        .expect("serve");

    let responses: Vec<Value> = String::from_utf8(output)
        .expect("utf8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["id"], 1);
    assert_eq!(responses[1]["id"], 2);
    assert_eq!(responses[1]["result"]["isError"], false);
}
