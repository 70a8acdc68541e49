mod common;
use common::{app, connect, json_response, mock_instance, result, FakeTransport};

use reqwest::Method;
use serde_json::json;

const SYSLOG: &str = "/api/now/table/syslog";

fn sent_query(fake: &FakeTransport, path: &str) -> String {
    let sent = fake.requests_to(Method::GET, path);
    let Some(last) = sent.last() else {
        return String::new();
    };
    url::form_urlencoded::parse(last.query().unwrap_or_default().as_bytes())
        .find(|(key, _)| key == "sysparm_query")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}

#[tokio::test]
async fn syslogs_filter_by_level_source_and_scope_newest_first() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    fake.on(
        Method::GET,
        SYSLOG,
        result(json!([
            {"sys_created_on": "2024-07-02 10:00:00", "level": "2", "source": "x_acme_app.Sync", "message": "Sync failed\nretrying"},
        ])),
    );
    let app = app(fake.clone());
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute(
            "syslogs",
            json!({"level": "error", "source": "Sync", "scope": "x_acme_app", "limit": 10}),
        )
        .await
        .expect("dispatch");

    assert!(!outcome.is_error, "{}", outcome.text);
    assert!(outcome.text.starts_with("1 syslog entr(ies)"));
    assert!(outcome
        .text
        .contains("[2024-07-02 10:00:00] ERROR x_acme_app.Sync: Sync failed ⏎ retrying"));

    let query = sent_query(&fake, SYSLOG);
    assert!(query.starts_with("sys_created_on>="), "{query}");
    assert!(query.contains("^level=2^sourceLIKESync^sys_scope.scope=x_acme_app"));
    assert!(query.ends_with("^ORDERBYDESCsys_created_on"));
}

#[tokio::test]
async fn syslogs_reject_unknown_time_ranges() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    let app = app(fake.clone());
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute("syslogs", json!({"timeRange": "3w"}))
        .await
        .expect("dispatch");

    assert!(outcome.is_error);
    assert_eq!(fake.count(Method::GET, SYSLOG), 0);
}

#[tokio::test]
async fn aia_logs_fall_back_to_the_next_readable_table() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    fake.on(
        Method::GET,
        "/api/now/table/sn_aia_execution_plan",
        json_response(403, json!({"error": {"message": "ACL denied"}})),
    );
    fake.on(
        Method::GET,
        "/api/now/table/sn_aia_execution",
        result(json!([{
            "sys_id": "exec01",
            "sys_created_on": "2024-07-02 09:00:00",
            "agent": "Triage Agent",
            "status": "failed",
            "message": "Tool call timed out"
        }])),
    );
    let app = app(fake.clone());
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute("aia_logs", json!({"agentName": "Triage", "status": "failed"}))
        .await
        .expect("dispatch");

    assert!(!outcome.is_error, "{}", outcome.text);
    assert!(outcome
        .text
        .starts_with("1 AI Agent execution(s) from sn_aia_execution"));
    assert!(outcome.text.contains("exec01 agent=Triage Agent status=failed"));
    assert!(outcome.text.contains("  Tool call timed out"));
    assert_eq!(
        sent_query(&fake, "/api/now/table/sn_aia_execution"),
        "agent.nameLIKETriage^status=failed^ORDERBYDESCsys_created_on"
    );
}

#[tokio::test]
async fn aia_logs_include_tool_calls_from_the_first_readable_child_table() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    fake.on(
        Method::GET,
        "/api/now/table/sn_aia_execution_plan",
        result(json!([
            {"sys_id": "plan01", "sys_created_on": "2024-07-02 09:00:00", "agent": "Triage Agent", "state": "complete", "objective": "Resolve INC0010001"},
            {"sys_id": "plan02", "sys_created_on": "2024-07-02 08:00:00", "agent": "Triage Agent", "state": "complete", "objective": "Resolve INC0010002"}
        ])),
    );
    fake.on(
        Method::GET,
        "/api/now/table/sn_aia_execution_tool",
        result(json!([{"sys_id": "t1", "tool": "Lookup incident", "status": "success", "output": "found"}])),
    );
    let app = app(fake.clone());
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute("servicenow_aia_logs", json!({"includeToolCalls": true}))
        .await
        .expect("dispatch");

    assert!(!outcome.is_error, "{}", outcome.text);
    assert!(outcome.text.contains("  - Lookup incident [success] found"));
    assert_eq!(fake.count(Method::GET, "/api/now/table/sn_aia_execution_tool"), 2);
    assert_eq!(fake.count(Method::GET, "/api/now/table/sn_aia_tool_execution"), 1);
}

#[tokio::test]
async fn aia_logs_report_when_no_table_is_readable() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    let app = app(fake);
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute("aia_logs", json!({}))
        .await
        .expect("dispatch");

    assert!(outcome.is_error);
    assert!(outcome.text.contains("table_not_accessible"));
    assert!(outcome.text.contains("sys_gen_ai_log_metadata"));
}
