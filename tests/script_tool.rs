mod common;
use common::{
    app, app_with, connect, envelope_message, json_response, mock_artifact_run, mock_instance,
    result, submitted_tag, test_config, FakeTransport,
};

use reqwest::Method;
use serde_json::json;
use servicenow_mcp::config::ServerConfig;
use servicenow_mcp::services::credentials::MemoryCredentialStore;
use servicenow_mcp::servicenow::retry::RetryPolicy;
use servicenow_mcp::servicenow::transport::{HttpResponse, TransportError};

const ARTIFACTS: &str = "/api/now/table/sysauto_script";

fn submitted_program(fake: &FakeTransport) -> String {
    fake.requests()
        .iter()
        .rev()
        .find_map(|req| req.json_body()?.get("script")?.as_str().map(str::to_string))
        .unwrap_or_default()
}

#[tokio::test]
async fn mass_deletes_are_refused_in_every_mode_without_contacting_the_instance() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    let app = app(fake.clone());
    connect(&app).await;
    let before = fake.requests().len();

    let scripts = [
        "var gr = new GlideRecord('incident');\ngr.addQuery('active', false);\ngr.deleteMultiple();",
        "var gr = new GlideRecord('incident');\ngr.addQuery('active', false);\ngr['deleteMultiple']();",
        "var m = new GlideMultipleDelete('incident');\nm.addQuery('active', false);\nm.execute();",
        "var m = new GlideMultipleUpdate('incident');\nm.setValue('state', 7);\nm.execute();",
    ];
    for script in scripts {
        for mode in ["readonly", "execute"] {
            let outcome = app
                .tool_executor
                .execute("servicenow_script", json!({"script": script, "mode": mode}))
                .await
                .expect("dispatch");
            assert!(outcome.is_error, "{mode}");
            assert!(outcome.text.contains("script_blocked"), "{mode}: {}", outcome.text);
        }
    }

    assert_eq!(fake.requests().len(), before);
}

#[tokio::test]
async fn syntax_errors_are_reported_before_submission() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    let app = app(fake.clone());
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute("script", json!({"script": "var x = (1 + ;\ngs.print(x);"}))
        .await
        .expect("dispatch");

    assert!(outcome.is_error);
    assert!(outcome.text.contains("script_error"));
    assert_eq!(fake.count(Method::POST, ARTIFACTS), 0);
}

#[tokio::test]
async fn readonly_runs_behind_the_facade_and_reports_suppressed_writes() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    mock_artifact_run(
        &fake,
        json!({
            "output": ["updated 1"],
            "mutations": [{"table": "incident", "method": "update", "sys_id": "abc"}],
            "error": null
        }),
    );
    let app = app(fake.clone());
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute(
            "script",
            json!({
                "script": "var gr = new GlideRecord('incident');\nif (gr.get('abc')) {\n  gr.short_description = 'x';\n  gr.update();\n}\ngs.print('updated 1');",
                "description": "dry run"
            }),
        )
        .await
        .expect("dispatch");

    assert!(!outcome.is_error, "{}", outcome.text);
    assert!(outcome
        .text
        .starts_with("Script executed (readonly) via scheduled job (sysauto_script)"));
    assert!(outcome.text.contains("Description: dry run"));
    assert!(outcome.text.contains("Output (1 line(s)):\n  updated 1"));
    assert!(outcome.text.contains("Suppressed mutations (1):"));
    assert!(outcome.text.contains("  - update on incident (sys_id abc)"));

    let program = submitted_program(&fake);
    assert!(program.contains("__makeFacade"));
    assert!(!program.contains("var __GR = GlideRecord;"));

    for request in fake.requests() {
        if request.method != Method::GET {
            assert!(
                request.path().starts_with(ARTIFACTS),
                "unexpected write {} {}",
                request.method,
                request.path()
            );
        }
    }
    assert_eq!(fake.count(Method::DELETE, "/api/now/table/sysauto_script/art0001"), 1);
}

#[tokio::test]
async fn execute_mode_submits_the_script_unmodified() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    mock_artifact_run(&fake, json!({"output": [], "mutations": [], "error": null}));
    let app = app(fake.clone());
    connect(&app).await;
    let script = "var gr = new GlideRecord('incident');\ngr.get('abc');\ngr.state = 6;\ngr.update();";

    let outcome = app
        .tool_executor
        .execute("script", json!({"script": script, "mode": "execute"}))
        .await
        .expect("dispatch");

    assert!(!outcome.is_error, "{}", outcome.text);
    assert!(outcome.text.contains("execute mode ran without interception"));
    assert!(outcome.text.contains("Output: (none)"));
    assert!(!outcome.text.contains("Suppressed mutations"));

    let program = submitted_program(&fake);
    assert!(program.contains(script));
    assert!(program.contains("var __GR = GlideRecord;"));
    assert!(!program.contains("__makeFacade"));
}

#[tokio::test]
async fn runtime_errors_come_back_as_script_errors() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    mock_artifact_run(
        &fake,
        json!({"output": ["before"], "mutations": [], "error": "foo is not defined"}),
    );
    let app = app(fake.clone());
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute("script", json!({"script": "gs.print('before');\nfoo.bar();"}))
        .await
        .expect("dispatch");

    assert!(outcome.is_error);
    assert!(outcome.text.contains("script_error"));
    assert!(outcome.text.contains("foo is not defined"));
    assert_eq!(fake.count(Method::DELETE, "/api/now/table/sysauto_script/art0001"), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_output_times_out_and_still_cleans_up() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    fake.on(
        Method::POST,
        ARTIFACTS,
        json_response(201, json!({"result": {"sys_id": "art0001"}})),
    )
    .on(
        Method::PATCH,
        "/api/now/table/sysauto_script/art0001",
        result(json!({"sys_id": "art0001"})),
    )
    .on(
        Method::DELETE,
        "/api/now/table/sysauto_script/art0001",
        result(json!({})),
    )
    .on(Method::GET, "/api/now/table/syslog", result(json!([])));
    let app = app(fake.clone());
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute("script", json!({"script": "gs.print('slow');", "timeout": 1}))
        .await
        .expect("dispatch");

    assert!(outcome.is_error);
    assert!(outcome.text.contains("script_timeout"), "{}", outcome.text);
    assert!(fake.count(Method::GET, "/api/now/table/syslog") >= 2);
    assert_eq!(fake.count(Method::DELETE, "/api/now/table/sysauto_script/art0001"), 1);
}

#[tokio::test]
async fn falls_back_to_a_direct_endpoint_when_artifacts_are_denied() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    fake.on(
        Method::POST,
        ARTIFACTS,
        json_response(403, json!({"error": {"message": "Operation against file 'sysauto_script' was aborted"}})),
    );
    fake.on_fn(Method::POST, "/api/now/v1/script/execute", |_, history| {
        let tag = submitted_tag(history).unwrap_or_default();
        Ok(HttpResponse {
            status: 200,
            status_text: "OK".to_string(),
            body: format!(
                "*** Script: {}",
                envelope_message(&tag, json!({"output": ["direct"], "mutations": [], "error": null}))
            ),
        })
    });
    let app = app(fake.clone());
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute("script", json!({"script": "gs.print('direct');"}))
        .await
        .expect("dispatch");

    assert!(!outcome.is_error, "{}", outcome.text);
    assert!(outcome
        .text
        .contains("via direct endpoint /api/now/v1/script/execute"));
    assert!(outcome.text.contains("  direct"));
    assert_eq!(fake.count(Method::GET, "/api/now/table/syslog"), 0);
}

#[tokio::test(start_paused = true)]
async fn a_timed_out_script_submission_is_not_resent() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    fake.on(
        Method::POST,
        ARTIFACTS,
        json_response(403, json!({"error": {"message": "ACL denied"}})),
    );
    fake.on_error(Method::POST, "/api/now/v1/script/execute", TransportError::Timeout);
    let config = ServerConfig {
        retry: RetryPolicy::default(),
        ..test_config()
    };
    let app = app_with(fake.clone(), config, MemoryCredentialStore::new());
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute("script", json!({"script": "gs.print(1);", "mode": "execute"}))
        .await
        .expect("dispatch");

    assert!(outcome.is_error);
    assert!(outcome.text.contains("instance_unavailable"), "{}", outcome.text);
    assert_eq!(fake.count(Method::POST, ARTIFACTS), 1);
    assert_eq!(fake.count(Method::POST, "/api/now/v1/script/execute"), 1);
    assert_eq!(fake.count(Method::POST, "/api/global/mcp_script_runner/execute"), 0);
}

#[tokio::test]
async fn reports_when_no_execution_surface_exists() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    fake.on(
        Method::POST,
        ARTIFACTS,
        json_response(403, json!({"error": {"message": "ACL denied"}})),
    );
    let app = app(fake.clone());
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute("script", json!({"script": "gs.print(1);"}))
        .await
        .expect("dispatch");

    assert!(outcome.is_error);
    assert!(outcome.text.contains("No script execution surface"));
    assert_eq!(fake.count(Method::POST, "/api/now/v1/script/execute"), 1);
    assert_eq!(fake.count(Method::POST, "/api/global/mcp_script_runner/execute"), 1);
}

#[tokio::test]
async fn scripts_need_an_active_session() {
    let fake = FakeTransport::new();
    let app = app(fake.clone());

    let outcome = app
        .tool_executor
        .execute("script", json!({"script": "gs.print(1);"}))
        .await
        .expect("dispatch");

    assert!(outcome.is_error);
    assert!(outcome.text.contains("connection_failed"));
    assert!(fake.requests().is_empty());
}
