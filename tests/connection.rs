mod common;
use common::{app, app_with, connect, mock_instance, test_config, FakeTransport, INSTANCE_URL};

use reqwest::Method;
use serde_json::json;
use servicenow_mcp::services::credentials::{CredentialProfile, MemoryCredentialStore};

#[tokio::test]
async fn connect_reports_user_version_and_deduplicated_roles() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    let app = app(fake.clone());

    let outcome = app
        .tool_executor
        .execute(
            "connect",
            json!({"instance": "dev12345", "username": "admin", "password": "pw"}),
        )
        .await
        .expect("dispatch");

    assert!(!outcome.is_error, "{}", outcome.text);
    assert!(outcome.text.contains(&format!("Connected to {}", INSTANCE_URL)));
    assert!(outcome.text.contains("Version: Xanadu 07-02-2024 patch2"));
    assert!(outcome.text.contains("Roles: admin, itil"));
    assert!(!outcome.text.contains("pw"));

    let session = app.connections.get_active_session().expect("active session");
    assert_eq!(session.instance_url, INSTANCE_URL);
    assert_eq!(session.user_name, "admin");
}

#[tokio::test]
async fn status_lists_the_active_session() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    let app = app(fake);
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute("servicenow_status", json!({}))
        .await
        .expect("dispatch");

    assert!(outcome.text.contains(&format!("Connected: {}", INSTANCE_URL)));
    assert!(outcome.text.contains("Version: Xanadu 07-02-2024 patch2"));
    assert!(outcome.text.contains("Sessions (1):"));
}

#[tokio::test]
async fn reconnecting_replaces_the_session_for_the_same_instance() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    let app = app(fake);
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute(
            "servicenow_connect",
            json!({"instance": "https://DEV12345.service-now.com/", "username": "admin", "password": "pw"}),
        )
        .await
        .expect("dispatch");

    assert!(!outcome.is_error, "{}", outcome.text);
    assert_eq!(app.connections.get_all_sessions().len(), 1);
}

#[tokio::test]
async fn bad_credentials_leave_no_session_behind() {
    let fake = FakeTransport::new();
    fake.on(
        Method::GET,
        "/api/now/table/sys_properties",
        common::json_response(401, json!({"error": {"message": "User Not Authenticated"}})),
    );
    let app = app(fake);

    let outcome = app
        .tool_executor
        .execute(
            "servicenow_connect",
            json!({"instance": "dev12345", "username": "admin", "password": "wrong"}),
        )
        .await
        .expect("dispatch");

    assert!(outcome.is_error);
    assert!(outcome.text.contains("authentication_failed"));
    assert!(!app.connections.is_connected());
}

#[tokio::test]
async fn invalid_instance_is_rejected_without_network() {
    let fake = FakeTransport::new();
    let app = app(fake.clone());

    let outcome = app
        .tool_executor
        .execute(
            "servicenow_connect",
            json!({"instance": "bad host", "username": "admin", "password": "pw"}),
        )
        .await
        .expect("dispatch");

    assert!(outcome.is_error);
    assert!(outcome.text.contains("invalid_instance"));
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn profiles_fill_in_missing_credentials() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    let store = MemoryCredentialStore::new().with_profile(
        "dev",
        CredentialProfile {
            instance: Some("dev12345".to_string()),
            auth_type: Some("basic".to_string()),
            username: Some("admin".to_string()),
            password: Some("pw".to_string()),
            ..CredentialProfile::default()
        },
    );
    let app = app_with(fake.clone(), test_config(), store);

    let outcome = app
        .tool_executor
        .execute("servicenow_connect", json!({"profile": "dev"}))
        .await
        .expect("dispatch");

    assert!(!outcome.is_error, "{}", outcome.text);
    let first = &fake.requests()[0];
    assert_eq!(first.header("Authorization"), Some("Basic YWRtaW46cHc="));
}

#[tokio::test]
async fn disconnect_clears_the_active_session() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    let app = app(fake);
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute("disconnect", json!({}))
        .await
        .expect("dispatch");
    assert!(outcome.text.starts_with("Disconnected from"));
    assert!(!app.connections.is_connected());

    let again = app
        .tool_executor
        .execute("disconnect", json!({}))
        .await
        .expect("dispatch");
    assert!(!again.is_error);
    assert!(again.text.contains("nothing to disconnect"));

    let query = app
        .tool_executor
        .execute("query", json!({"table": "incident"}))
        .await
        .expect("dispatch");
    assert!(query.is_error);
    assert!(query.text.contains("connection_failed"));
}

#[tokio::test]
async fn select_requires_an_existing_session() {
    let fake = FakeTransport::new();
    let app = app(fake);

    let outcome = app
        .tool_executor
        .execute("select", json!({"instance": "dev99999"}))
        .await
        .expect("dispatch");

    assert!(outcome.is_error);
    assert!(outcome.text.contains("No session for https://dev99999.service-now.com"));
}
