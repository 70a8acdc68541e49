mod common;
use common::{app, connect, mock_instance, result, FakeTransport, BUILD_TAG, INSTANCE_URL};

use reqwest::Method;
use serde_json::json;

fn mock_build(fake: &FakeTransport) {
    fake.on(
        Method::GET,
        "/api/now/table/sys_properties",
        result(json!([
            {"name": "glide.buildtag", "value": BUILD_TAG},
            {"name": "glide.buildname", "value": "Xanadu"},
            {"name": "glide.builddate", "value": "07-02-2024_1200"},
            {"name": "glide.war", "value": "glide-xanadu-07-02-2024__patch2.zip"}
        ])),
    );
    fake.on(
        Method::GET,
        "/api/now/table/sys_cluster_state",
        result(json!([
            {"system_id": "app1:node1", "status": "online"},
            {"system_id": "app2:node2", "status": "offline"}
        ])),
    );
}

#[tokio::test]
async fn reports_build_nodes_and_health() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    mock_build(&fake);
    let app = app(fake);
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute("instance", json!({"includeHealth": true}))
        .await
        .expect("dispatch");

    assert!(!outcome.is_error, "{}", outcome.text);
    let text = outcome.text;
    assert!(text.starts_with(&format!("Instance: {}", INSTANCE_URL)));
    assert!(text.contains("User: admin"));
    assert!(text.contains("Version: Xanadu 07-02-2024 patch2"));
    assert!(text.contains("Build name: Xanadu"));
    assert!(text.contains("Nodes: 2"));
    assert!(text.contains("Health: degraded"));
    assert!(text.contains("  node app2:node2: offline"));
}

#[tokio::test]
async fn plugins_and_features_come_from_the_plugin_registry() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    mock_build(&fake);
    fake.on(
        Method::GET,
        "/api/now/table/v_plugin",
        result(json!([
            {"id": "sn_aia", "name": "AI Agents", "version": "5.0.1", "active": "active"},
            {"id": "com.snc.pa", "name": "Performance Analytics", "version": "1.0", "active": "inactive"}
        ])),
    );
    let app = app(fake.clone());
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute(
            "servicenow_instance",
            json!({"includePlugins": true, "checkFeatures": ["aia", "performance_analytics"]}),
        )
        .await
        .expect("dispatch");

    assert!(!outcome.is_error, "{}", outcome.text);
    assert!(outcome.text.contains("Active plugins (1):"));
    assert!(outcome.text.contains("  sn_aia (AI Agents) v5.0.1"));
    assert!(outcome.text.contains("Enabled: aia"));
    assert!(outcome.text.contains("Disabled: performance_analytics"));
    assert_eq!(fake.count(Method::GET, "/api/now/table/sys_plugins"), 0);
}

#[tokio::test]
async fn features_fall_back_to_table_probes_without_a_registry() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    mock_build(&fake);
    fake.on(Method::GET, "/api/now/table/sys_hub_flow", result(json!([])));
    let app = app(fake.clone());
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute("instance", json!({"checkFeatures": "flow_designer,atf"}))
        .await
        .expect("dispatch");

    assert!(!outcome.is_error, "{}", outcome.text);
    assert!(outcome.text.contains("via table:sys_hub_flow"));
    assert!(outcome.text.contains("Enabled: flow_designer"));
    assert!(outcome.text.contains("Disabled: atf"));
    assert_eq!(fake.count(Method::GET, "/api/now/table/v_plugin"), 1);
    assert_eq!(fake.count(Method::GET, "/api/now/table/sys_plugins"), 1);
}

#[tokio::test]
async fn unknown_feature_keys_are_rejected() {
    let fake = FakeTransport::new();
    mock_instance(&fake);
    let app = app(fake);
    connect(&app).await;

    let outcome = app
        .tool_executor
        .execute("instance", json!({"checkFeatures": ["teleport"]}))
        .await
        .expect("dispatch");

    assert!(outcome.is_error);
    assert!(outcome.text.contains("Unknown feature: teleport"));
}
