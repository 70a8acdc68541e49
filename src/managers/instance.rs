use crate::constants::{limits, properties, tables, tools};
use crate::errors::{ErrorType, ServiceNowError};
use crate::services::logger::Logger;
use crate::services::tool_executor::ToolHandler;
use crate::services::validation::Validation;
use crate::servicenow::client::{parse_build_tag, ServiceNowClient};
use crate::servicenow::connection::ConnectionManager;
use crate::servicenow::fields::record_field;
use crate::servicenow::probe::CandidateProbe;
use crate::utils::encoded_query::EncodedQuery;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

const SLOW_RESPONSE_MS: u128 = 2_000;

/// Product capability detected through plugin ids, or through its tables when
/// the plugin registry cannot be read.
#[derive(Debug, Clone, Copy)]
pub struct FeatureProbe {
    pub key: &'static str,
    pub label: &'static str,
    pub plugins: &'static [&'static str],
    pub tables: &'static [&'static str],
}

pub const FEATURES: &[FeatureProbe] = &[
    FeatureProbe {
        key: "aia",
        label: "AI Agents",
        plugins: &["sn_aia"],
        tables: &["sn_aia_agent"],
    },
    FeatureProbe {
        key: "now_assist",
        label: "Now Assist",
        plugins: &["sn_generative_ai", "com.glide.now_assist"],
        tables: &["sys_gen_ai_config"],
    },
    FeatureProbe {
        key: "flow_designer",
        label: "Flow Designer",
        plugins: &["com.glide.hub.flow_engine"],
        tables: &["sys_hub_flow"],
    },
    FeatureProbe {
        key: "integration_hub",
        label: "IntegrationHub",
        plugins: &["com.glide.hub.integration_runtime"],
        tables: &["sys_hub_action_type_definition"],
    },
    FeatureProbe {
        key: "atf",
        label: "Automated Test Framework",
        plugins: &["com.glide.automated_testing_framework"],
        tables: &["sys_atf_test"],
    },
    FeatureProbe {
        key: "service_portal",
        label: "Service Portal",
        plugins: &["com.glide.service-portal"],
        tables: &["sp_portal"],
    },
    FeatureProbe {
        key: "virtual_agent",
        label: "Virtual Agent",
        plugins: &["com.glide.cs.chatbot"],
        tables: &["sys_cs_topic"],
    },
    FeatureProbe {
        key: "performance_analytics",
        label: "Performance Analytics",
        plugins: &["com.snc.pa"],
        tables: &["pa_indicators"],
    },
    FeatureProbe {
        key: "cmdb",
        label: "CMDB",
        plugins: &["com.snc.cmdb"],
        tables: &["cmdb_ci"],
    },
];

pub fn feature(key: &str) -> Option<&'static FeatureProbe> {
    FEATURES.iter().find(|f| f.key == key)
}

/// Plugin registry table and the column holding the plugin id.
#[derive(Debug, Clone, Copy)]
struct PluginRegistry {
    table: &'static str,
    id_field: &'static str,
}

const PLUGIN_REGISTRIES: &[PluginRegistry] = &[
    PluginRegistry {
        table: "v_plugin",
        id_field: "id",
    },
    PluginRegistry {
        table: "sys_plugins",
        id_field: "source",
    },
];

fn registry(table: &str) -> PluginRegistry {
    PLUGIN_REGISTRIES
        .iter()
        .copied()
        .find(|r| r.table == table)
        .unwrap_or(PLUGIN_REGISTRIES[0])
}

fn is_active(value: Option<String>) -> bool {
    matches!(
        value.map(|v| v.trim().to_lowercase()).as_deref(),
        Some("active") | Some("true") | Some("1") | Some("yes")
    )
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeatureStatus {
    pub key: String,
    pub enabled: bool,
    /// `plugin:<id>` or `table:<name>`, whichever decided the answer.
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub id: String,
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Clone)]
pub struct InstanceManager {
    logger: Logger,
    validation: Validation,
    connections: Arc<ConnectionManager>,
}

impl InstanceManager {
    pub fn new(logger: Logger, connections: Arc<ConnectionManager>) -> Self {
        Self {
            logger: logger.child("instance"),
            validation: Validation::new(ErrorType::InvalidInstance),
            connections,
        }
    }

    fn requested_features(&self, args: &Value) -> Result<Vec<&'static FeatureProbe>, ServiceNowError> {
        let keys = self
            .validation
            .ensure_string_list(args.get("checkFeatures"), "checkFeatures")?;
        if keys.iter().any(|k| k.eq_ignore_ascii_case("all")) {
            return Ok(FEATURES.iter().collect());
        }
        let mut out = Vec::new();
        for key in keys {
            let normalized = key.to_lowercase();
            let probe = feature(&normalized).ok_or_else(|| {
                ServiceNowError::query_error(format!("Unknown feature: {}", key)).with_suggestion(
                    format!(
                        "Use one of: {}, or all.",
                        FEATURES.iter().map(|f| f.key).collect::<Vec<_>>().join(", ")
                    ),
                )
            })?;
            out.push(probe);
        }
        Ok(out)
    }

    pub async fn instance(&self, args: Value) -> Result<String, ServiceNowError> {
        let include_plugins = self
            .validation
            .ensure_optional_bool(args.get("includePlugins"), "includePlugins")?
            .unwrap_or(false);
        let include_health = self
            .validation
            .ensure_optional_bool(args.get("includeHealth"), "includeHealth")?
            .unwrap_or(false);
        let features = self.requested_features(&args)?;
        let client = self.connections.get_active_client()?;
        let session = self.connections.get_active_session();

        let mut lines = vec![format!("Instance: {}", client.instance_url())];
        if let Some(session) = &session {
            lines.push(format!("User: {}", session.user_name));
        }

        let started = Instant::now();
        let props = self.build_properties(&client).await?;
        let latency_ms = started.elapsed().as_millis();
        match props.get(properties::BUILD_TAG) {
            Some(tag) => {
                lines.push(format!("Version: {}", parse_build_tag(tag)));
                lines.push(format!("Build tag: {}", tag));
            }
            None => lines.push("Version: unknown (build properties not readable)".to_string()),
        }
        if let Some(name) = props.get(properties::BUILD_NAME) {
            lines.push(format!("Build name: {}", name));
        }
        if let Some(date) = props.get(properties::BUILD_DATE) {
            lines.push(format!("Build date: {}", date));
        }
        if let Some(war) = props.get(properties::WAR) {
            lines.push(format!("War: {}", war));
        }

        let nodes = self.cluster_nodes(&client).await?;
        match &nodes {
            Some(nodes) => lines.push(format!("Nodes: {}", nodes.len())),
            None => lines.push("Nodes: unknown (sys_cluster_state not readable)".to_string()),
        }

        if include_health {
            let offline = nodes
                .as_ref()
                .map(|nodes| nodes.iter().filter(|(_, online)| !online).count())
                .unwrap_or(0);
            let status = if latency_ms > SLOW_RESPONSE_MS || offline > 0 {
                "degraded"
            } else {
                "healthy"
            };
            lines.push(String::new());
            lines.push(format!("Health: {}", status));
            lines.push(format!("  response time: {} ms", latency_ms));
            if let Some(nodes) = &nodes {
                for (node, online) in nodes {
                    lines.push(format!(
                        "  node {}: {}",
                        node,
                        if *online { "online" } else { "offline" }
                    ));
                }
            }
        }

        if include_plugins {
            lines.push(String::new());
            match self.active_plugins(&client).await {
                Ok(plugins) => {
                    lines.push(format!("Active plugins ({}):", plugins.len()));
                    for plugin in plugins {
                        lines.push(format!(
                            "  {}{}{}",
                            plugin.id,
                            plugin
                                .name
                                .map(|n| format!(" ({})", n))
                                .unwrap_or_default(),
                            plugin
                                .version
                                .map(|v| format!(" v{}", v))
                                .unwrap_or_default(),
                        ));
                    }
                }
                Err(err) if err.error_type == ErrorType::TableNotAccessible => {
                    lines.push(format!("Plugins: unavailable ({})", err.message));
                }
                Err(err) => return Err(err),
            }
        }

        if !features.is_empty() {
            let statuses = self.check_features(&client, &features).await?;
            let enabled: Vec<&str> = statuses
                .iter()
                .filter(|s| s.enabled)
                .map(|s| s.key.as_str())
                .collect();
            let disabled: Vec<&str> = statuses
                .iter()
                .filter(|s| !s.enabled)
                .map(|s| s.key.as_str())
                .collect();
            lines.push(String::new());
            lines.push("Features:".to_string());
            for status in &statuses {
                let label = feature(&status.key).map(|f| f.label).unwrap_or("");
                lines.push(format!(
                    "  {} {} ({}){}",
                    if status.enabled { "[x]" } else { "[ ]" },
                    status.key,
                    label,
                    status
                        .evidence
                        .as_ref()
                        .map(|e| format!(" via {}", e))
                        .unwrap_or_default(),
                ));
            }
            lines.push(format!(
                "Enabled: {}",
                if enabled.is_empty() { "none".to_string() } else { enabled.join(", ") }
            ));
            lines.push(format!(
                "Disabled: {}",
                if disabled.is_empty() { "none".to_string() } else { disabled.join(", ") }
            ));
        }

        Ok(lines.join("\n"))
    }

    /// Build properties by name. ACL-hidden properties yield an empty map.
    async fn build_properties(
        &self,
        client: &ServiceNowClient,
    ) -> Result<BTreeMap<String, String>, ServiceNowError> {
        let names = [
            properties::BUILD_TAG,
            properties::BUILD_NAME,
            properties::BUILD_DATE,
            properties::WAR,
        ];
        match client.get_properties(&names).await {
            Ok(pairs) => Ok(pairs.into_iter().collect()),
            Err(err) if err.error_type.is_surface_miss() => {
                self.logger.debug(
                    "build properties hidden",
                    Some(&json!({"error_type": err.error_type.as_str()})),
                );
                Ok(BTreeMap::new())
            }
            Err(err) => Err(err),
        }
    }

    /// (node id, online) pairs, or None when the cluster table is hidden.
    async fn cluster_nodes(
        &self,
        client: &ServiceNowClient,
    ) -> Result<Option<Vec<(String, bool)>>, ServiceNowError> {
        let fields = vec!["system_id".to_string(), "status".to_string()];
        match client
            .query_table(tables::CLUSTER_STATE, None, &fields, 100)
            .await
        {
            Ok(rows) => Ok(Some(
                rows.iter()
                    .map(|row| {
                        let node = record_field(row, "system_id").unwrap_or_else(|| "?".to_string());
                        let online = record_field(row, "status")
                            .map(|s| s.eq_ignore_ascii_case("online"))
                            .unwrap_or(false);
                        (node, online)
                    })
                    .collect(),
            )),
            Err(err) if err.error_type.is_surface_miss() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn active_plugins(&self, client: &ServiceNowClient) -> Result<Vec<PluginInfo>, ServiceNowError> {
        let probe = CandidateProbe::new(PLUGIN_REGISTRIES.iter().map(|r| r.table));
        let outcome = probe
            .first_success(|table| async move {
                let reg = registry(table);
                let fields: Vec<String> = [reg.id_field, "name", "version", "active"]
                    .iter()
                    .map(|f| f.to_string())
                    .collect();
                let query = EncodedQuery::new().order_by(reg.id_field, false).build();
                client
                    .query_table(table, Some(&query), &fields, limits::PLUGIN_LIST_LIMIT)
                    .await
            })
            .await
            .map_err(|failure| failure.into_error("No plugin registry is readable"))?;
        let reg = registry(&outcome.candidate);
        Ok(outcome
            .value
            .iter()
            .filter(|row| is_active(record_field(row, "active")))
            .filter_map(|row| {
                Some(PluginInfo {
                    id: record_field(row, reg.id_field)?,
                    name: record_field(row, "name"),
                    version: record_field(row, "version"),
                })
            })
            .collect())
    }

    /// Asks the plugin registry for every requested plugin id at once; when
    /// no registry is readable each feature falls back to its tables.
    pub async fn check_features(
        &self,
        client: &ServiceNowClient,
        features: &[&'static FeatureProbe],
    ) -> Result<Vec<FeatureStatus>, ServiceNowError> {
        let ids: Vec<&str> = features.iter().flat_map(|f| f.plugins.iter().copied()).collect();
        let probe = CandidateProbe::new(PLUGIN_REGISTRIES.iter().map(|r| r.table));
        let registry_rows = probe
            .first_success(|table| {
                let ids = ids.clone();
                async move {
                    let reg = registry(table);
                    let query = EncodedQuery::new().one_of(reg.id_field, &ids).build();
                    let fields = vec![reg.id_field.to_string(), "active".to_string()];
                    client
                        .query_table(table, Some(&query), &fields, ids.len().max(1))
                        .await
                }
            })
            .await;

        match registry_rows {
            Ok(outcome) => {
                let reg = registry(&outcome.candidate);
                let active: Vec<String> = outcome
                    .value
                    .iter()
                    .filter(|row| is_active(record_field(row, "active")))
                    .filter_map(|row| record_field(row, reg.id_field))
                    .collect();
                Ok(features
                    .iter()
                    .map(|f| {
                        let hit = f.plugins.iter().find(|p| active.iter().any(|a| a == *p));
                        FeatureStatus {
                            key: f.key.to_string(),
                            enabled: hit.is_some(),
                            evidence: hit.map(|p| format!("plugin:{}", p)),
                        }
                    })
                    .collect())
            }
            Err(failure) if !failure.aborted => {
                self.logger.debug(
                    "plugin registry unreadable; probing feature tables",
                    Some(&json!({"attempted": failure.attempted})),
                );
                let mut out = Vec::new();
                for f in features {
                    out.push(self.feature_by_tables(client, f).await?);
                }
                Ok(out)
            }
            Err(failure) => Err(failure.into_error("Plugin registry lookup failed")),
        }
    }

    async fn feature_by_tables(
        &self,
        client: &ServiceNowClient,
        feature: &FeatureProbe,
    ) -> Result<FeatureStatus, ServiceNowError> {
        let fields = vec!["sys_id".to_string()];
        let probe = CandidateProbe::new(feature.tables.iter().copied());
        match probe
            .first_success(|table| {
                let fields = fields.clone();
                async move { client.query_table(table, None, &fields, 1).await }
            })
            .await
        {
            Ok(outcome) => Ok(FeatureStatus {
                key: feature.key.to_string(),
                enabled: true,
                evidence: Some(format!("table:{}", outcome.candidate)),
            }),
            Err(failure) if !failure.aborted => Ok(FeatureStatus {
                key: feature.key.to_string(),
                enabled: false,
                evidence: None,
            }),
            Err(failure) => Err(failure.into_error("Feature table probe failed")),
        }
    }
}

#[async_trait::async_trait]
impl ToolHandler for InstanceManager {
    async fn handle(&self, tool: &str, args: Value) -> Result<String, ServiceNowError> {
        match tool {
            tools::INSTANCE => self.instance(args).await,
            other => Err(ServiceNowError::unknown(format!(
                "Instance tools cannot handle {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_keys_are_unique_and_probe_something() {
        let mut keys: Vec<&str> = FEATURES.iter().map(|f| f.key).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), FEATURES.len());
        assert!(FEATURES.iter().all(|f| !f.plugins.is_empty() && !f.tables.is_empty()));
    }

    #[test]
    fn plugin_activity_spellings() {
        assert!(is_active(Some("Active".to_string())));
        assert!(is_active(Some("true".to_string())));
        assert!(!is_active(Some("inactive".to_string())));
        assert!(!is_active(None));
    }
}
