use crate::constants::{script as script_constants, tools};
use crate::errors::{ErrorType, ServiceNowError};
use crate::services::logger::Logger;
use crate::services::tool_executor::ToolHandler;
use crate::services::validation::Validation;
use crate::servicenow::connection::ConnectionManager;
use crate::servicenow::executor::{ScriptExecutionResult, ScriptExecutor};
use crate::servicenow::readonly::{prepare, ExecutionMode, PreparedScript};
use crate::utils::feature_flags::is_execute_mode_disabled;
use crate::utils::text::indent;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub script: String,
    pub mode: ExecutionMode,
    pub timeout: std::time::Duration,
    pub description: Option<String>,
}

/// analyze → refuse → prepare → execute → format.
#[derive(Clone)]
pub struct ScriptManager {
    logger: Logger,
    validation: Validation,
    connections: Arc<ConnectionManager>,
    executor: Arc<ScriptExecutor>,
}

impl ScriptManager {
    pub fn new(
        logger: Logger,
        connections: Arc<ConnectionManager>,
        executor: Arc<ScriptExecutor>,
    ) -> Self {
        Self {
            logger: logger.child("script"),
            validation: Validation::new(ErrorType::ScriptError),
            connections,
            executor,
        }
    }

    pub fn parse_request(&self, args: &Value) -> Result<ScriptRequest, ServiceNowError> {
        let script = self.validation.ensure_required_string(args, "script", false)?;
        let mode = self
            .validation
            .ensure_optional_string(args.get("mode"), "mode", true)?
            .unwrap_or_default()
            .parse::<ExecutionMode>()?;
        let timeout = self.validation.ensure_timeout_secs(
            args.get("timeout"),
            script_constants::DEFAULT_TIMEOUT_SECS,
            script_constants::MAX_TIMEOUT_SECS,
        )?;
        let description = self
            .validation
            .ensure_optional_string(args.get("description"), "description", true)?;
        Ok(ScriptRequest {
            script,
            mode,
            timeout,
            description,
        })
    }

    /// Everything that can refuse a script without touching the instance.
    pub fn vet(&self, request: &ScriptRequest) -> Result<PreparedScript, ServiceNowError> {
        if request.mode == ExecutionMode::Execute && is_execute_mode_disabled() {
            return Err(ServiceNowError::dangerous_operation(
                "Execute mode is disabled on this server",
            )
            .with_suggestion("Run the script with mode readonly."));
        }
        let prepared = match prepare(&request.script, request.mode) {
            Ok(prepared) => prepared,
            Err(err) => {
                self.logger.warn(
                    "script refused",
                    Some(&json!({
                        "mode": request.mode.as_str(),
                        "error_type": err.error_type.as_str(),
                        "details": err.details,
                    })),
                );
                return Err(err);
            }
        };
        self.logger.info(
            "script verdict",
            Some(&json!({
                "mode": request.mode.as_str(),
                "mutation_risk": prepared.analysis.has_mutation_risk,
                "warnings": prepared.analysis.warnings.len(),
                "wrapped": prepared.wrapped,
            })),
        );
        if request.mode == ExecutionMode::Execute && prepared.analysis.has_mutation_risk {
            self.logger.warn(
                "executing script with mutation risk",
                Some(&json!({"description": request.description})),
            );
        }
        Ok(prepared)
    }

    pub async fn run(&self, args: Value) -> Result<String, ServiceNowError> {
        let request = self.parse_request(&args)?;
        let prepared = self.vet(&request)?;
        let client = self.connections.get_active_client()?;
        let result = self
            .executor
            .execute(&client, &prepared, Some(request.timeout))
            .await?;
        Ok(render_result(&request, &prepared, &result))
    }
}

pub fn render_result(
    request: &ScriptRequest,
    prepared: &PreparedScript,
    result: &ScriptExecutionResult,
) -> String {
    let mut lines = vec![format!(
        "Script executed ({}) via {} in {} ms",
        result.mode,
        result.path.describe(),
        result.duration_ms
    )];
    if let Some(description) = &request.description {
        lines.push(format!("Description: {}", description));
    }
    if request.mode == ExecutionMode::Execute && prepared.analysis.has_mutation_risk {
        lines.push(
            "Warning: execute mode ran without interception; this script may have modified data."
                .to_string(),
        );
    }
    if !prepared.analysis.warnings.is_empty() {
        lines.push("Warnings:".to_string());
        for warning in &prepared.analysis.warnings {
            lines.push(format!("  - {}", warning));
        }
    }

    lines.push(String::new());
    if result.output.is_empty() {
        lines.push("Output: (none)".to_string());
    } else {
        lines.push(format!("Output ({} line(s)):", result.output.len()));
        lines.push(indent(&result.output.join("\n"), "  "));
    }

    if prepared.wrapped {
        lines.push(String::new());
        if result.suppressed_mutations.is_empty() {
            lines.push("Suppressed mutations: none".to_string());
        } else {
            lines.push(format!(
                "Suppressed mutations ({}):",
                result.suppressed_mutations.len()
            ));
            for mutation in &result.suppressed_mutations {
                let mut line = format!(
                    "  - {} on {}",
                    mutation.method,
                    mutation.table.as_deref().unwrap_or("?")
                );
                if let Some(sys_id) = &mutation.sys_id {
                    line.push_str(&format!(" (sys_id {})", sys_id));
                }
                if let Some(query) = mutation.encoded_query.as_deref().filter(|q| !q.is_empty()) {
                    line.push_str(&format!(" [{}]", query));
                }
                lines.push(line);
            }
        }
        let predicted = prepared.predicted_mutations();
        if !predicted.is_empty() {
            let names: Vec<String> = predicted
                .iter()
                .map(|call| match &call.table {
                    Some(table) => format!("{}.{} on {}", call.variable, call.method, table),
                    None => format!("{}.{}", call.variable, call.method),
                })
                .collect();
            lines.push(format!("Intercepted calls in source: {}", names.join(", ")));
        }
    }
    lines.join("\n")
}

#[async_trait::async_trait]
impl ToolHandler for ScriptManager {
    async fn handle(&self, tool: &str, args: Value) -> Result<String, ServiceNowError> {
        match tool {
            tools::SCRIPT => self.run(args).await,
            other => Err(ServiceNowError::unknown(format!(
                "Script tools cannot handle {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::services::credentials::MemoryCredentialStore;
    use crate::servicenow::executor::{ExecutionPath, ExecutorSettings, SuppressedMutation};
    use crate::servicenow::transport::ReqwestTransport;

    fn manager() -> ScriptManager {
        let logger = Logger::new("test");
        let transport = Arc::new(ReqwestTransport::new().expect("transport"));
        let connections = Arc::new(ConnectionManager::new(
            logger.clone(),
            &ServerConfig::default(),
            transport,
            Arc::new(MemoryCredentialStore::new()),
        ));
        let executor = Arc::new(ScriptExecutor::new(logger.clone(), ExecutorSettings::default()));
        ScriptManager::new(logger, connections, executor)
    }

    #[tokio::test]
    async fn blocked_scripts_fail_before_connection_check() {
        let err = manager()
            .run(json!({"script": "new GlideRecord('incident').deleteMultiple();", "mode": "execute"}))
            .await
            .expect_err("blocked");
        assert_eq!(err.error_type, ErrorType::ScriptBlocked);
    }

    #[tokio::test]
    async fn valid_scripts_need_a_session() {
        let err = manager()
            .run(json!({"script": "gs.print('hi');"}))
            .await
            .expect_err("no session");
        assert_eq!(err.error_type, ErrorType::ConnectionFailed);
    }

    #[test]
    fn timeout_above_limit_is_rejected() {
        let err = manager()
            .parse_request(&json!({"script": "gs.print(1);", "timeout": 500}))
            .expect_err("too long");
        assert_eq!(err.error_type, ErrorType::ScriptError);
    }

    #[test]
    fn readonly_render_lists_suppressed_mutations() {
        let m = manager();
        let request = m
            .parse_request(&json!({"script": "var gr = new GlideRecord('incident');\ngr.get('abc');\ngr.update();"}))
            .expect("request");
        let prepared = m.vet(&request).expect("prepared");
        let result = ScriptExecutionResult {
            output: vec!["read ok".to_string()],
            suppressed_mutations: vec![SuppressedMutation {
                table: Some("incident".to_string()),
                method: "update".to_string(),
                sys_id: Some("abc".to_string()),
                encoded_query: None,
            }],
            path: ExecutionPath::Artifact,
            artifact_sys_id: Some("art1".to_string()),
            duration_ms: 12,
            mode: ExecutionMode::Readonly,
        };
        let text = render_result(&request, &prepared, &result);
        assert!(text.contains("Suppressed mutations (1):"));
        assert!(text.contains("update on incident (sys_id abc)"));
        assert!(text.contains("gr.update on incident"));
    }
}
