use crate::constants::{limits, tables, tools};
use crate::errors::{ErrorType, ServiceNowError};
use crate::services::logger::Logger;
use crate::services::tool_executor::ToolHandler;
use crate::services::validation::Validation;
use crate::servicenow::client::ServiceNowClient;
use crate::servicenow::connection::ConnectionManager;
use crate::servicenow::fields::record_field;
use crate::servicenow::probe::CandidateProbe;
use crate::utils::encoded_query::EncodedQuery;
use crate::utils::redact::redact_record;
use crate::utils::text::{single_line, truncate_chars};
use crate::utils::time_range::lower_bound;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

const LEVELS: &[&str] = &["error", "warning", "info", "debug"];
const DEFAULT_TIME_RANGE: &str = "1h";
const SYSLOG_FIELDS: &[&str] = &["sys_id", "sys_created_on", "level", "source", "message"];

/// Syslog stores levels as integers.
pub fn level_code(level: &str) -> Option<&'static str> {
    match level {
        "error" => Some("2"),
        "warning" => Some("1"),
        "info" => Some("0"),
        "debug" => Some("-1"),
        _ => None,
    }
}

fn level_label(raw: &str) -> String {
    match raw.trim() {
        "2" => "ERROR".to_string(),
        "1" => "WARN".to_string(),
        "0" => "INFO".to_string(),
        "-1" => "DEBUG".to_string(),
        other => other.to_uppercase(),
    }
}

/// A table that may hold AI Agent execution records, with the column names
/// it uses.
#[derive(Debug, Clone, Copy)]
pub struct AiaSource {
    pub table: &'static str,
    pub agent_field: &'static str,
    pub status_field: &'static str,
    pub summary_field: &'static str,
}

pub const AIA_SOURCES: &[AiaSource] = &[
    AiaSource {
        table: "sn_aia_execution_plan",
        agent_field: "agent",
        status_field: "state",
        summary_field: "objective",
    },
    AiaSource {
        table: "sn_aia_execution",
        agent_field: "agent",
        status_field: "status",
        summary_field: "message",
    },
    AiaSource {
        table: "sys_gen_ai_log_metadata",
        agent_field: "capability",
        status_field: "status",
        summary_field: "error_message",
    },
];

/// Child tables holding tool invocations, keyed by their parent reference.
#[derive(Debug, Clone, Copy)]
pub struct ToolCallSource {
    pub table: &'static str,
    pub parent_field: &'static str,
}

pub const TOOL_CALL_SOURCES: &[ToolCallSource] = &[
    ToolCallSource {
        table: "sn_aia_tool_execution",
        parent_field: "execution_plan",
    },
    ToolCallSource {
        table: "sn_aia_execution_tool",
        parent_field: "execution",
    },
];

#[derive(Debug, Clone, Default)]
struct AiaFilters {
    execution_id: Option<String>,
    agent_name: Option<String>,
    status: Option<String>,
    since: Option<String>,
}

impl AiaFilters {
    fn encoded(&self, source: &AiaSource) -> String {
        let mut query = EncodedQuery::new();
        if let Some(id) = &self.execution_id {
            query = query.eq("sys_id", id);
        }
        if let Some(agent) = &self.agent_name {
            query = query.like(&format!("{}.name", source.agent_field), agent);
        }
        if let Some(status) = &self.status {
            query = query.eq(source.status_field, status);
        }
        if let Some(since) = &self.since {
            query = query.gte("sys_created_on", since);
        }
        query.order_by("sys_created_on", true).build()
    }
}

#[derive(Clone)]
pub struct LogManager {
    logger: Logger,
    validation: Validation,
    connections: Arc<ConnectionManager>,
}

impl LogManager {
    pub fn new(logger: Logger, connections: Arc<ConnectionManager>) -> Self {
        Self {
            logger: logger.child("logs"),
            validation: Validation::new(ErrorType::QueryError),
            connections,
        }
    }

    fn time_range(&self, args: &Value, default: Option<&str>) -> Result<Option<String>, ServiceNowError> {
        let token = self
            .validation
            .ensure_optional_string(args.get("timeRange"), "timeRange", true)?
            .or_else(|| default.map(str::to_string));
        token
            .map(|token| lower_bound(&token, Utc::now()))
            .transpose()
    }

    /// Encoded syslog query for the given arguments. Pure apart from the
    /// clock read for the time range.
    pub fn syslog_query(&self, args: &Value) -> Result<String, ServiceNowError> {
        let since = self
            .time_range(args, Some(DEFAULT_TIME_RANGE))?
            .unwrap_or_default();
        let mut query = EncodedQuery::new().gte("sys_created_on", &since);
        if let Some(level) = self.validation.ensure_enum(args.get("level"), "level", LEVELS)? {
            if let Some(code) = level_code(&level) {
                query = query.eq("level", code);
            }
        }
        if let Some(source) = self
            .validation
            .ensure_optional_string(args.get("source"), "source", true)?
        {
            query = query.like("source", &source);
        }
        if let Some(message) = self
            .validation
            .ensure_optional_string(args.get("message"), "message", true)?
        {
            query = query.like("message", &message);
        }
        if let Some(scope) = self
            .validation
            .ensure_optional_string(args.get("scope"), "scope", true)?
        {
            query = query.eq("sys_scope.scope", &scope);
        }
        Ok(query.order_by("sys_created_on", true).build())
    }

    pub async fn syslogs(&self, args: Value) -> Result<String, ServiceNowError> {
        let query = self.syslog_query(&args)?;
        let limit = self.validation.ensure_limit(
            args.get("limit"),
            limits::SYSLOG_DEFAULT_LIMIT,
            limits::SYSLOG_MAX_LIMIT,
        )?;
        let client = self.connections.get_active_client()?;
        let fields: Vec<String> = SYSLOG_FIELDS.iter().map(|f| f.to_string()).collect();
        let rows = client
            .query_table(tables::SYSLOG, Some(&query), &fields, limit)
            .await?;

        let mut lines = vec![format!("{} syslog entr(ies)", rows.len())];
        lines.push(format!("Query: {}", query));
        for row in &rows {
            let row = redact_record(row);
            let message = record_field(&row, "message").unwrap_or_default();
            lines.push(format!(
                "[{}] {} {}: {}",
                record_field(&row, "sys_created_on").unwrap_or_default(),
                level_label(&record_field(&row, "level").unwrap_or_default()),
                record_field(&row, "source").unwrap_or_else(|| "-".to_string()),
                truncate_chars(&single_line(&message), limits::LOG_MESSAGE_MAX_CHARS),
            ));
        }
        Ok(lines.join("\n"))
    }

    fn aia_filters(&self, args: &Value) -> Result<AiaFilters, ServiceNowError> {
        let execution_id = self
            .validation
            .ensure_optional_string(args.get("executionId"), "executionId", true)?
            .map(|id| self.validation.ensure_identifier(&id, "executionId"))
            .transpose()?;
        Ok(AiaFilters {
            execution_id,
            agent_name: self
                .validation
                .ensure_optional_string(args.get("agentName"), "agentName", true)?,
            status: self
                .validation
                .ensure_optional_string(args.get("status"), "status", true)?,
            since: self.time_range(args, None)?,
        })
    }

    pub async fn aia_logs(&self, args: Value) -> Result<String, ServiceNowError> {
        let filters = self.aia_filters(&args)?;
        let limit = self.validation.ensure_limit(
            args.get("limit"),
            limits::AIA_DEFAULT_LIMIT,
            limits::AIA_MAX_LIMIT,
        )?;
        let include_tool_calls = self
            .validation
            .ensure_optional_bool(args.get("includeToolCalls"), "includeToolCalls")?
            .unwrap_or(false);
        let client = self.connections.get_active_client()?;

        let probe = CandidateProbe::new(AIA_SOURCES.iter().map(|s| s.table));
        let outcome = probe
            .first_success(|table| {
                let client = client.clone();
                let filters = filters.clone();
                async move {
                    let source = aia_source(table);
                    let fields: Vec<String> = [
                        "sys_id",
                        "sys_created_on",
                        source.agent_field,
                        source.status_field,
                        source.summary_field,
                    ]
                    .iter()
                    .map(|f| f.to_string())
                    .collect();
                    client
                        .query_table(table, Some(&filters.encoded(&source)), &fields, limit)
                        .await
                }
            })
            .await
            .map_err(|failure| {
                failure
                    .into_error("No AI Agent execution table is readable on this instance")
                    .with_suggestion(
                        "AI Agents may not be installed, or the user lacks read access to sn_aia tables.",
                    )
            })?;
        let source = aia_source(&outcome.candidate);
        self.logger.debug(
            "aia source resolved",
            Some(&json!({"table": source.table, "attempted": outcome.attempted, "rows": outcome.value.len()})),
        );

        let mut lines = vec![format!(
            "{} AI Agent execution(s) from {}",
            outcome.value.len(),
            source.table
        )];
        if let Some(since) = &filters.since {
            lines.push(format!("Since: {}", since));
        }
        let mut tool_source: Option<ToolCallSource> = None;
        let mut tool_calls_unavailable = false;
        for row in &outcome.value {
            let row = redact_record(row);
            let sys_id = record_field(&row, "sys_id").unwrap_or_default();
            lines.push(String::new());
            lines.push(format!(
                "[{}] {} agent={} status={}",
                record_field(&row, "sys_created_on").unwrap_or_default(),
                sys_id,
                record_field(&row, source.agent_field).unwrap_or_else(|| "-".to_string()),
                record_field(&row, source.status_field).unwrap_or_else(|| "-".to_string()),
            ));
            if let Some(summary) = record_field(&row, source.summary_field) {
                lines.push(format!(
                    "  {}",
                    truncate_chars(&single_line(&summary), limits::LOG_MESSAGE_MAX_CHARS)
                ));
            }
            if !include_tool_calls || sys_id.is_empty() || tool_calls_unavailable {
                continue;
            }
            match self.tool_calls(&client, &sys_id, tool_source).await {
                Ok((resolved, calls)) => {
                    tool_source = Some(resolved);
                    if calls.is_empty() {
                        lines.push("  tool calls: none".to_string());
                    }
                    for call in calls {
                        let call = redact_record(&call);
                        lines.push(format!(
                            "  - {} [{}] {}",
                            record_field(&call, "tool").unwrap_or_else(|| "-".to_string()),
                            record_field(&call, "status").unwrap_or_else(|| "-".to_string()),
                            truncate_chars(
                                &single_line(&record_field(&call, "output").unwrap_or_default()),
                                limits::FIELD_VALUE_MAX_CHARS
                            ),
                        ));
                    }
                }
                Err(err) if err.error_type == ErrorType::TableNotAccessible => {
                    tool_calls_unavailable = true;
                    lines.push(format!("  tool calls unavailable: {}", err.message));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(lines.join("\n"))
    }

    /// Tool-call rows for one execution. Once a child table answers it is
    /// reused for the remaining executions.
    async fn tool_calls(
        &self,
        client: &Arc<ServiceNowClient>,
        execution_id: &str,
        known: Option<ToolCallSource>,
    ) -> Result<(ToolCallSource, Vec<Value>), ServiceNowError> {
        let fields: Vec<String> = ["sys_id", "sys_created_on", "tool", "status", "output"]
            .iter()
            .map(|f| f.to_string())
            .collect();
        let candidates: Vec<&str> = match known {
            Some(source) => vec![source.table],
            None => TOOL_CALL_SOURCES.iter().map(|s| s.table).collect(),
        };
        let probe = CandidateProbe::new(candidates);
        let outcome = probe
            .first_success(|table| {
                let client = client.clone();
                let fields = fields.clone();
                async move {
                    let source = tool_call_source(table);
                    let query = EncodedQuery::new()
                        .eq(source.parent_field, execution_id)
                        .order_by("sys_created_on", false)
                        .build();
                    client
                        .query_table(
                            table,
                            Some(&query),
                            &fields,
                            limits::AIA_TOOL_CALLS_PER_EXECUTION,
                        )
                        .await
                }
            })
            .await
            .map_err(|failure| failure.into_error("No tool-call table is readable"))?;
        Ok((tool_call_source(&outcome.candidate), outcome.value))
    }
}

fn aia_source(table: &str) -> AiaSource {
    AIA_SOURCES
        .iter()
        .copied()
        .find(|s| s.table == table)
        .unwrap_or(AIA_SOURCES[0])
}

fn tool_call_source(table: &str) -> ToolCallSource {
    TOOL_CALL_SOURCES
        .iter()
        .copied()
        .find(|s| s.table == table)
        .unwrap_or(TOOL_CALL_SOURCES[0])
}

#[async_trait::async_trait]
impl ToolHandler for LogManager {
    async fn handle(&self, tool: &str, args: Value) -> Result<String, ServiceNowError> {
        match tool {
            tools::SYSLOGS => self.syslogs(args).await,
            tools::AIA_LOGS => self.aia_logs(args).await,
            other => Err(ServiceNowError::unknown(format!(
                "Log tools cannot handle {}",
                other
            ))),
        }
    }
}
