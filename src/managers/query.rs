use crate::constants::{limits, redaction, tables, tools};
use crate::errors::{ErrorType, ServiceNowError};
use crate::services::logger::Logger;
use crate::services::tool_executor::ToolHandler;
use crate::services::validation::Validation;
use crate::servicenow::connection::ConnectionManager;
use crate::servicenow::fields::field_text;
use crate::utils::encoded_query::EncodedQuery;
use crate::utils::redact::{is_sensitive_field, redact_record};
use crate::utils::text::{single_line, truncate_chars};
use serde_json::{json, Value};
use std::sync::Arc;

const ORDER_DIRECTIONS: &[&str] = &["asc", "desc"];

/// Fields returned for well-known tables when the caller does not ask for any.
const DEFAULT_FIELDS: &[(&str, &[&str])] = &[
    (
        "incident",
        &["number", "short_description", "state", "priority", "assigned_to", "sys_updated_on"],
    ),
    (
        "problem",
        &["number", "short_description", "state", "priority", "assigned_to", "sys_updated_on"],
    ),
    (
        "change_request",
        &["number", "short_description", "state", "type", "risk", "start_date", "end_date"],
    ),
    (
        "sc_req_item",
        &["number", "short_description", "state", "cat_item", "requested_for"],
    ),
    ("task", &["number", "short_description", "state", "sys_class_name"]),
    ("sys_user", &["user_name", "name", "email", "active", "department"]),
    ("sys_user_group", &["name", "description", "manager", "active"]),
    ("cmdb_ci", &["name", "sys_class_name", "operational_status", "install_status"]),
    ("cmdb_ci_server", &["name", "ip_address", "os", "operational_status"]),
    ("kb_knowledge", &["number", "short_description", "workflow_state", "kb_knowledge_base"]),
    ("sys_script_include", &["name", "api_name", "active", "client_callable", "sys_updated_on"]),
    ("sys_script", &["name", "collection", "when", "active", "order"]),
    ("sys_update_set", &["name", "state", "application", "sys_created_by"]),
    ("sys_properties", &["name", "value", "type", "description"]),
    ("syslog", &["sys_created_on", "level", "source", "message"]),
];

pub fn default_fields(table: &str) -> Option<&'static [&'static str]> {
    DEFAULT_FIELDS
        .iter()
        .find(|(name, _)| *name == table)
        .map(|(_, fields)| *fields)
}

pub fn is_restricted_table(table: &str) -> bool {
    let normalized = table.trim().to_lowercase();
    tables::RESTRICTED.contains(&normalized.as_str())
}

/// Redacts sensitive columns, and for property rows also the value of any
/// property whose name looks like a secret.
pub fn redact_row(table: &str, row: &Value) -> Value {
    let mut redacted = redact_record(row);
    if table == tables::PROPERTIES {
        let secret_name = row
            .get("name")
            .and_then(field_text)
            .map(|name| is_sensitive_field(&name))
            .unwrap_or(false);
        if secret_name {
            if let Some(map) = redacted.as_object_mut() {
                if map.contains_key("value") {
                    map.insert("value".to_string(), Value::String(redaction::MARKER.to_string()));
                }
            }
        }
    }
    redacted
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub table: String,
    pub query: Option<String>,
    pub fields: Vec<String>,
    pub limit: usize,
}

#[derive(Clone)]
pub struct QueryManager {
    logger: Logger,
    validation: Validation,
    connections: Arc<ConnectionManager>,
}

impl QueryManager {
    pub fn new(logger: Logger, connections: Arc<ConnectionManager>) -> Self {
        Self {
            logger: logger.child("query"),
            validation: Validation::new(ErrorType::QueryError),
            connections,
        }
    }

    /// Validates the arguments and refuses restricted tables. Nothing here
    /// touches the network.
    pub fn build_request(&self, args: &Value) -> Result<QueryRequest, ServiceNowError> {
        let table = self
            .validation
            .ensure_required_string(args, "table", true)?
            .to_lowercase();
        if is_restricted_table(&table) {
            self.logger
                .warn("restricted table refused", Some(&json!({"table": table})));
            return Err(ServiceNowError::sensitive_data(format!(
                "Table {} holds credentials or role membership and cannot be queried",
                table
            ))
            .with_details(json!({"table": table}))
            .with_suggestion("Query sys_user or sys_user_group instead; role membership is not exposed."));
        }

        let raw_query = self
            .validation
            .ensure_optional_string(args.get("query"), "query", true)?;
        let order_by = self
            .validation
            .ensure_optional_string(args.get("orderBy"), "orderBy", true)?
            .map(|field| self.validation.ensure_identifier(&field, "orderBy"))
            .transpose()?;
        let descending = self
            .validation
            .ensure_enum(args.get("orderDirection"), "orderDirection", ORDER_DIRECTIONS)?
            .map(|dir| dir == "desc")
            .unwrap_or(false);

        let mut encoded = EncodedQuery::new().raw(raw_query.as_deref());
        if let Some(field) = &order_by {
            encoded = encoded.order_by(field, descending);
        }
        let query = if encoded.is_empty() {
            None
        } else {
            Some(encoded.build())
        };

        let mut fields = self.validation.ensure_string_list(args.get("fields"), "fields")?;
        if fields.is_empty() {
            if let Some(defaults) = default_fields(&table) {
                fields = defaults.iter().map(|f| f.to_string()).collect();
            }
        }
        if !fields.is_empty() && !fields.iter().any(|f| f == "sys_id") {
            fields.insert(0, "sys_id".to_string());
        }

        let limit = self.validation.ensure_limit(
            args.get("limit"),
            limits::QUERY_DEFAULT_LIMIT,
            limits::QUERY_MAX_LIMIT,
        )?;

        Ok(QueryRequest {
            table,
            query,
            fields,
            limit,
        })
    }

    pub async fn query(&self, args: Value) -> Result<String, ServiceNowError> {
        let request = self.build_request(&args)?;
        let client = self.connections.get_active_client()?;
        let rows = client
            .query_table(
                &request.table,
                request.query.as_deref(),
                &request.fields,
                request.limit,
            )
            .await?;
        self.logger.debug(
            "query finished",
            Some(&json!({"table": request.table, "rows": rows.len()})),
        );
        let redacted: Vec<Value> = rows.iter().map(|row| redact_row(&request.table, row)).collect();
        Ok(render_rows(&request, &redacted))
    }
}

fn ordered_keys(request: &QueryRequest, row: &Value) -> Vec<String> {
    if !request.fields.is_empty() {
        return request.fields.clone();
    }
    let Some(map) = row.as_object() else {
        return Vec::new();
    };
    let mut keys: Vec<String> = map.keys().filter(|k| *k != "sys_id").cloned().collect();
    keys.sort();
    if map.contains_key("sys_id") {
        keys.insert(0, "sys_id".to_string());
    }
    keys
}

fn render_rows(request: &QueryRequest, rows: &[Value]) -> String {
    let mut lines = vec![format!(
        "Found {} record(s) in {} (limit {})",
        rows.len(),
        request.table,
        request.limit
    )];
    if let Some(query) = &request.query {
        lines.push(format!("Query: {}", query));
    }
    if rows.is_empty() {
        return lines.join("\n");
    }
    for (index, row) in rows.iter().enumerate() {
        lines.push(String::new());
        lines.push(format!("[{}]", index + 1));
        for key in ordered_keys(request, row) {
            let value = row
                .get(&key)
                .and_then(field_text)
                .unwrap_or_default();
            lines.push(format!(
                "  {}: {}",
                key,
                truncate_chars(&single_line(&value), limits::FIELD_VALUE_MAX_CHARS)
            ));
        }
    }
    lines.join("\n")
}

#[async_trait::async_trait]
impl ToolHandler for QueryManager {
    async fn handle(&self, tool: &str, args: Value) -> Result<String, ServiceNowError> {
        match tool {
            tools::QUERY => self.query(args).await,
            other => Err(ServiceNowError::unknown(format!(
                "Query tools cannot handle {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restricted_tables_match_case_insensitively() {
        assert!(is_restricted_table("SYS_USER_HAS_ROLE"));
        assert!(is_restricted_table(" oauth_entity "));
        assert!(!is_restricted_table("sys_user"));
    }

    #[test]
    fn property_values_with_secret_names_are_masked() {
        let row = json!({"name": "x.integration.password", "value": "s3cret", "sys_id": "1"});
        let redacted = redact_row("sys_properties", &row);
        assert_eq!(redacted["value"], redaction::MARKER);
        assert_eq!(redacted["sys_id"], "1");

        let plain = json!({"name": "glide.buildtag", "value": "glide-x"});
        assert_eq!(redact_row("sys_properties", &plain)["value"], "glide-x");
    }

    #[test]
    fn rendering_lists_sys_id_first_for_unfiltered_rows() {
        let request = QueryRequest {
            table: "incident".to_string(),
            query: None,
            fields: Vec::new(),
            limit: 20,
        };
        let text = render_rows(&request, &[json!({"number": "INC1", "sys_id": "abc"})]);
        let sys_id_at = text.find("sys_id: abc").expect("sys_id");
        let number_at = text.find("number: INC1").expect("number");
        assert!(sys_id_at < number_at);
    }
}
