use crate::errors::{ErrorCode, McpError};
use crate::mcp::aliases::{canonical_tool_name, BUILTIN_TOOL_ALIASES};
use crate::utils::suggest::suggest;
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

// Checked by the catalog tests; a broken file yields an empty catalog.
static TOOL_CATALOG: Lazy<Vec<ToolDef>> = Lazy::new(|| {
    let raw = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tool_catalog.json"));
    serde_json::from_str(raw).unwrap_or_default()
});

static TOOL_MAP: Lazy<HashMap<String, ToolDef>> = Lazy::new(|| {
    TOOL_CATALOG
        .iter()
        .cloned()
        .map(|tool| (tool.name.clone(), tool))
        .collect()
});

static TOOL_VALIDATORS: Lazy<HashMap<String, JSONSchema>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for tool in TOOL_CATALOG.iter() {
        if let Ok(schema) = JSONSchema::compile(&tool.input_schema) {
            map.insert(tool.name.clone(), schema);
        }
    }
    map
});

pub fn tool_catalog() -> &'static Vec<ToolDef> {
    &TOOL_CATALOG
}

pub fn tool_by_name(name: &str) -> Option<&'static ToolDef> {
    TOOL_MAP.get(canonical_tool_name(name))
}

/// Schema check before dispatch. Unknown tools pass through so the executor
/// can report them with suggestions.
pub fn validate_tool_args(tool_name: &str, args: &Value) -> Result<(), McpError> {
    let canonical = canonical_tool_name(tool_name);
    let (Some(tool), Some(schema)) = (TOOL_MAP.get(canonical), TOOL_VALIDATORS.get(canonical)) else {
        return Ok(());
    };
    if let Err(errors) = schema.validate(args) {
        let message = format_schema_errors(canonical, args, errors, &tool.input_schema);
        return Err(McpError::new(ErrorCode::InvalidParams, message));
    }
    Ok(())
}

fn format_schema_errors(
    tool_name: &str,
    args: &Value,
    errors: jsonschema::ErrorIterator,
    schema: &Value,
) -> String {
    let mut rendered = Vec::new();
    let mut did_you_means = Vec::new();

    for err in errors.take(10) {
        let instance_path = if err.instance_path.to_string().is_empty() {
            "(root)".to_string()
        } else {
            err.instance_path.to_string()
        };
        match &err.kind {
            jsonschema::error::ValidationErrorKind::AdditionalProperties { unexpected } => {
                let props: Vec<String> = schema_parent_at(schema, &err.schema_path.to_string())
                    .and_then(|parent| {
                        parent
                            .get("properties")
                            .and_then(|v| v.as_object())
                            .map(|map| map.keys().cloned().collect())
                    })
                    .unwrap_or_default();
                for unknown in unexpected {
                    rendered.push(format!("{}: unknown field '{}'", instance_path, unknown));
                    let suggestions = suggest(unknown, &props, 3);
                    if !suggestions.is_empty() {
                        did_you_means.push(format!("'{}' -> {}", unknown, suggestions.join(", ")));
                    }
                }
            }
            jsonschema::error::ValidationErrorKind::Enum { options } => {
                let allowed: Vec<String> = options
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                            .collect()
                    })
                    .unwrap_or_default();
                rendered.push(format!("{}: expected one of {}", instance_path, allowed.join(", ")));
                let received = schema_node_at(args, &err.instance_path.to_string());
                let suggestions = suggest(received.as_str().unwrap_or(""), &allowed, 2);
                if !suggestions.is_empty() {
                    did_you_means.push(format!("{} -> {}", instance_path, suggestions.join(", ")));
                }
            }
            jsonschema::error::ValidationErrorKind::Required { property } => {
                let prop = property
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| property.to_string());
                rendered.push(format!("{}: missing required field '{}'", instance_path, prop));
            }
            jsonschema::error::ValidationErrorKind::Type { kind } => {
                rendered.push(format!("{}: expected {}", instance_path, format_type_kind(kind)));
            }
            _ => rendered.push(format!("{}: {}", instance_path, err)),
        }
    }

    let mut lines = vec![format!("Invalid arguments for {}", tool_name)];
    lines.extend(rendered.iter().map(|line| format!("- {}", line)));
    if !did_you_means.is_empty() {
        lines.push(format!("Did you mean: {}", did_you_means.join(" | ")));
    }
    lines.join("\n")
}

fn format_type_kind(kind: &jsonschema::error::TypeKind) -> String {
    match kind {
        jsonschema::error::TypeKind::Single(primitive) => primitive.to_string(),
        jsonschema::error::TypeKind::Multiple(types) => {
            let list: Vec<String> = (*types).into_iter().map(|t| t.to_string()).collect();
            if list.is_empty() {
                "unknown".to_string()
            } else {
                list.join(" | ")
            }
        }
    }
}

/// Schema object that owns the keyword at `schema_path`.
fn schema_parent_at<'a>(schema: &'a Value, schema_path: &str) -> Option<&'a Value> {
    let mut current = schema;
    let segments: Vec<&str> = schema_path.split('/').filter(|s| !s.is_empty()).collect();
    let parent_len = segments.len().saturating_sub(1);
    for segment in segments.into_iter().take(parent_len) {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn schema_node_at<'a>(root: &'a Value, instance_path: &str) -> &'a Value {
    let mut current = root;
    for segment in instance_path.split('/').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(obj) => obj.get(segment).unwrap_or(&Value::Null),
            Value::Array(arr) => segment
                .parse::<usize>()
                .ok()
                .and_then(|idx| arr.get(idx))
                .unwrap_or(&Value::Null),
            _ => &Value::Null,
        };
    }
    current
}

/// Catalog tools followed by one entry per short alias.
pub fn list_tools() -> Vec<ToolDef> {
    let mut tools: Vec<ToolDef> = TOOL_CATALOG.clone();
    let mut names: HashSet<String> = tools.iter().map(|tool| tool.name.clone()).collect();
    for (alias, target) in BUILTIN_TOOL_ALIASES {
        if names.contains(*alias) {
            continue;
        }
        let Some(target_tool) = TOOL_MAP.get(*target) else {
            continue;
        };
        tools.push(ToolDef {
            name: (*alias).to_string(),
            description: format!("Alias for {}.", target),
            input_schema: target_tool.input_schema.clone(),
        });
        names.insert((*alias).to_string());
    }
    tools
}
