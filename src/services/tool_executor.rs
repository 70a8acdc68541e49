use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::errors::{McpError, ServiceNowError};
use crate::services::logger::Logger;
use crate::utils::redact::redact_text;
use crate::utils::suggest::suggest;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// `tool` is the canonical tool name, so one handler can serve several.
    async fn handle(&self, tool: &str, args: Value) -> Result<String, ServiceNowError>;
}

/// Text block returned to the caller; `is_error` marks a typed failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn to_content(&self) -> Value {
        json!({
            "content": [ { "type": "text", "text": self.text } ],
            "isError": self.is_error,
        })
    }
}

#[derive(Clone)]
pub struct ToolExecutor {
    logger: Logger,
    handlers: Arc<HashMap<String, Arc<dyn ToolHandler>>>,
    alias_map: HashMap<String, String>,
}

impl ToolExecutor {
    pub fn new(
        logger: Logger,
        handlers: HashMap<String, Arc<dyn ToolHandler>>,
        alias_map: HashMap<String, String>,
    ) -> Self {
        Self {
            logger: logger.child("tools"),
            handlers: Arc::new(handlers),
            alias_map,
        }
    }

    pub fn resolve_alias(&self, tool: &str) -> Option<String> {
        if self.handlers.contains_key(tool) {
            return Some(tool.to_string());
        }
        self.alias_map
            .get(tool)
            .filter(|target| self.handlers.contains_key(*target))
            .cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Unknown tools are protocol errors; handler failures become error
    /// results so the caller sees the typed message and suggestion.
    pub async fn execute(&self, tool: &str, args: Value) -> Result<ToolOutcome, McpError> {
        let Some(resolved) = self.resolve_alias(tool) else {
            let candidates: Vec<String> = self
                .handlers
                .keys()
                .cloned()
                .chain(self.alias_map.keys().cloned())
                .collect();
            return Err(McpError::unknown_tool(tool, &suggest(tool, &candidates, 4)));
        };
        let Some(handler) = self.handlers.get(&resolved) else {
            return Err(McpError::unknown_tool(tool, &[]));
        };

        let started = Instant::now();
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };
        let outcome = match handler.handle(&resolved, args).await {
            Ok(text) => ToolOutcome {
                text: redact_text(&text, usize::MAX, None),
                is_error: false,
            },
            Err(err) => {
                self.logger.warn(
                    "tool failed",
                    Some(&json!({
                        "tool": resolved,
                        "error_type": err.error_type.as_str(),
                        "message": err.message,
                    })),
                );
                ToolOutcome {
                    text: redact_text(&err.render(), usize::MAX, None),
                    is_error: true,
                }
            }
        };
        self.logger.debug(
            "tool finished",
            Some(&json!({
                "tool": resolved,
                "invoked_as": tool,
                "is_error": outcome.is_error,
                "duration_ms": started.elapsed().as_millis() as u64,
            })),
        );
        Ok(outcome)
    }
}
