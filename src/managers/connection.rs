use crate::constants::tools;
use crate::errors::{ErrorType, ServiceNowError};
use crate::services::logger::Logger;
use crate::services::tool_executor::ToolHandler;
use crate::services::validation::Validation;
use crate::servicenow::auth::AuthParams;
use crate::servicenow::connection::{ConnectParams, ConnectionManager};
use crate::servicenow::types::{ConnectionStatus, SessionSummary};
use serde_json::Value;
use std::sync::Arc;

/// connect / disconnect / select / status tools over the session registry.
#[derive(Clone)]
pub struct SessionToolManager {
    logger: Logger,
    validation: Validation,
    connections: Arc<ConnectionManager>,
}

impl SessionToolManager {
    pub fn new(logger: Logger, connections: Arc<ConnectionManager>) -> Self {
        Self {
            logger: logger.child("session"),
            validation: Validation::new(ErrorType::InvalidInstance),
            connections,
        }
    }

    fn optional(&self, args: &Value, key: &str) -> Result<Option<String>, ServiceNowError> {
        self.validation.ensure_optional_string(args.get(key), key, true)
    }

    fn connect_params(&self, args: &Value) -> Result<ConnectParams, ServiceNowError> {
        Ok(ConnectParams {
            instance: self.optional(args, "instance")?,
            auth: AuthParams {
                auth_type: self.optional(args, "authType")?,
                profile: self.optional(args, "profile")?,
                username: self.optional(args, "username")?,
                password: self
                    .validation
                    .ensure_optional_string(args.get("password"), "password", false)?,
                token: self
                    .validation
                    .ensure_optional_string(args.get("token"), "token", false)?,
                client_id: self.optional(args, "clientId")?,
                client_secret: self
                    .validation
                    .ensure_optional_string(args.get("clientSecret"), "clientSecret", false)?,
            },
        })
    }

    pub async fn connect(&self, args: Value) -> Result<String, ServiceNowError> {
        let params = self.connect_params(&args)?;
        let result = self.connections.connect(params).await;
        match (result.session, result.error) {
            (Some(session), _) if result.success => Ok(render_connected(&session)),
            (_, Some(err)) => Err(err),
            _ => Err(ServiceNowError::connection_failed("Connection failed")),
        }
    }

    pub fn disconnect(&self, args: Value) -> Result<String, ServiceNowError> {
        let instance = self.optional(&args, "instance")?;
        let target = match &instance {
            Some(raw) => Some(raw.clone()),
            None => self
                .connections
                .get_active_session()
                .map(|session| session.instance_url),
        };
        if self.connections.disconnect(instance.as_deref()) {
            let remaining = self.connections.get_all_sessions().len();
            Ok(format!(
                "Disconnected from {}. {} session(s) remain; no active session.",
                target.unwrap_or_else(|| "the active instance".to_string()),
                remaining
            ))
        } else {
            Ok(match instance {
                Some(raw) => format!("No session for {}; nothing to disconnect.", raw),
                None => "Not connected; nothing to disconnect.".to_string(),
            })
        }
    }

    pub fn select(&self, args: Value) -> Result<String, ServiceNowError> {
        let instance = self.validation.ensure_required_string(&args, "instance", true)?;
        let summary = self.connections.select(&instance)?;
        self.logger
            .info("active session switched", Some(&serde_json::json!({"instance": summary.instance_url})));
        Ok(format!(
            "Active session: {} as {}",
            summary.instance_url, summary.user_name
        ))
    }

    pub fn status(&self) -> String {
        render_status(&self.connections.get_status())
    }
}

fn render_connected(session: &SessionSummary) -> String {
    let mut lines = vec![
        format!("Connected to {}", session.instance_url),
        format!("User: {} ({})", session.user_name, session.user_id),
        format!("Auth: {}", session.auth_type),
        format!("Version: {}", session.version),
    ];
    if session.roles.is_empty() {
        lines.push("Roles: none visible".to_string());
    } else {
        lines.push(format!("Roles: {}", session.roles.join(", ")));
    }
    lines.join("\n")
}

pub fn render_status(status: &ConnectionStatus) -> String {
    let mut lines = Vec::new();
    match &status.active_instance {
        Some(instance) if status.connected => {
            lines.push(format!("Connected: {}", instance));
            if let Some(user) = &status.user {
                lines.push(format!("User: {}", user));
            }
            if let Some(version) = &status.version {
                lines.push(format!("Version: {}", version));
            }
        }
        _ => lines.push("Not connected. Call connect with an instance name or URL.".to_string()),
    }
    if !status.sessions.is_empty() {
        lines.push(format!("Sessions ({}):", status.session_count));
        for session in &status.sessions {
            lines.push(format!(
                "  {} {} as {} [{}] last used {}",
                if session.active { "*" } else { "-" },
                session.instance_url,
                session.user_name,
                session.auth_type,
                session.last_used_at.format("%Y-%m-%d %H:%M:%S UTC"),
            ));
        }
    }
    lines.join("\n")
}

#[async_trait::async_trait]
impl ToolHandler for SessionToolManager {
    async fn handle(&self, tool: &str, args: Value) -> Result<String, ServiceNowError> {
        self.logger.debug("handle", Some(&serde_json::json!({"tool": tool})));
        match tool {
            tools::CONNECT => self.connect(args).await,
            tools::DISCONNECT => self.disconnect(args),
            tools::SELECT => self.select(args),
            tools::STATUS => Ok(self.status()),
            other => Err(ServiceNowError::unknown(format!(
                "Session tools cannot handle {}",
                other
            ))),
        }
    }
}
