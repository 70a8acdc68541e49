use crate::errors::ServiceNowError;
use crate::servicenow::auth::{AuthConfig, AuthType};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InstanceVersion {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct CurrentUser {
    pub sys_id: String,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectionSession {
    pub instance_url: String,
    pub auth_type: AuthType,
    pub auth_config: AuthConfig,
    pub access_token: Option<String>,
    pub user_id: String,
    pub user_name: String,
    pub user_roles: Vec<String>,
    pub instance_version: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl ConnectionSession {
    pub fn summary(&self, active: bool) -> SessionSummary {
        SessionSummary {
            instance_url: self.instance_url.clone(),
            auth_type: self.auth_type,
            user_name: self.user_name.clone(),
            user_id: self.user_id.clone(),
            roles: self.user_roles.clone(),
            version: self.instance_version.clone(),
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            active,
        }
    }
}

/// Credential-free view of a session.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSummary {
    pub instance_url: String,
    pub auth_type: AuthType,
    pub user_name: String,
    pub user_id: String,
    pub roles: Vec<String>,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceNowError>,
}

impl ConnectionResult {
    pub fn connected(session: SessionSummary) -> Self {
        Self {
            success: true,
            session: Some(session),
            error: None,
        }
    }

    pub fn failed(error: ServiceNowError) -> Self {
        Self {
            success: false,
            session: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub session_count: usize,
    pub sessions: Vec<SessionSummary>,
}
