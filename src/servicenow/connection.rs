use crate::config::ServerConfig;
use crate::errors::ServiceNowError;
use crate::services::credentials::CredentialStore;
use crate::services::logger::Logger;
use crate::servicenow::auth::{load_profile, resolve_auth_config, AuthParams};
use crate::servicenow::client::{normalize_instance_url, ServiceNowClient};
use crate::servicenow::retry::RetryPolicy;
use crate::servicenow::transport::HttpTransport;
use crate::servicenow::types::{
    ConnectionResult, ConnectionSession, ConnectionStatus, SessionSummary,
};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub instance: Option<String>,
    pub auth: AuthParams,
}

struct SessionEntry {
    session: ConnectionSession,
    client: Arc<ServiceNowClient>,
}

#[derive(Default)]
struct SessionRegistry {
    sessions: HashMap<String, SessionEntry>,
    active: Option<String>,
}

/// Owns every live session. At most one session exists per normalized
/// instance URL and at most one is active. The registry lock is never held
/// across an await.
pub struct ConnectionManager {
    logger: Logger,
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
    retry: RetryPolicy,
    timeout: Duration,
    registry: RwLock<SessionRegistry>,
}

impl ConnectionManager {
    pub fn new(
        logger: Logger,
        config: &ServerConfig,
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            logger: logger.child("connections"),
            transport,
            credentials,
            retry: config.retry.clone(),
            timeout: config.request_timeout,
            registry: RwLock::new(SessionRegistry::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionRegistry> {
        self.registry
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionRegistry> {
        self.registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Never fails past this boundary: every error lands in the result.
    pub async fn connect(&self, params: ConnectParams) -> ConnectionResult {
        match self.try_connect(params).await {
            Ok(summary) => ConnectionResult::connected(summary),
            Err(err) => {
                self.logger.warn(
                    "connect failed",
                    Some(&json!({"error_type": err.error_type.as_str(), "message": err.message})),
                );
                ConnectionResult::failed(err)
            }
        }
    }

    async fn try_connect(&self, params: ConnectParams) -> Result<SessionSummary, ServiceNowError> {
        let profile =
            load_profile(params.auth.profile.as_deref(), self.credentials.as_ref())?.unwrap_or_default();
        let raw_instance = params
            .instance
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| profile.instance.clone())
            .ok_or_else(|| {
                ServiceNowError::invalid_instance("Instance URL is required")
                    .with_suggestion("Pass instance (e.g. dev12345) or a profile that defines one.")
            })?;
        let instance_url = normalize_instance_url(&raw_instance)?;
        let auth_config = resolve_auth_config(&params.auth, &profile)?;

        let client = Arc::new(ServiceNowClient::new(
            self.logger.clone(),
            &instance_url,
            auth_config,
            self.transport.clone(),
            self.retry.clone(),
            self.timeout,
        )?);

        let version = client.test_connection().await?;
        let user = client.get_current_user().await?;

        let auth_config = client.auth_snapshot();
        let now = Utc::now();
        let session = ConnectionSession {
            instance_url: instance_url.clone(),
            auth_type: auth_config.auth_type(),
            access_token: auth_config.access_token().map(str::to_string),
            auth_config,
            user_id: user.sys_id.clone(),
            user_name: user.user_name.clone(),
            user_roles: user.roles.clone(),
            instance_version: version.version.clone(),
            created_at: now,
            last_used_at: now,
        };
        let summary = session.summary(true);

        let replaced = {
            let mut registry = self.write();
            let replaced = registry
                .sessions
                .insert(instance_url.clone(), SessionEntry { session, client })
                .is_some();
            registry.active = Some(instance_url.clone());
            replaced
        };
        self.logger.info(
            "connected",
            Some(&json!({
                "instance": instance_url,
                "user": summary.user_name,
                "version": summary.version,
                "replaced": replaced,
            })),
        );
        Ok(summary)
    }

    /// Removes the named session, or the active one when `instance` is None.
    pub fn disconnect(&self, instance: Option<&str>) -> bool {
        let mut registry = self.write();
        let key = match instance {
            Some(raw) => match normalize_instance_url(raw) {
                Ok(key) => key,
                Err(_) => return false,
            },
            None => match registry.active.clone() {
                Some(key) => key,
                None => return false,
            },
        };
        let removed = registry.sessions.remove(&key).is_some();
        if removed && registry.active.as_deref() == Some(key.as_str()) {
            registry.active = None;
        }
        drop(registry);
        if removed {
            self.logger.info("disconnected", Some(&json!({"instance": key})));
        }
        removed
    }

    pub fn select(&self, instance: &str) -> Result<SessionSummary, ServiceNowError> {
        let key = normalize_instance_url(instance)?;
        let mut registry = self.write();
        let Some(entry) = registry.sessions.get(&key) else {
            return Err(ServiceNowError::connection_failed(format!(
                "No session for {}",
                key
            )));
        };
        let summary = entry.session.summary(true);
        registry.active = Some(key);
        Ok(summary)
    }

    fn touch_client(&self, key: &str) -> Option<Arc<ServiceNowClient>> {
        let mut registry = self.write();
        let entry = registry.sessions.get_mut(key)?;
        entry.session.last_used_at = Utc::now();
        Some(entry.client.clone())
    }

    pub fn get_active_client(&self) -> Result<Arc<ServiceNowClient>, ServiceNowError> {
        let active = self.read().active.clone();
        active
            .and_then(|key| self.touch_client(&key))
            .ok_or_else(|| {
                ServiceNowError::connection_failed("Not connected to a ServiceNow instance")
                    .with_suggestion("Call connect first.")
            })
    }

    pub fn get_client(&self, instance: &str) -> Result<Arc<ServiceNowClient>, ServiceNowError> {
        let key = normalize_instance_url(instance)?;
        self.touch_client(&key).ok_or_else(|| {
            ServiceNowError::connection_failed(format!("No session for {}", key))
                .with_suggestion("Call connect first.")
        })
    }

    pub fn get_active_session(&self) -> Option<ConnectionSession> {
        let registry = self.read();
        let key = registry.active.as_ref()?;
        registry.sessions.get(key).map(|entry| entry.session.clone())
    }

    pub fn is_connected(&self) -> bool {
        let registry = self.read();
        registry
            .active
            .as_ref()
            .map(|key| registry.sessions.contains_key(key))
            .unwrap_or(false)
    }

    pub fn get_all_sessions(&self) -> Vec<SessionSummary> {
        let registry = self.read();
        let mut sessions: Vec<SessionSummary> = registry
            .sessions
            .iter()
            .map(|(key, entry)| entry.session.summary(registry.active.as_deref() == Some(key.as_str())))
            .collect();
        sessions.sort_by(|a, b| a.instance_url.cmp(&b.instance_url));
        sessions
    }

    pub fn get_status(&self) -> ConnectionStatus {
        let sessions = self.get_all_sessions();
        let active = sessions.iter().find(|s| s.active).cloned();
        ConnectionStatus {
            connected: active.is_some(),
            active_instance: active.as_ref().map(|s| s.instance_url.clone()),
            user: active.as_ref().map(|s| s.user_name.clone()),
            version: active.as_ref().map(|s| s.version.clone()),
            session_count: sessions.len(),
            sessions,
        }
    }
}
