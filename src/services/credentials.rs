use crate::errors::ServiceNowError;
use crate::services::logger::Logger;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One named entry of the credentials file. Every field is optional; explicit
/// connect arguments override whatever the profile provides.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialProfile {
    #[serde(default, alias = "instance_url", alias = "instanceUrl")]
    pub instance: Option<String>,
    #[serde(default, alias = "auth_type")]
    pub auth_type: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, alias = "client_id")]
    pub client_id: Option<String>,
    #[serde(default, alias = "client_secret")]
    pub client_secret: Option<String>,
}

pub trait CredentialStore: Send + Sync {
    fn lookup(&self, profile: &str) -> Result<Option<CredentialProfile>, ServiceNowError>;
}

/// Profiles stored as a JSON object keyed by profile name. The file is re-read
/// on every lookup so edits apply without a restart.
pub struct FileCredentialStore {
    path: PathBuf,
    logger: Logger,
}

impl FileCredentialStore {
    pub fn new(logger: Logger, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            logger: logger.child("credentials"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, CredentialProfile>, ServiceNowError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.logger.debug(
                    "credentials file not found",
                    Some(&serde_json::json!({"path": self.path.display().to_string()})),
                );
                return Ok(HashMap::new());
            }
            Err(err) => {
                return Err(ServiceNowError::authentication_failed(format!(
                    "Failed to read credentials file: {}",
                    err
                ))
                .with_details(serde_json::json!({"path": self.path.display().to_string()})));
            }
        };
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        let parsed: Value = serde_json::from_str(&raw).map_err(|err| {
            ServiceNowError::authentication_failed(format!(
                "Credentials file is not valid JSON: {}",
                err
            ))
            .with_details(serde_json::json!({"path": self.path.display().to_string()}))
        })?;
        let profiles = parsed
            .get("profiles")
            .cloned()
            .unwrap_or(parsed);
        serde_json::from_value(profiles).map_err(|err| {
            ServiceNowError::authentication_failed(format!(
                "Credentials file has an unexpected shape: {}",
                err
            ))
            .with_suggestion("Use an object of profile name → {instance, authType, username, password, token, clientId, clientSecret}.")
        })
    }
}

impl CredentialStore for FileCredentialStore {
    fn lookup(&self, profile: &str) -> Result<Option<CredentialProfile>, ServiceNowError> {
        let mut profiles = self.load()?;
        Ok(profiles.remove(profile.trim()))
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryCredentialStore {
    profiles: HashMap<String, CredentialProfile>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, name: &str, profile: CredentialProfile) -> Self {
        self.profiles.insert(name.to_string(), profile);
        self
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn lookup(&self, profile: &str) -> Result<Option<CredentialProfile>, ServiceNowError> {
        Ok(self.profiles.get(profile.trim()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_file(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("snow-creds-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).expect("write creds");
        path
    }

    #[test]
    fn file_store_reads_camel_and_snake_case() {
        let path = tmp_file(
            r#"{
                "dev": {"instance": "dev1", "authType": "basic", "username": "admin", "password": "pw"},
                "oauth": {"auth_type": "oauth", "client_id": "cid", "client_secret": "cs"}
            }"#,
        );
        let store = FileCredentialStore::new(Logger::new("test"), &path);
        let dev = store.lookup("dev").expect("lookup").expect("profile");
        assert_eq!(dev.instance.as_deref(), Some("dev1"));
        assert_eq!(dev.username.as_deref(), Some("admin"));
        let oauth = store.lookup("oauth").expect("lookup").expect("profile");
        assert_eq!(oauth.client_id.as_deref(), Some("cid"));
        assert!(store.lookup("missing").expect("lookup").is_none());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_yields_no_profiles() {
        let path = std::env::temp_dir().join(format!("snow-missing-{}.json", uuid::Uuid::new_v4()));
        let store = FileCredentialStore::new(Logger::new("test"), path);
        assert!(store.lookup("dev").expect("lookup").is_none());
    }

    #[test]
    fn malformed_file_is_an_auth_error() {
        let path = tmp_file("{not json");
        let store = FileCredentialStore::new(Logger::new("test"), &path);
        let err = store.lookup("dev").expect_err("malformed");
        assert_eq!(err.error_type, crate::errors::ErrorType::AuthenticationFailed);
        let _ = std::fs::remove_file(path);
    }
}
