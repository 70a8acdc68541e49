use crate::errors::ServiceNowError;
use crate::services::credentials::{CredentialProfile, CredentialStore};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Basic,
    Token,
    OAuth,
}

impl AuthType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthType::Basic => "basic",
            AuthType::Token => "token",
            AuthType::OAuth => "oauth",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = ServiceNowError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "basic" => Ok(AuthType::Basic),
            "token" | "bearer" => Ok(AuthType::Token),
            "oauth" | "oauth2" => Ok(AuthType::OAuth),
            other => Err(ServiceNowError::authentication_failed(format!(
                "Unknown auth type: {}",
                other
            ))
            .with_suggestion("Use one of: basic, token, oauth.")),
        }
    }
}

#[derive(Clone, PartialEq)]
pub enum AuthConfig {
    Basic {
        username: String,
        password: String,
    },
    Token {
        token: String,
    },
    OAuth {
        client_id: String,
        client_secret: String,
        access_token: Option<String>,
        refresh_token: Option<String>,
        expiry: Option<DateTime<Utc>>,
    },
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthConfig::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            AuthConfig::Token { .. } => f.debug_struct("Token").field("token", &"[REDACTED]").finish(),
            AuthConfig::OAuth {
                client_id,
                access_token,
                expiry,
                ..
            } => f
                .debug_struct("OAuth")
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .field("has_access_token", &access_token.is_some())
                .field("expiry", expiry)
                .finish(),
        }
    }
}

impl AuthConfig {
    pub fn auth_type(&self) -> AuthType {
        match self {
            AuthConfig::Basic { .. } => AuthType::Basic,
            AuthConfig::Token { .. } => AuthType::Token,
            AuthConfig::OAuth { .. } => AuthType::OAuth,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            AuthConfig::Basic { username, .. } => Some(username),
            _ => None,
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        match self {
            AuthConfig::Token { token } => Some(token),
            AuthConfig::OAuth { access_token, .. } => access_token.as_deref(),
            AuthConfig::Basic { .. } => None,
        }
    }

    pub fn refresh_token(&self) -> Option<&str> {
        match self {
            AuthConfig::OAuth { refresh_token, .. } => refresh_token.as_deref(),
            _ => None,
        }
    }

    /// Value for the `Authorization` header. An OAuth config without a usable
    /// access token is a `token_expired` failure.
    pub fn authorization_header(&self) -> Result<String, ServiceNowError> {
        match self {
            AuthConfig::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                Ok(format!("Basic {}", encoded))
            }
            AuthConfig::Token { token } => Ok(bearer(token)),
            AuthConfig::OAuth {
                access_token,
                expiry,
                ..
            } => {
                let Some(token) = access_token.as_deref().filter(|t| !t.is_empty()) else {
                    return Err(ServiceNowError::token_expired("OAuth access token is missing"));
                };
                if let Some(expiry) = expiry {
                    if *expiry <= Utc::now() {
                        return Err(ServiceNowError::token_expired("OAuth access token has expired")
                            .with_details(serde_json::json!({"expired_at": expiry.to_rfc3339()})));
                    }
                }
                Ok(bearer(token))
            }
        }
    }

    pub fn set_oauth_token(
        &mut self,
        token: String,
        refresh: Option<String>,
        new_expiry: Option<DateTime<Utc>>,
    ) {
        if let AuthConfig::OAuth {
            access_token,
            refresh_token,
            expiry,
            ..
        } = self
        {
            *access_token = Some(token);
            if refresh.is_some() {
                *refresh_token = refresh;
            }
            *expiry = new_expiry;
        }
    }
}

fn bearer(token: &str) -> String {
    if token.to_lowercase().starts_with("bearer ") {
        token.to_string()
    } else {
        format!("Bearer {}", token)
    }
}

/// Raw credential inputs from a connect call.
#[derive(Debug, Clone, Default)]
pub struct AuthParams {
    pub auth_type: Option<String>,
    pub profile: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Secrets keep their exact bytes; surrounding spaces can be part of a
/// password. Blank values still count as absent.
fn secret(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Loads the named profile, if any. An unknown profile name is an error, not
/// an empty default.
pub fn load_profile(
    profile: Option<&str>,
    store: &dyn CredentialStore,
) -> Result<Option<CredentialProfile>, ServiceNowError> {
    let Some(name) = profile.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    match store.lookup(name)? {
        Some(found) => Ok(Some(found)),
        None => Err(ServiceNowError::authentication_failed(format!(
            "Credential profile '{}' not found",
            name
        ))
        .with_suggestion("Check the profile name in the credentials file (SERVICENOW_CREDENTIALS_PATH).")),
    }
}

pub fn build_auth_config(
    params: &AuthParams,
    store: &dyn CredentialStore,
) -> Result<AuthConfig, ServiceNowError> {
    let profile = load_profile(params.profile.as_deref(), store)?.unwrap_or_default();
    resolve_auth_config(params, &profile)
}

pub fn resolve_auth_config(
    params: &AuthParams,
    profile: &CredentialProfile,
) -> Result<AuthConfig, ServiceNowError> {
    let pick = |explicit: &Option<String>, fallback: &Option<String>| {
        non_empty(explicit.clone()).or_else(|| non_empty(fallback.clone()))
    };
    let pick_secret = |explicit: &Option<String>, fallback: &Option<String>| {
        secret(explicit.clone()).or_else(|| secret(fallback.clone()))
    };
    let username = pick(&params.username, &profile.username);
    let password = pick_secret(&params.password, &profile.password);
    let token = pick_secret(&params.token, &profile.token);
    let client_id = pick(&params.client_id, &profile.client_id);
    let client_secret = pick_secret(&params.client_secret, &profile.client_secret);

    let requested = match pick(&params.auth_type, &profile.auth_type) {
        Some(raw) => Some(raw.parse::<AuthType>()?),
        None => None,
    };
    let auth_type = match requested {
        Some(kind) => kind,
        None if token.is_some() => AuthType::Token,
        None if client_id.is_some() && client_secret.is_some() => AuthType::OAuth,
        None if username.is_some() && password.is_some() => AuthType::Basic,
        None => {
            return Err(ServiceNowError::authentication_failed(
                "No credentials supplied",
            )
            .with_suggestion(
                "Pass username+password, a token, clientId+clientSecret, or a credential profile.",
            ))
        }
    };

    match auth_type {
        AuthType::Basic => match (username, password) {
            (Some(username), Some(password)) => Ok(AuthConfig::Basic { username, password }),
            _ => Err(ServiceNowError::authentication_failed(
                "Basic auth requires username and password",
            )),
        },
        AuthType::Token => match token {
            Some(token) => Ok(AuthConfig::Token { token }),
            None => Err(ServiceNowError::authentication_failed(
                "Token auth requires a token",
            )),
        },
        AuthType::OAuth => match (client_id, client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(AuthConfig::OAuth {
                client_id,
                client_secret,
                access_token: token,
                refresh_token: None,
                expiry: None,
            }),
            _ => Err(ServiceNowError::authentication_failed(
                "OAuth requires clientId and clientSecret",
            )),
        },
    }
}
