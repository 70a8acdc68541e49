use serde::Serialize;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    ConnectionFailed,
    AuthenticationFailed,
    TokenExpired,
    InstanceUnavailable,
    InvalidInstance,
    AclDenied,
    RoleRequired,
    TableNotAccessible,
    ScriptTimeout,
    ScriptError,
    ScriptBlocked,
    QueryError,
    RateLimited,
    QuotaExceeded,
    DangerousOperation,
    SensitiveData,
    UnknownError,
}

impl ErrorType {
    pub const ALL: [ErrorType; 17] = [
        ErrorType::ConnectionFailed,
        ErrorType::AuthenticationFailed,
        ErrorType::TokenExpired,
        ErrorType::InstanceUnavailable,
        ErrorType::InvalidInstance,
        ErrorType::AclDenied,
        ErrorType::RoleRequired,
        ErrorType::TableNotAccessible,
        ErrorType::ScriptTimeout,
        ErrorType::ScriptError,
        ErrorType::ScriptBlocked,
        ErrorType::QueryError,
        ErrorType::RateLimited,
        ErrorType::QuotaExceeded,
        ErrorType::DangerousOperation,
        ErrorType::SensitiveData,
        ErrorType::UnknownError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::ConnectionFailed => "connection_failed",
            ErrorType::AuthenticationFailed => "authentication_failed",
            ErrorType::TokenExpired => "token_expired",
            ErrorType::InstanceUnavailable => "instance_unavailable",
            ErrorType::InvalidInstance => "invalid_instance",
            ErrorType::AclDenied => "acl_denied",
            ErrorType::RoleRequired => "role_required",
            ErrorType::TableNotAccessible => "table_not_accessible",
            ErrorType::ScriptTimeout => "script_timeout",
            ErrorType::ScriptError => "script_error",
            ErrorType::ScriptBlocked => "script_blocked",
            ErrorType::QueryError => "query_error",
            ErrorType::RateLimited => "rate_limited",
            ErrorType::QuotaExceeded => "quota_exceeded",
            ErrorType::DangerousOperation => "dangerous_operation",
            ErrorType::SensitiveData => "sensitive_data",
            ErrorType::UnknownError => "unknown_error",
        }
    }

    /// Types retried by the HTTP client unless the policy says otherwise.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorType::InstanceUnavailable | ErrorType::TokenExpired | ErrorType::RateLimited
        )
    }

    /// True when the failure means "this table or endpoint is not usable here",
    /// so a caller probing alternatives may move on to the next candidate.
    pub fn is_surface_miss(self) -> bool {
        matches!(
            self,
            ErrorType::TableNotAccessible
                | ErrorType::AclDenied
                | ErrorType::RoleRequired
                | ErrorType::QueryError
                | ErrorType::UnknownError
        )
    }

    pub fn default_suggestion(self) -> Option<&'static str> {
        match self {
            ErrorType::ConnectionFailed => {
                Some("Call connect with an instance and credentials before using this tool.")
            }
            ErrorType::AuthenticationFailed => Some(
                "Check the username/password, token or OAuth client credentials, or the profile in the credentials file.",
            ),
            ErrorType::TokenExpired => Some("Reconnect to obtain a fresh access token."),
            ErrorType::InstanceUnavailable => Some(
                "Verify the instance URL and that the instance is awake (developer instances hibernate).",
            ),
            ErrorType::InvalidInstance => {
                Some("Use a host such as dev12345.service-now.com or a full https:// URL.")
            }
            ErrorType::AclDenied => {
                Some("The connected user lacks read access; ask an admin for the required role.")
            }
            ErrorType::RoleRequired => Some("Connect with a user holding the required role."),
            ErrorType::TableNotAccessible => {
                Some("Check the table name; it may not exist on this instance version.")
            }
            ErrorType::ScriptTimeout => Some(
                "Increase the timeout (max 120s) or reduce the work the script performs.",
            ),
            ErrorType::ScriptError => Some("Fix the script and run it again."),
            ErrorType::ScriptBlocked => Some(
                "Rewrite the script without the blocked operations; retrying the same script will not help.",
            ),
            ErrorType::QueryError => Some("Check the encoded query syntax and field names."),
            ErrorType::RateLimited => Some("Wait a moment before sending more requests."),
            ErrorType::QuotaExceeded => Some("Reduce the limit or narrow the query."),
            ErrorType::DangerousOperation => {
                Some("Run the operation through the platform UI with proper review.")
            }
            ErrorType::SensitiveData => Some("Sensitive data cannot be returned by this tool."),
            ErrorType::UnknownError => None,
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only error shape surfaced to tool callers.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{error_type}: {message}")]
pub struct ServiceNowError {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ServiceNowError {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            details: None,
            suggestion: error_type.default_suggestion().map(str::to_string),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorType::ConnectionFailed, message)
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorType::AuthenticationFailed, message)
    }

    pub fn token_expired(message: impl Into<String>) -> Self {
        Self::new(ErrorType::TokenExpired, message)
    }

    pub fn instance_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorType::InstanceUnavailable, message)
    }

    pub fn invalid_instance(message: impl Into<String>) -> Self {
        Self::new(ErrorType::InvalidInstance, message)
    }

    pub fn acl_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorType::AclDenied, message)
    }

    pub fn table_not_accessible(message: impl Into<String>) -> Self {
        Self::new(ErrorType::TableNotAccessible, message)
    }

    pub fn script_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorType::ScriptTimeout, message)
    }

    pub fn script_error(message: impl Into<String>) -> Self {
        Self::new(ErrorType::ScriptError, message)
    }

    pub fn script_blocked(message: impl Into<String>) -> Self {
        Self::new(ErrorType::ScriptBlocked, message)
    }

    pub fn query_error(message: impl Into<String>) -> Self {
        Self::new(ErrorType::QueryError, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorType::RateLimited, message)
    }

    pub fn dangerous_operation(message: impl Into<String>) -> Self {
        Self::new(ErrorType::DangerousOperation, message)
    }

    pub fn sensitive_data(message: impl Into<String>) -> Self {
        Self::new(ErrorType::SensitiveData, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorType::UnknownError, message)
    }

    pub fn is_retryable_by_default(&self) -> bool {
        self.error_type.is_transient()
    }

    /// Plain-text rendering used in tool results.
    pub fn render(&self) -> String {
        let mut lines = vec![format!(
            "Error [{}]: {}",
            self.error_type.as_str(),
            self.message
        )];
        if let Some(details) = &self.details {
            if !details.is_null() {
                lines.push(format!("Details: {}", details));
            }
        }
        if let Some(suggestion) = &self.suggestion {
            lines.push(format!("Suggestion: {}", suggestion));
        }
        lines.join("\n")
    }
}

impl From<std::io::Error> for ServiceNowError {
    fn from(err: std::io::Error) -> Self {
        ServiceNowError::unknown(err.to_string())
    }
}
