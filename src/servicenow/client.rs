use crate::constants::{limits, network, properties, tables};
use crate::errors::{ErrorType, ServiceNowError};
use crate::services::logger::Logger;
use crate::servicenow::auth::AuthConfig;
use crate::servicenow::fields::record_field;
use crate::servicenow::retry::RetryPolicy;
use crate::servicenow::transport::{
    HttpRequest, HttpResponse, HttpTransport, RequestBody, TransportError,
};
use crate::servicenow::types::{CurrentUser, InstanceVersion};
use chrono::{Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::Url;

static TABLE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("table name regex"));

static BUILD_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"glide-([a-z]+)-(\d{2}-\d{2}-\d{4})(?:__patch(\d+))?").expect("build tag regex")
});

/// Canonical `https://host` form of an instance reference. Bare names such as
/// `dev12345` expand to the `service-now.com` domain. Applying it twice gives
/// the same result.
pub fn normalize_instance_url(raw: &str) -> Result<String, ServiceNowError> {
    let mut value = raw.trim().to_lowercase();
    if value.is_empty() {
        return Err(ServiceNowError::invalid_instance("Instance URL is required"));
    }
    for scheme in ["https://", "http://"] {
        if let Some(rest) = value.strip_prefix(scheme) {
            value = rest.to_string();
            break;
        }
    }
    let value = value.trim_end_matches('/');
    if value.is_empty() {
        return Err(ServiceNowError::invalid_instance(format!(
            "Invalid instance URL: {}",
            raw.trim()
        )));
    }
    let host = if value.contains('.') || value.contains(':') || value.contains('/') {
        value.to_string()
    } else {
        format!("{}{}", value, network::INSTANCE_DOMAIN_SUFFIX)
    };
    let candidate = format!("https://{}", host);
    let parsed = Url::parse(&candidate).map_err(|_| {
        ServiceNowError::invalid_instance(format!("Invalid instance URL: {}", raw.trim()))
            .with_details(json!({"instance": raw.trim()}))
    })?;
    if parsed.host_str().map(str::is_empty).unwrap_or(true)
        || parsed.query().is_some()
        || parsed.fragment().is_some()
        || !parsed.username().is_empty()
    {
        return Err(ServiceNowError::invalid_instance(format!(
            "Invalid instance URL: {}",
            raw.trim()
        )));
    }
    Ok(candidate)
}

pub fn classify_status(status: u16) -> ErrorType {
    match status {
        401 => ErrorType::AuthenticationFailed,
        403 => ErrorType::AclDenied,
        404 => ErrorType::TableNotAccessible,
        429 => ErrorType::RateLimited,
        500..=599 => ErrorType::InstanceUnavailable,
        _ => ErrorType::UnknownError,
    }
}

fn error_message_from_body(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let error = parsed.get("error")?;
    if let Some(text) = error.as_str() {
        return Some(text.to_string());
    }
    let message = error.get("message").and_then(|v| v.as_str()).unwrap_or("");
    let detail = error.get("detail").and_then(|v| v.as_str()).unwrap_or("");
    match (message.is_empty(), detail.is_empty()) {
        (true, true) => None,
        (false, true) => Some(message.to_string()),
        (true, false) => Some(detail.to_string()),
        (false, false) => Some(format!("{}: {}", message, detail)),
    }
}

fn error_from_response(response: &HttpResponse, method: &Method, path: &str) -> ServiceNowError {
    let error_type = classify_status(response.status);
    let reason = error_message_from_body(&response.body).unwrap_or_else(|| {
        if response.status_text.is_empty() {
            format!("HTTP {}", response.status)
        } else {
            response.status_text.clone()
        }
    });
    ServiceNowError::new(
        error_type,
        format!("{} {} failed ({}): {}", method, path, response.status, reason),
    )
    .with_details(json!({"status": response.status, "path": path}))
}

fn error_from_transport(err: TransportError, timeout: Duration, path: &str) -> ServiceNowError {
    match err {
        TransportError::Timeout => ServiceNowError::instance_unavailable(format!(
            "Request to {} timed out after {}ms",
            path,
            timeout.as_millis()
        )),
        TransportError::Connect(reason) | TransportError::Other(reason) => {
            ServiceNowError::instance_unavailable(format!("Request to {} failed: {}", path, reason))
        }
    }
}

pub fn parse_build_tag(tag: &str) -> String {
    let Some(caps) = BUILD_TAG_RE.captures(tag) else {
        return tag.to_string();
    };
    let family = &caps[1];
    let mut chars = family.chars();
    let family = match chars.next() {
        Some(first) => format!("{}{}", first.to_uppercase(), chars.as_str()),
        None => String::new(),
    };
    match caps.get(3) {
        Some(patch) => format!("{} {} patch{}", family, &caps[2], patch.as_str()),
        None => format!("{} {}", family, &caps[2]),
    }
}

pub fn validate_table_name(table: &str) -> Result<String, ServiceNowError> {
    let trimmed = table.trim().to_lowercase();
    if !TABLE_NAME_RE.is_match(&trimmed) {
        return Err(ServiceNowError::query_error(format!(
            "Invalid table name: {}",
            table.trim()
        ))
        .with_suggestion("Table names are lowercase identifiers such as incident or sys_user."));
    }
    Ok(trimmed)
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post(body: Value) -> Self {
        Self::new(Method::POST).with_json(body)
    }

    pub fn patch(body: Value) -> Self {
        Self::new(Method::PATCH).with_json(body)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub struct ServiceNowClient {
    instance_url: String,
    auth: RwLock<AuthConfig>,
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
    timeout: Duration,
    logger: Logger,
}

impl ServiceNowClient {
    pub fn new(
        logger: Logger,
        instance: &str,
        auth: AuthConfig,
        transport: Arc<dyn HttpTransport>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, ServiceNowError> {
        let instance_url = normalize_instance_url(instance)?;
        Ok(Self {
            logger: logger.child("client"),
            instance_url,
            auth: RwLock::new(auth),
            transport,
            retry,
            timeout,
        })
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn auth_snapshot(&self) -> AuthConfig {
        match self.auth.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store_auth(&self, auth: AuthConfig) {
        match self.auth.write() {
            Ok(mut guard) => *guard = auth,
            Err(poisoned) => *poisoned.into_inner() = auth,
        }
    }

    async fn authorization(&self) -> Result<String, ServiceNowError> {
        let auth = self.auth_snapshot();
        match auth.authorization_header() {
            Ok(header) => Ok(header),
            Err(err) if err.error_type == ErrorType::TokenExpired => {
                if matches!(auth, AuthConfig::OAuth { .. }) {
                    self.fetch_oauth_token().await?;
                    self.auth_snapshot().authorization_header()
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Obtains an OAuth access token from `/oauth_token.do`, using the refresh
    /// token when one is held and the client-credentials grant otherwise.
    pub async fn fetch_oauth_token(&self) -> Result<(), ServiceNowError> {
        let auth = self.auth_snapshot();
        let AuthConfig::OAuth {
            client_id,
            client_secret,
            refresh_token,
            ..
        } = &auth
        else {
            return Ok(());
        };
        let mut form = vec![
            ("client_id".to_string(), client_id.clone()),
            ("client_secret".to_string(), client_secret.clone()),
        ];
        match refresh_token {
            Some(refresh) => {
                form.push(("grant_type".to_string(), "refresh_token".to_string()));
                form.push(("refresh_token".to_string(), refresh.clone()));
            }
            None => form.push(("grant_type".to_string(), "client_credentials".to_string())),
        }
        let path = "/oauth_token.do";
        let request = HttpRequest {
            method: Method::POST,
            url: format!("{}{}", self.instance_url, path),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            body: Some(RequestBody::Form(form)),
            timeout: self.timeout,
        };
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|err| error_from_transport(err, self.timeout, path))?;
        if !response.is_success() {
            let err = error_from_response(&response, &Method::POST, path);
            let err = if matches!(response.status, 400 | 401) {
                ServiceNowError::authentication_failed(format!(
                    "OAuth token request rejected: {}",
                    err.message
                ))
            } else {
                err
            };
            return Err(err);
        }
        let body = response.json().unwrap_or(Value::Null);
        let Some(token) = body.get("access_token").and_then(|v| v.as_str()) else {
            return Err(ServiceNowError::authentication_failed(
                "OAuth token response did not include an access_token",
            ));
        };
        let refresh = body
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let expiry = body
            .get("expires_in")
            .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .map(|secs| Utc::now() + ChronoDuration::seconds(secs));
        let mut updated = auth.clone();
        updated.set_oauth_token(token.to_string(), refresh, expiry);
        self.store_auth(updated);
        self.logger.info("oauth token acquired", None);
        Ok(())
    }

    /// Single attempt. Non-2xx statuses and transport failures are translated
    /// into typed errors here and nowhere else.
    pub async fn request(&self, path: &str, options: RequestOptions) -> Result<Value, ServiceNowError> {
        let timeout = options.timeout.unwrap_or(self.timeout);
        let mut url = format!("{}{}", self.instance_url, path);
        if !options.query.is_empty() {
            let encoded = serde_urlencoded::to_string(&options.query)
                .map_err(|err| ServiceNowError::query_error(err.to_string()))?;
            url.push('?');
            url.push_str(&encoded);
        }
        let mut headers = vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), self.authorization().await?),
        ];
        if matches!(options.body, Some(RequestBody::Json(_))) {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        let request = HttpRequest {
            method: options.method.clone(),
            url,
            headers,
            body: options.body,
            timeout,
        };
        self.logger.debug(
            "request",
            Some(&json!({"method": options.method.as_str(), "path": path})),
        );
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|err| error_from_transport(err, timeout, path))?;
        if !response.is_success() {
            return Err(error_from_response(&response, &options.method, path));
        }
        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(response
            .json()
            .unwrap_or_else(|| Value::String(response.body.clone())))
    }

    pub async fn request_with_retry(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<Value, ServiceNowError> {
        let mut retries = 0u32;
        loop {
            match self.request(path, options.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !self.retry.allows_method(&options.method)
                        || !self.retry.is_retryable(err.error_type)
                        || retries >= self.retry.max_retries
                    {
                        return Err(err);
                    }
                    retries += 1;
                    let delay = self.retry.delay_for_retry(retries);
                    self.logger.warn(
                        "retrying request",
                        Some(&json!({
                            "path": path,
                            "attempt": retries + 1,
                            "delay_ms": delay.as_millis() as u64,
                            "error_type": err.error_type.as_str(),
                        })),
                    );
                    if err.error_type == ErrorType::TokenExpired {
                        if let Err(refresh_err) = self.fetch_oauth_token().await {
                            self.logger.warn(
                                "token refresh failed",
                                Some(&json!({"error": refresh_err.message})),
                            );
                        }
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub async fn query_table(
        &self,
        table: &str,
        query: Option<&str>,
        fields: &[String],
        limit: usize,
    ) -> Result<Vec<Value>, ServiceNowError> {
        let table = validate_table_name(table)?;
        let mut options = RequestOptions::get()
            .with_query("sysparm_limit", limit.to_string())
            .with_query("sysparm_display_value", "true")
            .with_query("sysparm_exclude_reference_link", "true");
        if let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) {
            options = options.with_query("sysparm_query", query);
        }
        if !fields.is_empty() {
            options = options.with_query("sysparm_fields", fields.join(","));
        }
        let body = self
            .request_with_retry(&format!("/api/now/table/{}", table), options)
            .await?;
        match body.get("result") {
            Some(Value::Array(rows)) => Ok(rows.clone()),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(other) => Ok(vec![other.clone()]),
        }
    }

    pub async fn create_record(&self, table: &str, record: Value) -> Result<Value, ServiceNowError> {
        let table = validate_table_name(table)?;
        let body = self
            .request_with_retry(&format!("/api/now/table/{}", table), RequestOptions::post(record))
            .await?;
        Ok(body.get("result").cloned().unwrap_or(body))
    }

    pub async fn update_record(
        &self,
        table: &str,
        sys_id: &str,
        changes: Value,
    ) -> Result<Value, ServiceNowError> {
        let table = validate_table_name(table)?;
        let body = self
            .request_with_retry(
                &format!("/api/now/table/{}/{}", table, sys_id),
                RequestOptions::patch(changes),
            )
            .await?;
        Ok(body.get("result").cloned().unwrap_or(body))
    }

    pub async fn delete_record(&self, table: &str, sys_id: &str) -> Result<(), ServiceNowError> {
        let table = validate_table_name(table)?;
        self.request_with_retry(
            &format!("/api/now/table/{}/{}", table, sys_id),
            RequestOptions::delete(),
        )
        .await?;
        Ok(())
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ServiceNowError> {
        let mut options = RequestOptions::post(body);
        if let Some(timeout) = timeout {
            options = options.with_timeout(timeout);
        }
        self.request_with_retry(path, options).await
    }

    pub async fn get_properties(&self, names: &[&str]) -> Result<Vec<(String, String)>, ServiceNowError> {
        let query = format!("nameIN{}", names.join(","));
        let rows = self
            .query_table(
                tables::PROPERTIES,
                Some(&query),
                &["name".to_string(), "value".to_string()],
                names.len().max(1),
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| Some((record_field(row, "name")?, record_field(row, "value")?)))
            .collect())
    }

    /// Reads `glide.buildtag` to confirm the instance answers with these
    /// credentials. A readable instance that hides the property is still a
    /// successful connection with an unknown version.
    pub async fn test_connection(&self) -> Result<InstanceVersion, ServiceNowError> {
        let tag = match self
            .query_table(
                tables::PROPERTIES,
                Some(&format!("name={}", properties::BUILD_TAG)),
                &["name".to_string(), "value".to_string()],
                1,
            )
            .await
        {
            Ok(rows) => rows.first().and_then(|row| record_field(row, "value")),
            Err(err) if err.error_type == ErrorType::AclDenied => {
                self.logger.warn(
                    "build tag not readable; version unknown",
                    Some(&json!({"instance": self.instance_url})),
                );
                None
            }
            Err(err) => return Err(err),
        };
        Ok(match tag {
            Some(tag) => InstanceVersion {
                version: parse_build_tag(&tag),
                build_tag: Some(tag),
            },
            None => InstanceVersion {
                version: "unknown".to_string(),
                build_tag: None,
            },
        })
    }

    async fn resolve_current_user_id(&self) -> Result<(String, Option<String>), ServiceNowError> {
        match self
            .request_with_retry("/api/now/ui/user/current_user", RequestOptions::get())
            .await
        {
            Ok(body) => {
                let result = body.get("result").cloned().unwrap_or(Value::Null);
                if let Some(id) = record_field(&result, "user_sys_id").or_else(|| record_field(&result, "sys_id")) {
                    return Ok((id, record_field(&result, "user_name")));
                }
            }
            Err(err) if !err.error_type.is_surface_miss() => return Err(err),
            Err(err) => {
                self.logger.debug(
                    "current_user endpoint unavailable",
                    Some(&json!({"error_type": err.error_type.as_str()})),
                );
            }
        }

        let Some(username) = self.auth_snapshot().username().map(str::to_string) else {
            return Err(ServiceNowError::authentication_failed(
                "Unable to resolve the connected user",
            ));
        };
        let rows = self
            .query_table(
                tables::USERS,
                Some(&format!("user_name={}", crate::utils::encoded_query::escape_value(&username))),
                &["sys_id".to_string(), "user_name".to_string()],
                1,
            )
            .await?;
        let id = rows.first().and_then(|row| record_field(row, "sys_id")).ok_or_else(|| {
            ServiceNowError::authentication_failed(format!("User '{}' not found on instance", username))
        })?;
        Ok((id, Some(username)))
    }

    pub async fn get_current_user(&self) -> Result<CurrentUser, ServiceNowError> {
        let (sys_id, fallback_name) = self.resolve_current_user_id().await?;
        let record = self
            .query_table(
                tables::USERS,
                Some(&format!("sys_id={}", sys_id)),
                &[
                    "sys_id".to_string(),
                    "user_name".to_string(),
                    "name".to_string(),
                    "email".to_string(),
                ],
                1,
            )
            .await?
            .into_iter()
            .next()
            .unwrap_or(Value::Null);

        let roles = match self
            .query_table(
                tables::USER_ROLES,
                Some(&format!("user={}", sys_id)),
                &["role".to_string()],
                limits::ROLE_LOOKUP_LIMIT,
            )
            .await
        {
            Ok(rows) => flatten_roles(&rows),
            Err(err) if err.error_type.is_surface_miss() => {
                self.logger.warn(
                    "role lookup denied; continuing without roles",
                    Some(&json!({"error_type": err.error_type.as_str()})),
                );
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        Ok(CurrentUser {
            user_name: record_field(&record, "user_name")
                .or(fallback_name)
                .unwrap_or_else(|| sys_id.clone()),
            sys_id,
            name: record_field(&record, "name"),
            email: record_field(&record, "email"),
            roles,
        })
    }
}

/// Role names in first-seen order, duplicates dropped.
pub fn flatten_roles(rows: &[Value]) -> Vec<String> {
    let mut roles: Vec<String> = Vec::new();
    for row in rows {
        if let Some(role) = record_field(row, "role") {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
    }
    roles
}
