use crate::constants::{network, retry, script};
use crate::servicenow::retry::RetryPolicy;
use crate::utils::paths::resolve_credentials_path;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub script_poll_interval: Duration,
    pub script_poll_window: Duration,
    pub credentials_path: PathBuf,
    pub script_endpoints: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(network::TIMEOUT_REQUEST_MS),
            retry: RetryPolicy::default(),
            script_poll_interval: Duration::from_millis(script::POLL_INTERVAL_MS),
            script_poll_window: Duration::from_millis(script::POLL_WINDOW_MS),
            credentials_path: PathBuf::from("credentials.json"),
            script_endpoints: default_script_endpoints(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let retry = RetryPolicy {
            max_retries: env_parse("SERVICENOW_MAX_RETRIES").unwrap_or(retry::MAX_RETRIES),
            initial_delay: Duration::from_millis(
                env_parse("SERVICENOW_RETRY_INITIAL_MS").unwrap_or(retry::INITIAL_DELAY_MS),
            ),
            max_delay: Duration::from_millis(
                env_parse("SERVICENOW_RETRY_MAX_MS").unwrap_or(retry::MAX_DELAY_MS),
            ),
            backoff_multiplier: env_parse::<f64>("SERVICENOW_RETRY_MULTIPLIER")
                .filter(|m| m.is_finite() && *m >= 1.0)
                .unwrap_or(retry::BACKOFF_MULTIPLIER),
            ..RetryPolicy::default()
        };
        Self {
            request_timeout: Duration::from_millis(
                env_parse("SERVICENOW_TIMEOUT_MS")
                    .filter(|v: &u64| *v > 0)
                    .unwrap_or(network::TIMEOUT_REQUEST_MS),
            ),
            retry,
            script_poll_interval: Duration::from_millis(
                env_parse("SERVICENOW_SCRIPT_POLL_MS")
                    .filter(|v: &u64| *v > 0)
                    .unwrap_or(script::POLL_INTERVAL_MS),
            ),
            script_poll_window: Duration::from_millis(
                env_parse("SERVICENOW_SCRIPT_WINDOW_MS")
                    .filter(|v: &u64| *v > 0)
                    .unwrap_or(script::POLL_WINDOW_MS),
            ),
            credentials_path: resolve_credentials_path(),
            script_endpoints: resolve_script_endpoints(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
}

fn default_script_endpoints() -> Vec<String> {
    script::DIRECT_ENDPOINTS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn resolve_script_endpoints() -> Vec<String> {
    let parsed: Vec<String> = std::env::var("SERVICENOW_SCRIPT_ENDPOINTS")
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    if s.starts_with('/') {
                        s.to_string()
                    } else {
                        format!("/{}", s)
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    if parsed.is_empty() {
        default_script_endpoints()
    } else {
        parsed
    }
}
