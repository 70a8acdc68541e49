use crate::errors::{ErrorType, ServiceNowError};
use serde_json::Value;
use std::time::Duration;

/// Argument checks for tool handlers. Each handler reports bad arguments with
/// the error type closest to its domain.
#[derive(Debug, Clone, Copy)]
pub struct Validation {
    error_type: ErrorType,
}

impl Validation {
    pub fn new(error_type: ErrorType) -> Self {
        Self { error_type }
    }

    fn invalid(&self, message: String) -> ServiceNowError {
        ServiceNowError::new(self.error_type, message)
    }

    pub fn ensure_string(
        &self,
        value: &Value,
        label: &str,
        trim: bool,
    ) -> Result<String, ServiceNowError> {
        let text = value
            .as_str()
            .ok_or_else(|| self.invalid(format!("{} must be a non-empty string", label)))?;
        let normalized = text.trim();
        if normalized.is_empty() {
            return Err(self.invalid(format!("{} must be a non-empty string", label)));
        }
        Ok(if trim {
            normalized.to_string()
        } else {
            text.to_string()
        })
    }

    pub fn ensure_optional_string(
        &self,
        value: Option<&Value>,
        label: &str,
        trim: bool,
    ) -> Result<Option<String>, ServiceNowError> {
        match value {
            None => Ok(None),
            Some(val) if val.is_null() => Ok(None),
            Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
            Some(val) => self.ensure_string(val, label, trim).map(Some),
        }
    }

    pub fn ensure_required_string(
        &self,
        args: &Value,
        key: &str,
        trim: bool,
    ) -> Result<String, ServiceNowError> {
        match args.get(key) {
            Some(value) if !value.is_null() => self.ensure_string(value, key, trim),
            _ => Err(self.invalid(format!("{} is required", key))),
        }
    }

    pub fn ensure_optional_bool(
        &self,
        value: Option<&Value>,
        label: &str,
    ) -> Result<Option<bool>, ServiceNowError> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(flag)) => Ok(Some(*flag)),
            Some(Value::String(text)) => match text.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Some(true)),
                "false" | "0" | "no" => Ok(Some(false)),
                _ => Err(self.invalid(format!("{} must be a boolean", label))),
            },
            Some(_) => Err(self.invalid(format!("{} must be a boolean", label))),
        }
    }

    /// Positive integer no larger than `max`; anything larger is a quota error.
    pub fn ensure_limit(
        &self,
        value: Option<&Value>,
        default: usize,
        max: usize,
    ) -> Result<usize, ServiceNowError> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(default);
        };
        let numeric = value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
            .ok_or_else(|| self.invalid("limit must be an integer".to_string()))?;
        if numeric < 1 {
            return Err(self.invalid("limit must be at least 1".to_string()));
        }
        if numeric as u64 > max as u64 {
            return Err(ServiceNowError::new(
                ErrorType::QuotaExceeded,
                format!("limit {} exceeds the maximum of {}", numeric, max),
            ));
        }
        Ok(numeric as usize)
    }

    /// Seconds in `1..=max`, returned as a duration.
    pub fn ensure_timeout_secs(
        &self,
        value: Option<&Value>,
        default: u64,
        max: u64,
    ) -> Result<Duration, ServiceNowError> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(Duration::from_secs(default));
        };
        let numeric = value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
            .ok_or_else(|| self.invalid("timeout must be a number of seconds".to_string()))?;
        if !numeric.is_finite() || numeric <= 0.0 || numeric > max as f64 {
            return Err(self.invalid(format!(
                "timeout must be between 1 and {} seconds",
                max
            )));
        }
        Ok(Duration::from_millis((numeric * 1000.0) as u64))
    }

    /// Accepts an array of strings or a comma-separated string.
    pub fn ensure_string_list(
        &self,
        value: Option<&Value>,
        label: &str,
    ) -> Result<Vec<String>, ServiceNowError> {
        let items: Vec<String> = match value {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::String(text)) => text.split(',').map(|s| s.to_string()).collect(),
            Some(Value::Array(values)) => {
                let mut out = Vec::new();
                for item in values {
                    let Some(text) = item.as_str() else {
                        return Err(self.invalid(format!("{} must contain only strings", label)));
                    };
                    out.push(text.to_string());
                }
                out
            }
            Some(_) => {
                return Err(self.invalid(format!(
                    "{} must be an array of strings or a comma-separated string",
                    label
                )))
            }
        };
        let mut out: Vec<String> = Vec::new();
        for item in items {
            let trimmed = item.trim();
            if !trimmed.is_empty() && !out.iter().any(|existing| existing == trimmed) {
                out.push(trimmed.to_string());
            }
        }
        Ok(out)
    }

    pub fn ensure_enum(
        &self,
        value: Option<&Value>,
        label: &str,
        allowed: &[&str],
    ) -> Result<Option<String>, ServiceNowError> {
        let Some(raw) = self.ensure_optional_string(value, label, true)? else {
            return Ok(None);
        };
        let lowered = raw.to_lowercase();
        if allowed.contains(&lowered.as_str()) {
            Ok(Some(lowered))
        } else {
            Err(self
                .invalid(format!("{} must be one of: {}", label, allowed.join(", ")))
                .with_details(serde_json::json!({"received": raw})))
        }
    }

    pub fn ensure_identifier(&self, value: &str, label: &str) -> Result<String, ServiceNowError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(self.invalid(format!("{} must be a non-empty string", label)));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(self.invalid(format!(
                "{} may only contain letters, digits, '_' and '.'",
                label
            )));
        }
        Ok(trimmed.to_string())
    }
}
