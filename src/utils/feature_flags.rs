pub fn is_truthy(value: impl AsRef<str>) -> bool {
    matches!(
        value.as_ref().trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn is_truthy_any_env(keys: &[&str]) -> bool {
    keys.iter()
        .any(|key| std::env::var(key).ok().map(is_truthy).unwrap_or(false))
}

/// Operators can pin the server to readonly script execution.
pub fn is_execute_mode_disabled() -> bool {
    is_truthy_any_env(&["SERVICENOW_READONLY_ONLY", "SERVICENOW_DISABLE_EXECUTE"])
}
