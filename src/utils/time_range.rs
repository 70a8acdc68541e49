use crate::errors::ServiceNowError;
use chrono::{DateTime, Duration, Utc};

pub const TOKENS: &[&str] = &["1h", "4h", "12h", "24h", "7d"];

pub fn parse_time_range(token: &str) -> Result<Duration, ServiceNowError> {
    match token.trim().to_lowercase().as_str() {
        "1h" => Ok(Duration::hours(1)),
        "4h" => Ok(Duration::hours(4)),
        "12h" => Ok(Duration::hours(12)),
        "24h" | "1d" => Ok(Duration::hours(24)),
        "7d" => Ok(Duration::days(7)),
        other => Err(ServiceNowError::query_error(format!(
            "Unsupported time range: {}",
            other
        ))
        .with_suggestion(format!("Use one of: {}.", TOKENS.join(", ")))),
    }
}

/// Absolute lower bound, formatted the way glide date-time fields compare
/// (`YYYY-MM-DD HH:MM:SS`, UTC).
pub fn lower_bound(token: &str, now: DateTime<Utc>) -> Result<String, ServiceNowError> {
    let span = parse_time_range(token)?;
    Ok(format_glide_datetime(now - span))
}

pub fn format_glide_datetime(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn tokens_map_to_lower_bounds() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).single().expect("date");
        assert_eq!(lower_bound("1h", now).expect("1h"), "2024-03-10 11:00:00");
        assert_eq!(lower_bound("4h", now).expect("4h"), "2024-03-10 08:00:00");
        assert_eq!(lower_bound("12h", now).expect("12h"), "2024-03-10 00:00:00");
        assert_eq!(lower_bound("24h", now).expect("24h"), "2024-03-09 12:00:00");
        assert_eq!(lower_bound("7d", now).expect("7d"), "2024-03-03 12:00:00");
    }

    #[test]
    fn unknown_token_is_query_error() {
        let err = parse_time_range("3w").expect_err("unsupported");
        assert_eq!(err.error_type, crate::errors::ErrorType::QueryError);
    }
}
