use serde_json::Value;

/// Text of a table field as returned by the Table API. Reference fields come
/// back as `{value, display_value}` or `{value, link}` objects depending on
/// the sysparm flags; prefer the display value.
pub fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(num) => Some(num.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Object(map) => map
            .get("display_value")
            .filter(|v| v.as_str().map(|s| !s.is_empty()).unwrap_or(false))
            .or_else(|| map.get("value"))
            .and_then(field_text),
        _ => None,
    }
}

pub fn record_field(record: &Value, name: &str) -> Option<String> {
    record
        .get(name)
        .and_then(field_text)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_reference_objects() {
        assert_eq!(field_text(&json!("admin")).as_deref(), Some("admin"));
        assert_eq!(
            field_text(&json!({"value": "abc", "display_value": "itil"})).as_deref(),
            Some("itil")
        );
        assert_eq!(
            field_text(&json!({"value": "abc", "link": "https://x"})).as_deref(),
            Some("abc")
        );
        assert_eq!(field_text(&json!(42)).as_deref(), Some("42"));
        assert_eq!(field_text(&Value::Null), None);
    }

    #[test]
    fn empty_fields_read_as_missing() {
        let record = json!({"name": "", "email": "a@b.c"});
        assert_eq!(record_field(&record, "name"), None);
        assert_eq!(record_field(&record, "email").as_deref(), Some("a@b.c"));
    }
}
