pub fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> String {
    if max_bytes == 0 {
        return String::new();
    }
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Truncates to `max_chars` characters, appending an ellipsis marker with the
/// number of characters dropped.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    let total = value.chars().count();
    if total <= max_chars {
        return value.to_string();
    }
    let kept: String = value.chars().take(max_chars).collect();
    format!("{}… (+{} chars)", kept, total - max_chars)
}

/// Collapses a multi-line value onto one line for list-style output.
pub fn single_line(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ⏎ ")
}

pub fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{}{}", prefix, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_utf8_prefix_does_not_split_utf8() {
        assert_eq!(truncate_utf8_prefix("a😀b", 2), "a");
        assert_eq!(truncate_utf8_prefix("a😀b", 5), "a😀");
    }

    #[test]
    fn truncate_chars_reports_dropped_count() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello… (+6 chars)");
    }

    #[test]
    fn single_line_joins_non_empty_lines() {
        assert_eq!(single_line("a\n\n  b \nc"), "a ⏎ b ⏎ c");
    }
}
