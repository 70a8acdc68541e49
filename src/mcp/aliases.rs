use crate::constants::tools;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Short names accepted for every `servicenow_*` tool.
pub const BUILTIN_TOOL_ALIASES: &[(&str, &str)] = &[
    ("connect", tools::CONNECT),
    ("disconnect", tools::DISCONNECT),
    ("select", tools::SELECT),
    ("status", tools::STATUS),
    ("query", tools::QUERY),
    ("syslogs", tools::SYSLOGS),
    ("syslog", tools::SYSLOGS),
    ("aia_logs", tools::AIA_LOGS),
    ("script", tools::SCRIPT),
    ("instance", tools::INSTANCE),
];

static BUILTIN_TOOL_ALIAS_MAP: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| BUILTIN_TOOL_ALIASES.iter().copied().collect());

pub fn canonical_tool_name(tool: &str) -> &str {
    BUILTIN_TOOL_ALIAS_MAP.get(tool).copied().unwrap_or(tool)
}

pub fn builtin_tool_alias_map_owned() -> HashMap<String, String> {
    BUILTIN_TOOL_ALIASES
        .iter()
        .map(|(alias, target)| (alias.to_string(), target.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_resolve_to_prefixed_tools() {
        assert_eq!(canonical_tool_name("query"), tools::QUERY);
        assert_eq!(canonical_tool_name("syslog"), tools::SYSLOGS);
        assert_eq!(canonical_tool_name(tools::SCRIPT), tools::SCRIPT);
        assert_eq!(canonical_tool_name("unknown"), "unknown");
    }

    #[test]
    fn every_alias_targets_a_prefixed_name() {
        for (alias, target) in BUILTIN_TOOL_ALIASES {
            assert!(target.starts_with("servicenow_"), "{alias} -> {target}");
        }
    }
}
