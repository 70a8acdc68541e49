//! Static screening of server-side scripts before they are sent to an
//! instance. The scan is a pattern match over the raw text: anything that
//! looks like a hard-blocked operation refuses the script, mutation calls are
//! flagged for the readonly façade, and a few shapes only produce warnings.
//!
//! Matching is deliberately naive about comments and strings, so a blocked
//! call inside a comment still blocks. The readonly façade is the runtime
//! guard behind this scan.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

struct SafetyPattern {
    id: &'static str,
    regex: Regex,
    reason: &'static str,
}

fn pattern(id: &'static str, source: &str, reason: &'static str) -> SafetyPattern {
    SafetyPattern {
        id,
        regex: Regex::new(source).expect("script safety regex"),
        reason,
    }
}

const GLIDE_RECORD_ON: &str = r#"\bGlideRecord(?:Secure)?\s*\(\s*['"]"#;

/// Call of `methods` (a regex alternation) written either as `.name(` or
/// with a literal key, `['name'](`.
fn method_call(methods: &str) -> String {
    format!(r#"(?:\.\s*|\[\s*['"])(?:{})(?:['"]\s*\])?\s*\("#, methods)
}

fn method_call_regex(methods: &str) -> Regex {
    Regex::new(&method_call(methods)).expect("method call regex")
}

static BLOCKED: Lazy<Vec<SafetyPattern>> = Lazy::new(|| {
    vec![
        pattern(
            "mass_delete",
            &method_call("deleteMultiple"),
            "deleteMultiple() removes every matching record in one call",
        ),
        pattern(
            "mass_update",
            &method_call("updateMultiple"),
            "updateMultiple() rewrites every matching record in one call",
        ),
        pattern(
            "mass_multiple",
            r"\bGlideMultiple(?:Update|Delete)\b",
            "GlideMultipleUpdate/GlideMultipleDelete change every matching record in one call",
        ),
        pattern(
            "delete_loop",
            &format!(
                r"(?s)while\s*\(\s*[\w$]+\s*\.\s*next\s*\(\s*\)\s*\)\s*\{{[^}}]*{}",
                method_call("deleteRecord")
            ),
            "deleteRecord() inside a next() loop is a mass delete",
        ),
        pattern(
            "table_creator",
            r"\bGlideTableCreator\b",
            "GlideTableCreator changes table structure",
        ),
        pattern(
            "table_drop",
            r"\bGlideDBUtil\b|\bdropTable\s*\(",
            "GlideDBUtil/dropTable can drop tables",
        ),
        pattern(
            "schema_metadata",
            &format!(
                r#"{}(?:sys_db_object|sys_dictionary|sys_dictionary_override|sys_glide_object)['"]"#,
                GLIDE_RECORD_ON
            ),
            "direct access to table/dictionary metadata can alter schema",
        ),
        pattern(
            "credential_table",
            &format!(
                r#"{}(?:sys_user_has_password|discovery_credentials|sys_auth_profile|sys_auth_profile_basic|oauth_entity|oauth_credential|sys_certificate|sys_user_token)['"]"#,
                GLIDE_RECORD_ON
            ),
            "credential tables cannot be accessed from scripts",
        ),
        pattern(
            "password_mutation",
            r#"(?:setValue|setDisplayValue)\s*\(\s*['"]user_password['"]|\.user_password\s*=[^=]"#,
            "changing user passwords is not allowed",
        ),
        pattern(
            "set_property",
            r"\bgs\s*\.\s*setProperty\s*\(",
            "gs.setProperty() changes system properties",
        ),
        pattern(
            "rest_message",
            r"\bRESTMessageV2\b",
            "outbound REST calls are not allowed",
        ),
        pattern(
            "soap_message",
            r"\bSOAPMessageV2\b",
            "outbound SOAP calls are not allowed",
        ),
        pattern(
            "http_request",
            r"\bGlideHTTPRequest\b|\bXMLHttpRequest\b",
            "raw outbound HTTP is not allowed",
        ),
        pattern(
            "web_service_namespace",
            r"\bsn_ws\s*\.",
            "the sn_ws outbound web service namespace is not allowed",
        ),
        pattern(
            "workflow_bypass",
            r"\.setWorkflow\s*\(\s*false\s*\)",
            "setWorkflow(false) skips business rules and workflows",
        ),
        pattern(
            "sys_fields_bypass",
            r"\.autoSysFields\s*\(\s*false\s*\)",
            "autoSysFields(false) hides changes from audit fields",
        ),
        pattern(
            "engines_bypass",
            r"\.setUseEngines\s*\(\s*false\s*\)",
            "setUseEngines(false) skips data policy engines",
        ),
        pattern("eval", r"\beval\s*\(", "dynamic evaluation hides what actually runs"),
        pattern(
            "function_constructor",
            r"\bnew\s+Function\s*\(",
            "the Function constructor is dynamic evaluation",
        ),
        pattern(
            "glide_evaluator",
            r"\bGlide(?:Scoped)?Evaluator\b",
            "GlideEvaluator/GlideScopedEvaluator run arbitrary code",
        ),
        pattern(
            "impersonation",
            r"\.impersonate\s*\(|\bGlideImpersonate\b",
            "impersonating another user is not allowed",
        ),
        pattern(
            "session_hijack",
            r"getSession\s*\(\s*\)\s*\.\s*(?:set\w*|put\w*|clear\w*|loginUser|invalidate|onlineImpersonate)\s*\(",
            "mutating the user session is not allowed",
        ),
        pattern(
            "java_packages",
            r"\bPackages\s*\.",
            "direct Java package access bypasses the platform API",
        ),
        pattern(
            "prototype_patch",
            r"\bGlideRecord(?:Secure)?\s*\.\s*prototype\b",
            "patching GlideRecord.prototype affects every script on the node",
        ),
    ]
});

/// Blocked rules that depend on which table a mutated record is bound to.
const ROLE_MEMBERSHIP_WRITE: &str = "role_membership_write";
const PROPERTY_WRITE: &str = "property_write";
const ROLE_MEMBERSHIP_TABLES: &[&str] = &["sys_user_has_role", "sys_user_grmember"];
const PROPERTY_TABLES: &[&str] = &["sys_properties"];

static MUTATION_INDICATORS: Lazy<Vec<SafetyPattern>> = Lazy::new(|| {
    vec![
        pattern("insert", &method_call("insert"), "insert() creates records"),
        pattern("update", &method_call("update"), "update() modifies records"),
        pattern("delete_record", &method_call("deleteRecord"), "deleteRecord() deletes records"),
        pattern(
            "with_references",
            &method_call("insertWithReferences|updateWithReferences"),
            "insertWithReferences()/updateWithReferences() write referenced records too",
        ),
    ]
});

static SET_VALUE_RE: Lazy<Regex> = Lazy::new(|| method_call_regex("setValue"));
static UPDATE_RE: Lazy<Regex> = Lazy::new(|| method_call_regex("update"));
static INITIALIZE_RE: Lazy<Regex> = Lazy::new(|| method_call_regex("initialize"));
static INSERT_RE: Lazy<Regex> = Lazy::new(|| method_call_regex("insert"));

static INFINITE_LOOP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"while\s*\(\s*(?:true|1)\s*\)|for\s*\(\s*;\s*;\s*\)").expect("regex")
});
static QUERY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.query\s*\(").expect("regex"));
static ITERATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(?:next|hasNext|_next)\s*\(").expect("regex"));
static FILTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\.(?:addQuery|addEncodedQuery|addActiveQuery|addNullQuery|addNotNullQuery|addJoinQuery|setLimit|get)\s*\(",
    )
    .expect("regex")
});
static ROW_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.getRowCount\s*\(").expect("regex"));

static BINDING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_$][\w$]*)\s*=\s*new\s+GlideRecord(?:Secure)?\s*\(\s*['"]([A-Za-z0-9_]+)['"]\s*\)"#)
        .expect("regex")
});
static MUTATION_CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_$][\w$]*)\s*(?:\.\s*|\[\s*['"])(insertWithReferences|updateWithReferences|insert|update|deleteRecord|deleteMultiple|updateMultiple)(?:['"]\s*\])?\s*\("#)
        .expect("regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationCall {
    pub variable: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScriptAnalysisResult {
    pub safe: bool,
    pub blocked_reasons: Vec<String>,
    pub blocked_patterns: Vec<String>,
    pub warnings: Vec<String>,
    pub has_mutation_risk: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syntax_error: Option<String>,
    pub mutation_calls: Vec<MutationCall>,
}

impl ScriptAnalysisResult {
    /// Safe to hand to the executor: nothing blocked and structurally sound.
    pub fn is_executable(&self) -> bool {
        self.safe && self.syntax_error.is_none()
    }
}

pub fn blocked_pattern_ids() -> Vec<&'static str> {
    let mut ids: Vec<&'static str> = BLOCKED.iter().map(|p| p.id).collect();
    ids.push(ROLE_MEMBERSHIP_WRITE);
    ids.push(PROPERTY_WRITE);
    ids
}

/// Pure function of the script text.
pub fn analyze(script: &str) -> ScriptAnalysisResult {
    let mut result = ScriptAnalysisResult {
        syntax_error: check_syntax(script).err(),
        mutation_calls: extract_mutation_calls(script),
        ..ScriptAnalysisResult::default()
    };

    for rule in BLOCKED.iter() {
        if let Some(found) = rule.regex.find(script) {
            result.blocked_patterns.push(rule.id.to_string());
            result.blocked_reasons.push(format!(
                "{} (found `{}`)",
                rule.reason,
                found.as_str().trim()
            ));
        }
    }
    for (id, tables, reason) in [
        (
            ROLE_MEMBERSHIP_WRITE,
            ROLE_MEMBERSHIP_TABLES,
            "writing role or group membership grants privileges",
        ),
        (
            PROPERTY_WRITE,
            PROPERTY_TABLES,
            "writing sys_properties changes instance configuration",
        ),
    ] {
        let hit = result.mutation_calls.iter().find(|call| {
            call.table
                .as_deref()
                .map(|t| tables.contains(&t))
                .unwrap_or(false)
        });
        if let Some(call) = hit {
            result.blocked_patterns.push(id.to_string());
            result.blocked_reasons.push(format!(
                "{} (found `{}.{}()` on {})",
                reason,
                call.variable,
                call.method,
                call.table.as_deref().unwrap_or("?")
            ));
        }
    }
    result.safe = result.blocked_reasons.is_empty();

    for indicator in MUTATION_INDICATORS.iter() {
        if indicator.regex.is_match(script) {
            result.has_mutation_risk = true;
            result.warnings.push(indicator.reason.to_string());
        }
    }
    if SET_VALUE_RE.is_match(script) && UPDATE_RE.is_match(script) {
        result.warnings.push("setValue() followed by update() writes field changes".to_string());
    }
    if INITIALIZE_RE.is_match(script) && INSERT_RE.is_match(script) {
        result.warnings.push("initialize() with insert() creates new records".to_string());
    }
    if !result.mutation_calls.is_empty() {
        result.has_mutation_risk = true;
    }

    if INFINITE_LOOP_RE.is_match(script) {
        result
            .warnings
            .push("possible infinite loop; make sure the loop has a break condition".to_string());
    }
    if QUERY_RE.is_match(script) {
        if !ITERATION_RE.is_match(script) {
            result
                .warnings
                .push("query() result is never iterated with next()/hasNext()".to_string());
        }
        if !FILTER_RE.is_match(script) {
            result
                .warnings
                .push("query() without addQuery/addEncodedQuery/setLimit scans the whole table".to_string());
        }
    }
    if ROW_COUNT_RE.is_match(script) {
        result.warnings.push(
            "getRowCount() loads the whole result set; prefer GlideAggregate with COUNT".to_string(),
        );
    }
    result
}

/// Mutation calls in source order, each resolved to the table its receiver
/// was bound to with `new GlideRecord('table')` when that is visible.
pub fn extract_mutation_calls(script: &str) -> Vec<MutationCall> {
    let mut bindings: Vec<(usize, String, String)> = Vec::new();
    for caps in BINDING_RE.captures_iter(script) {
        if let Some(whole) = caps.get(0) {
            bindings.push((whole.start(), caps[1].to_string(), caps[2].to_lowercase()));
        }
    }

    let mut calls: Vec<MutationCall> = Vec::new();
    for caps in MUTATION_CALL_RE.captures_iter(script) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let variable = caps[1].to_string();
        let table = bindings
            .iter()
            .filter(|(pos, name, _)| *pos < whole.start() && *name == variable)
            .last()
            .map(|(_, _, table)| table.clone());
        let call = MutationCall {
            variable,
            method: caps[2].to_string(),
            table,
        };
        if !calls.contains(&call) {
            calls.push(call);
        }
    }
    calls
}

/// Tables each bound variable refers to; used when describing suppressed
/// calls that did not carry a table.
pub fn variable_tables(script: &str) -> HashMap<String, String> {
    BINDING_RE
        .captures_iter(script)
        .map(|caps| (caps[1].to_string(), caps[2].to_lowercase()))
        .collect()
}

const REGEX_PRECEDING_WORDS: &[&str] = &[
    "return",
    "typeof",
    "case",
    "do",
    "else",
    "in",
    "instanceof",
    "new",
    "delete",
    "void",
    "throw",
];

/// Structural check: balanced brackets, terminated strings, comments and
/// regex literals. Errors carry the 1-based line number.
pub fn check_syntax(script: &str) -> Result<(), String> {
    if script.trim().is_empty() {
        return Err("script is empty".to_string());
    }
    let chars: Vec<char> = script.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;
    let mut last_significant: Option<char> = None;
    let mut last_word = String::new();

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let start_line = line;
                i += 2;
                loop {
                    if i + 1 >= chars.len() {
                        return Err(format!("unterminated block comment starting on line {}", start_line));
                    }
                    if chars[i] == '\n' {
                        line += 1;
                    }
                    if chars[i] == '*' && chars[i + 1] == '/' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            '/' if regex_allowed(last_significant, &last_word) => {
                let start_line = line;
                i += 1;
                let mut in_class = false;
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(format!("unterminated regex literal on line {}", start_line));
                    };
                    match ch {
                        '\n' => {
                            return Err(format!("unterminated regex literal on line {}", start_line))
                        }
                        '\\' => i += 2,
                        '[' => {
                            in_class = true;
                            i += 1;
                        }
                        ']' => {
                            in_class = false;
                            i += 1;
                        }
                        '/' if !in_class => {
                            i += 1;
                            break;
                        }
                        _ => i += 1,
                    }
                }
                while i < chars.len() && chars[i].is_ascii_alphabetic() {
                    i += 1;
                }
                last_significant = Some('/');
                last_word.clear();
            }
            '\'' | '"' | '`' => {
                let quote = c;
                let start_line = line;
                i += 1;
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(format!("unterminated string literal on line {}", start_line));
                    };
                    if ch == '\\' {
                        if chars.get(i + 1) == Some(&'\n') {
                            line += 1;
                        }
                        i += 2;
                        continue;
                    }
                    if ch == '\n' {
                        if quote != '`' {
                            return Err(format!("unterminated string literal on line {}", start_line));
                        }
                        line += 1;
                    }
                    i += 1;
                    if ch == quote {
                        break;
                    }
                }
                last_significant = Some(quote);
                last_word.clear();
            }
            '(' | '[' | '{' => {
                stack.push((c, line));
                last_significant = Some(c);
                last_word.clear();
                i += 1;
            }
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => {
                        return Err(format!(
                            "mismatched '{}' on line {} (opened '{}' on line {})",
                            c, line, open, open_line
                        ))
                    }
                    None => return Err(format!("unexpected '{}' on line {}", c, line)),
                }
                last_significant = Some(c);
                last_word.clear();
                i += 1;
            }
            c if c.is_alphanumeric() || c == '_' || c == '$' => {
                last_word.clear();
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    last_word.push(chars[i]);
                    i += 1;
                }
                last_significant = Some('a');
            }
            _ => {
                last_significant = Some(c);
                last_word.clear();
                i += 1;
            }
        }
    }

    if let Some((open, open_line)) = stack.pop() {
        return Err(format!("unclosed '{}' opened on line {}", open, open_line));
    }
    Ok(())
}

fn regex_allowed(last_significant: Option<char>, last_word: &str) -> bool {
    match last_significant {
        None => true,
        Some('a') => REGEX_PRECEDING_WORDS.contains(&last_word),
        Some(')') | Some(']') | Some('}') | Some('\'') | Some('"') | Some('`') => false,
        Some(_) => true,
    }
}
