use crate::constants::script as script_constants;
use crate::constants::tables;
use crate::errors::{ErrorType, ServiceNowError};
use crate::services::logger::Logger;
use crate::servicenow::client::ServiceNowClient;
use crate::servicenow::fields::record_field;
use crate::servicenow::probe::CandidateProbe;
use crate::servicenow::readonly::{ExecutionMode, PreparedScript};
use crate::utils::encoded_query::EncodedQuery;
use crate::utils::time_range::format_glide_datetime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;

const MAX_CAPTURED_LINES: usize = 500;
const MAX_CAPTURED_LINE_CHARS: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressedMutation {
    #[serde(default)]
    pub table: Option<String>,
    pub method: String,
    #[serde(default)]
    pub sys_id: Option<String>,
    #[serde(default)]
    pub encoded_query: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OutputEnvelope {
    #[serde(default)]
    output: Vec<String>,
    #[serde(default)]
    mutations: Vec<SuppressedMutation>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "endpoint", rename_all = "snake_case")]
pub enum ExecutionPath {
    Artifact,
    DirectEndpoint(String),
}

impl ExecutionPath {
    pub fn describe(&self) -> String {
        match self {
            ExecutionPath::Artifact => format!("scheduled job ({})", script_constants::ARTIFACT_TABLE),
            ExecutionPath::DirectEndpoint(endpoint) => format!("direct endpoint {}", endpoint),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptExecutionResult {
    pub output: Vec<String>,
    pub suppressed_mutations: Vec<SuppressedMutation>,
    pub path: ExecutionPath,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_sys_id: Option<String>,
    pub duration_ms: u64,
    pub mode: ExecutionMode,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub poll_interval: Duration,
    pub poll_window: Duration,
    pub endpoints: Vec<String>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(script_constants::POLL_INTERVAL_MS),
            poll_window: Duration::from_millis(script_constants::POLL_WINDOW_MS),
            endpoints: script_constants::DIRECT_ENDPOINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

fn open_marker(tag: &str) -> String {
    format!("<<{}:{}>>", script_constants::SENTINEL_NAME, tag)
}

fn close_marker(tag: &str) -> String {
    format!("<</{}:{}>>", script_constants::SENTINEL_NAME, tag)
}

/// Full program sent to the instance: `gs` logging shadowed by collectors,
/// the user script run inside a function scope with its record bindings, and
/// the collected output written once through the real `gs.info` between
/// sentinel markers.
pub fn build_capture_program(prepared: &PreparedScript, tag: &str) -> String {
    let mut program = String::new();
    program.push_str("(function () {\n");
    program.push_str(&format!("var __tag = '{}';\n", tag));
    program.push_str(&format!(
        "var __maxLines = {};\nvar __maxChars = {};\n",
        MAX_CAPTURED_LINES, MAX_CAPTURED_LINE_CHARS
    ));
    program.push_str(
        r#"var __out = [];
var __mutations = [];
var __error = null;
var __realGs = gs;
function __text(value) {
  if (value === null || value === undefined) { return String(value); }
  if (typeof value === 'object') {
    try { return JSON.stringify(value); } catch (e) { return String(value); }
  }
  return String(value);
}
function __collect(level) {
  return function () {
    var args = Array.prototype.slice.call(arguments);
    var line = args.length > 0 ? __text(args[0]) : '';
    for (var i = 1; i < args.length; i++) {
      line = line.split('{' + (i - 1) + '}').join(__text(args[i]));
    }
    if (level !== 'print' && level !== 'info') { line = '[' + level + '] ' + line; }
    if (line.length > __maxChars) { line = line.substring(0, __maxChars) + '...'; }
    if (__out.length < __maxLines) { __out.push(line); }
  };
}
var __gs = {};
try {
  for (var __k in __realGs) {
    (function (name) {
      try {
        if (typeof __realGs[name] === 'function') {
          __gs[name] = function () { return __realGs[name].apply(__realGs, arguments); };
        }
      } catch (e) {}
    })(__k);
  }
} catch (e) {}
var __forwarded = ['getUserID', 'getUserName', 'getUserDisplayName', 'getUser', 'getProperty', 'hasRole', 'nowDateTime', 'nowNoTZ', 'now', 'daysAgo', 'daysAgoStart', 'beginningOfToday', 'endOfToday', 'getMessage', 'getSession', 'generateGUID', 'tableExists', 'nil', 'getCurrentScopeName', 'dateGenerate', 'minutesAgo', 'hoursAgo'];
for (var __f = 0; __f < __forwarded.length; __f++) {
  (function (name) {
    if (!__gs[name]) {
      __gs[name] = function () { return __realGs[name].apply(__realGs, arguments); };
    }
  })(__forwarded[__f]);
}
var __levels = ['print', 'info', 'log', 'warn', 'error', 'debug', 'addInfoMessage', 'addErrorMessage'];
for (var __l = 0; __l < __levels.length; __l++) {
  __gs[__levels[__l]] = __collect(__levels[__l]);
}
"#,
    );
    program.push_str(&prepared.binding_prelude());
    program.push_str("var __userScript = function (GlideRecord, GlideRecordSecure, gs) {\n");
    program.push_str(&prepared.source);
    program.push_str("\n};\n");
    program.push_str(
        r#"try {
  __userScript(__GR, __GRS, __gs);
} catch (e) {
  __error = (e && e.message) ? String(e.message) : String(e);
}
"#,
    );
    program.push_str(&format!(
        "__realGs.info('{}' + JSON.stringify({{ output: __out, mutations: __mutations, error: __error }}) + '{}');\n",
        open_marker(tag),
        close_marker(tag)
    ));
    program.push_str("})();\n");
    program
}

fn parse_envelope(text: &str, tag: &str) -> Option<Result<OutputEnvelope, ServiceNowError>> {
    let open = open_marker(tag);
    let start = text.find(&open)? + open.len();
    let rest = &text[start..];
    let Some(end) = rest.find(&close_marker(tag)) else {
        return Some(Err(ServiceNowError::script_error(
            "Script output was truncated before the end marker",
        )
        .with_suggestion("Print less output from the script.")));
    };
    Some(
        serde_json::from_str::<OutputEnvelope>(&rest[..end]).map_err(|err| {
            ServiceNowError::script_error(format!("Script output envelope is malformed: {}", err))
        }),
    )
}

pub struct ScriptExecutor {
    logger: Logger,
    settings: ExecutorSettings,
}

impl ScriptExecutor {
    pub fn new(logger: Logger, settings: ExecutorSettings) -> Self {
        Self {
            logger: logger.child("executor"),
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub async fn execute(
        &self,
        client: &ServiceNowClient,
        prepared: &PreparedScript,
        window: Option<Duration>,
    ) -> Result<ScriptExecutionResult, ServiceNowError> {
        let tag = uuid::Uuid::new_v4().simple().to_string();
        self.execute_tagged(client, prepared, &tag, window).await
    }

    pub async fn execute_tagged(
        &self,
        client: &ServiceNowClient,
        prepared: &PreparedScript,
        tag: &str,
        window: Option<Duration>,
    ) -> Result<ScriptExecutionResult, ServiceNowError> {
        let started = Instant::now();
        let window = window.unwrap_or(self.settings.poll_window);
        let program = build_capture_program(prepared, tag);

        let (envelope, path, artifact_sys_id) = match self.create_artifact(client, &program, tag).await {
            Ok(sys_id) => {
                let outcome = self.run_artifact(client, &sys_id, tag, window).await;
                self.cleanup(client, &sys_id).await;
                (outcome?, ExecutionPath::Artifact, Some(sys_id))
            }
            Err(create_err) => {
                self.logger.warn(
                    "artifact creation failed; trying direct endpoints",
                    Some(&json!({"error_type": create_err.error_type.as_str(), "message": create_err.message})),
                );
                let (envelope, endpoint) = self
                    .run_direct(client, &program, tag, window, &create_err)
                    .await?;
                (envelope, ExecutionPath::DirectEndpoint(endpoint), None)
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        if let Some(error) = envelope.error {
            return Err(ServiceNowError::script_error(format!("Script raised an error: {}", error))
                .with_details(json!({
                    "output": envelope.output,
                    "suppressed_mutations": envelope.mutations,
                    "path": path.describe(),
                })));
        }
        self.logger.info(
            "script executed",
            Some(&json!({
                "path": path.describe(),
                "mode": prepared.mode.as_str(),
                "lines": envelope.output.len(),
                "suppressed": envelope.mutations.len(),
                "duration_ms": duration_ms,
            })),
        );
        Ok(ScriptExecutionResult {
            output: envelope.output,
            suppressed_mutations: envelope.mutations,
            path,
            artifact_sys_id,
            duration_ms,
            mode: prepared.mode,
        })
    }

    async fn create_artifact(
        &self,
        client: &ServiceNowClient,
        program: &str,
        tag: &str,
    ) -> Result<String, ServiceNowError> {
        let record = client
            .create_record(
                script_constants::ARTIFACT_TABLE,
                json!({
                    "name": format!("{}{}", script_constants::ARTIFACT_NAME_PREFIX, tag),
                    "script": program,
                    "run_type": "once",
                    "active": "false",
                }),
            )
            .await?;
        let sys_id = record_field(&record, "sys_id").ok_or_else(|| {
            ServiceNowError::script_error("Artifact was created without a sys_id")
        })?;
        self.logger.debug("artifact created", Some(&json!({"sys_id": sys_id})));
        Ok(sys_id)
    }

    async fn run_artifact(
        &self,
        client: &ServiceNowClient,
        sys_id: &str,
        tag: &str,
        window: Duration,
    ) -> Result<OutputEnvelope, ServiceNowError> {
        client
            .update_record(
                script_constants::ARTIFACT_TABLE,
                sys_id,
                json!({
                    "active": "true",
                    "run_start": format_glide_datetime(chrono::Utc::now()),
                }),
            )
            .await?;
        self.logger.debug("artifact triggered", Some(&json!({"sys_id": sys_id})));
        self.capture_output(client, tag, window).await
    }

    async fn cleanup(&self, client: &ServiceNowClient, sys_id: &str) {
        if let Err(err) = client
            .delete_record(script_constants::ARTIFACT_TABLE, sys_id)
            .await
        {
            self.logger.warn(
                "artifact cleanup failed",
                Some(&json!({"sys_id": sys_id, "error_type": err.error_type.as_str(), "message": err.message})),
            );
        }
    }

    async fn run_direct(
        &self,
        client: &ServiceNowClient,
        program: &str,
        tag: &str,
        window: Duration,
        create_err: &ServiceNowError,
    ) -> Result<(OutputEnvelope, String), ServiceNowError> {
        let probe = CandidateProbe::new(self.settings.endpoints.iter().map(String::as_str));
        let outcome = probe
            .first_success(|endpoint| async move {
                client
                    .post_json(endpoint, json!({"script": program}), Some(window))
                    .await
            })
            .await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(failure) if failure.aborted => {
                return Err(failure
                    .last_error
                    .unwrap_or_else(|| ServiceNowError::script_error("Direct script execution failed")))
            }
            Err(failure) => {
                return Err(ServiceNowError::script_error(
                    "No script execution surface is available on this instance",
                )
                .with_details(json!({
                    "artifact_error": create_err.message,
                    "attempted_endpoints": failure.attempted,
                }))
                .with_suggestion(
                    "Grant the user write access to sysauto_script or install a script execution endpoint.",
                ))
            }
        };

        let text = match &outcome.value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let envelope = match parse_envelope(&text, tag) {
            Some(parsed) => parsed?,
            None => self.capture_output(client, tag, window).await?,
        };
        Ok((envelope, outcome.candidate))
    }

    /// Polls syslog for the tagged envelope until the window closes.
    async fn capture_output(
        &self,
        client: &ServiceNowClient,
        tag: &str,
        window: Duration,
    ) -> Result<OutputEnvelope, ServiceNowError> {
        let deadline = Instant::now() + window;
        let query = EncodedQuery::new()
            .like("message", &format!("{}:{}", script_constants::SENTINEL_NAME, tag))
            .order_by("sys_created_on", true)
            .build();
        let fields = vec!["message".to_string(), "sys_created_on".to_string()];
        let mut polls = 0u32;
        loop {
            tokio::time::sleep(self.settings.poll_interval).await;
            polls += 1;
            let rows = match client.query_table(tables::SYSLOG, Some(&query), &fields, 5).await {
                Ok(rows) => rows,
                Err(err) if err.error_type == ErrorType::AclDenied => {
                    return Err(ServiceNowError::script_error(
                        "Script ran but its output cannot be read from syslog",
                    )
                    .with_details(json!({"cause": err.message})))
                }
                Err(err) => return Err(err),
            };
            for row in &rows {
                if let Some(message) = record_field(row, "message") {
                    if let Some(parsed) = parse_envelope(&message, tag) {
                        return parsed;
                    }
                }
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        Err(ServiceNowError::script_timeout(format!(
            "No script output within {}s",
            window.as_secs()
        ))
        .with_details(json!({"polls": polls, "tag": tag})))
    }
}
