use crate::errors::ServiceNowError;
use crate::servicenow::script_safety::{analyze, MutationCall, ScriptAnalysisResult};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::str::FromStr;

/// GlideRecord methods the readonly façade records instead of running.
pub const INTERCEPTED_METHODS: &[&str] = &[
    "insert",
    "update",
    "deleteRecord",
    "deleteMultiple",
    "updateMultiple",
    "insertWithReferences",
    "updateWithReferences",
];

/// Read-side GlideRecord methods the façade forwards to the real record.
const DELEGATED_METHODS: &[&str] = &[
    "addQuery",
    "addEncodedQuery",
    "addActiveQuery",
    "addInactiveQuery",
    "addNullQuery",
    "addNotNullQuery",
    "addJoinQuery",
    "addDomainQuery",
    "query",
    "_query",
    "next",
    "_next",
    "hasNext",
    "get",
    "getValue",
    "getDisplayValue",
    "getElement",
    "getElements",
    "getFields",
    "getUniqueValue",
    "getRowCount",
    "getTableName",
    "getRecordClassName",
    "getClassDisplayValue",
    "getLabel",
    "getLink",
    "getEncodedQuery",
    "getLastErrorMessage",
    "setLimit",
    "chooseWindow",
    "orderBy",
    "orderByDesc",
    "initialize",
    "newRecord",
    "setValue",
    "setDisplayValue",
    "isValid",
    "isValidRecord",
    "isValidField",
    "isNewRecord",
    "canRead",
    "canWrite",
    "canCreate",
    "canDelete",
    "setCategory",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Readonly,
    Execute,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Readonly => "readonly",
            ExecutionMode::Execute => "execute",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = ServiceNowError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "" | "readonly" | "read-only" | "read_only" => Ok(ExecutionMode::Readonly),
            "execute" => Ok(ExecutionMode::Execute),
            other => Err(ServiceNowError::script_error(format!(
                "Unknown execution mode: {}",
                other
            ))
            .with_suggestion("Use mode readonly or execute.")),
        }
    }
}

/// A script cleared for execution, with the bindings it will run under.
#[derive(Debug, Clone)]
pub struct PreparedScript {
    pub mode: ExecutionMode,
    pub source: String,
    pub wrapped: bool,
    pub analysis: ScriptAnalysisResult,
}

impl PreparedScript {
    /// Mutation calls the façade is expected to intercept.
    pub fn predicted_mutations(&self) -> &[MutationCall] {
        if self.wrapped {
            &self.analysis.mutation_calls
        } else {
            &[]
        }
    }

    /// Body that binds `GlideRecord`/`GlideRecordSecure` for the user function:
    /// façade constructors in readonly mode, the platform ones otherwise.
    pub fn binding_prelude(&self) -> String {
        if self.wrapped {
            facade_prelude()
        } else {
            "var __GR = GlideRecord;\nvar __GRS = (typeof GlideRecordSecure !== 'undefined') ? GlideRecordSecure : GlideRecord;\n".to_string()
        }
    }
}

/// Refuses blocked or structurally broken scripts; otherwise decides the
/// bindings. Readonly always runs behind the façade so mutation calls the
/// static scan cannot see are still intercepted.
pub fn prepare(script: &str, mode: ExecutionMode) -> Result<PreparedScript, ServiceNowError> {
    let analysis = analyze(script);
    if !analysis.safe {
        return Err(ServiceNowError::script_blocked(format!(
            "Script blocked: {}",
            analysis.blocked_reasons.join("; ")
        ))
        .with_details(json!({
            "mode": mode.as_str(),
            "blocked_patterns": analysis.blocked_patterns,
            "reasons": analysis.blocked_reasons,
        })));
    }
    if let Some(syntax) = &analysis.syntax_error {
        return Err(
            ServiceNowError::script_error(format!("Script is not valid: {}", syntax))
                .with_details(json!({"stage": "syntax_check"})),
        );
    }
    Ok(PreparedScript {
        mode,
        source: script.to_string(),
        wrapped: mode == ExecutionMode::Readonly,
        analysis,
    })
}

fn js_string_array(items: &[&str]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| format!("'{}'", s)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Defines `__GR`/`__GRS`: constructors returning per-record façades. Each
/// façade owns a real record for reads and replaces the intercepted methods
/// with recorders that append to `__mutations`. Nothing global is patched.
fn facade_prelude() -> String {
    let mut js = String::new();
    js.push_str("var __intercepted = ");
    js.push_str(&js_string_array(INTERCEPTED_METHODS));
    js.push_str(";\nvar __delegated = ");
    js.push_str(&js_string_array(DELEGATED_METHODS));
    js.push_str(";\n");
    js.push_str(
        r#"function __bindFields(facade, real) {
  if (facade.__fieldsBound) { return; }
  var fields = null;
  try { fields = real.getFields(); } catch (e) { fields = null; }
  if (!fields) { return; }
  for (var i = 0; i < fields.size(); i++) {
    (function (name) {
      if (name in facade) { return; }
      try {
        Object.defineProperty(facade, name, {
          get: function () { return real[name]; },
          set: function (v) { real.setValue(name, v); },
          enumerable: true,
          configurable: true
        });
      } catch (e) {}
    })(String(fields.get(i).getName()));
  }
  facade.__fieldsBound = true;
}
function __makeFacade(Real, table) {
  var real = new Real(table);
  var facade = { __real: real, __table: String(table), __fieldsBound: false };
  for (var d = 0; d < __delegated.length; d++) {
    (function (name) {
      facade[name] = function () {
        var out = real[name].apply(real, arguments);
        if (name === 'next' || name === '_next' || name === 'get' || name === 'initialize' || name === 'newRecord') {
          __bindFields(facade, real);
        }
        return out;
      };
    })(__delegated[d]);
  }
  for (var m = 0; m < __intercepted.length; m++) {
    (function (method) {
      facade[method] = function () {
        var sysId = null;
        try { sysId = String(real.getUniqueValue() || '') || null; } catch (e) { sysId = null; }
        __mutations.push({ table: facade.__table, method: method, sys_id: sysId, encoded_query: (function () { try { return String(real.getEncodedQuery() || ''); } catch (e) { return ''; } })() });
        if (method === 'insert' || method === 'insertWithReferences') { return null; }
        if (method === 'update' || method === 'updateWithReferences') { return sysId; }
        if (method === 'deleteRecord') { return true; }
        return undefined;
      };
    })(__intercepted[m]);
  }
  __bindFields(facade, real);
  return facade;
}
var __GR = function (table) { return __makeFacade(GlideRecord, table); };
var __GRS = function (table) { return __makeFacade((typeof GlideRecordSecure !== 'undefined') ? GlideRecordSecure : GlideRecord, table); };
"#,
    );
    js
}
