use serde::Serialize;

/// JSON-RPC 2.0 error codes the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(i32)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn default_message(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
        }
    }
}

/// Protocol-level failure, reported as a JSON-RPC error object rather than a
/// tool result. ServiceNow failures never travel this way.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct McpError {
    pub code: ErrorCode,
    pub message: String,
}

impl McpError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn unknown_tool(tool: &str, suggestions: &[String]) -> Self {
        let message = if suggestions.is_empty() {
            format!("Unknown tool: {}", tool)
        } else {
            format!("Unknown tool: {}. Did you mean: {}", tool, suggestions.join(", "))
        };
        Self::invalid_params(message)
    }
}
