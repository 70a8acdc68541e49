mod mcp_error;
mod servicenow_error;

pub use mcp_error::{ErrorCode, McpError};
pub use servicenow_error::{ErrorType, ServiceNowError};
