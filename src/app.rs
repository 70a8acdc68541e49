use crate::config::ServerConfig;
use crate::constants::tools;
use crate::errors::ServiceNowError;
use crate::managers;
use crate::mcp::aliases::builtin_tool_alias_map_owned;
use crate::mcp::catalog::tool_catalog;
use crate::services::credentials::{CredentialStore, FileCredentialStore};
use crate::services::logger::Logger;
use crate::services::tool_executor::{ToolExecutor, ToolHandler};
use crate::servicenow::connection::ConnectionManager;
use crate::servicenow::executor::{ExecutorSettings, ScriptExecutor};
use crate::servicenow::transport::{HttpTransport, ReqwestTransport};
use std::collections::HashMap;
use std::sync::Arc;

pub struct App {
    pub logger: Logger,
    pub config: ServerConfig,
    pub connections: Arc<ConnectionManager>,
    pub tool_executor: Arc<ToolExecutor>,
}

impl App {
    fn validate_tool_wiring(
        handlers: &HashMap<String, Arc<dyn ToolHandler>>,
    ) -> Result<(), ServiceNowError> {
        let mut missing: Vec<String> = tool_catalog()
            .iter()
            .filter(|tool| !handlers.contains_key(&tool.name))
            .map(|tool| tool.name.clone())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        Err(ServiceNowError::unknown("Tool wiring is incomplete")
            .with_details(serde_json::json!({ "missing_tools": missing }))
            .with_suggestion("Every tool in tool_catalog.json needs a handler."))
    }

    /// Production wiring: env config, reqwest transport, credentials file.
    pub fn initialize() -> Result<Self, ServiceNowError> {
        let logger = Logger::new("servicenow");
        let config = ServerConfig::from_env();
        let transport = ReqwestTransport::new()
            .map_err(|err| ServiceNowError::unknown(format!("HTTP client setup failed: {}", err)))?;
        let credentials = FileCredentialStore::new(logger.clone(), config.credentials_path.clone());
        Self::with_parts(logger, config, Arc::new(transport), Arc::new(credentials))
    }

    pub fn with_parts(
        logger: Logger,
        config: ServerConfig,
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, ServiceNowError> {
        let connections = Arc::new(ConnectionManager::new(
            logger.clone(),
            &config,
            transport,
            credentials,
        ));
        let executor = Arc::new(ScriptExecutor::new(
            logger.clone(),
            ExecutorSettings {
                poll_interval: config.script_poll_interval,
                poll_window: config.script_poll_window,
                endpoints: config.script_endpoints.clone(),
            },
        ));

        let session_manager = Arc::new(managers::connection::SessionToolManager::new(
            logger.clone(),
            connections.clone(),
        ));
        let query_manager = Arc::new(managers::query::QueryManager::new(
            logger.clone(),
            connections.clone(),
        ));
        let log_manager = Arc::new(managers::logs::LogManager::new(
            logger.clone(),
            connections.clone(),
        ));
        let script_manager = Arc::new(managers::script::ScriptManager::new(
            logger.clone(),
            connections.clone(),
            executor,
        ));
        let instance_manager = Arc::new(managers::instance::InstanceManager::new(
            logger.clone(),
            connections.clone(),
        ));

        let mut handlers: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
        for name in [tools::CONNECT, tools::DISCONNECT, tools::SELECT, tools::STATUS] {
            handlers.insert(name.to_string(), session_manager.clone());
        }
        handlers.insert(tools::QUERY.to_string(), query_manager);
        handlers.insert(tools::SYSLOGS.to_string(), log_manager.clone());
        handlers.insert(tools::AIA_LOGS.to_string(), log_manager);
        handlers.insert(tools::SCRIPT.to_string(), script_manager);
        handlers.insert(tools::INSTANCE.to_string(), instance_manager);

        Self::validate_tool_wiring(&handlers)?;
        let tool_executor = Arc::new(ToolExecutor::new(
            logger.clone(),
            handlers,
            builtin_tool_alias_map_owned(),
        ));

        Ok(Self {
            logger,
            config,
            connections,
            tool_executor,
        })
    }
}
