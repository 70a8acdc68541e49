pub mod network {
    pub const TIMEOUT_REQUEST_MS: u64 = 30_000;
    pub const USER_AGENT: &str = concat!("servicenow-mcp/", env!("CARGO_PKG_VERSION"));
    pub const INSTANCE_DOMAIN_SUFFIX: &str = ".service-now.com";
}

pub mod retry {
    pub const MAX_RETRIES: u32 = 3;
    pub const INITIAL_DELAY_MS: u64 = 1_000;
    pub const MAX_DELAY_MS: u64 = 10_000;
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
}

pub mod limits {
    pub const QUERY_DEFAULT_LIMIT: usize = 20;
    pub const QUERY_MAX_LIMIT: usize = 500;
    pub const SYSLOG_DEFAULT_LIMIT: usize = 50;
    pub const SYSLOG_MAX_LIMIT: usize = 500;
    pub const AIA_DEFAULT_LIMIT: usize = 20;
    pub const AIA_MAX_LIMIT: usize = 100;
    pub const AIA_TOOL_CALLS_PER_EXECUTION: usize = 25;
    pub const FIELD_VALUE_MAX_CHARS: usize = 500;
    pub const LOG_MESSAGE_MAX_CHARS: usize = 1_000;
    pub const PLUGIN_LIST_LIMIT: usize = 200;
    pub const ROLE_LOOKUP_LIMIT: usize = 500;
}

pub mod script {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
    pub const MAX_TIMEOUT_SECS: u64 = 120;
    pub const POLL_INTERVAL_MS: u64 = 2_000;
    pub const POLL_WINDOW_MS: u64 = 30_000;
    pub const SENTINEL_NAME: &str = "SNOW_EXEC";
    pub const ARTIFACT_TABLE: &str = "sysauto_script";
    pub const ARTIFACT_NAME_PREFIX: &str = "mcp_exec_";
    pub const DIRECT_ENDPOINTS: &[&str] = &[
        "/api/now/v1/script/execute",
        "/api/global/mcp_script_runner/execute",
    ];
}

pub mod tables {
    /// Credential and role-membership tables the query tool never reads.
    pub const RESTRICTED: &[&str] = &[
        "sys_user_has_role",
        "sys_user_grmember",
        "sys_user_has_password",
        "discovery_credentials",
        "sys_auth_profile_basic",
        "sys_auth_profile",
        "oauth_credential",
        "oauth_entity",
        "sys_certificate",
        "sys_user_token",
    ];

    pub const SYSLOG: &str = "syslog";
    pub const PROPERTIES: &str = "sys_properties";
    pub const USERS: &str = "sys_user";
    pub const USER_ROLES: &str = "sys_user_has_role";
    pub const CLUSTER_STATE: &str = "sys_cluster_state";
    pub const PLUGIN_REGISTRIES: &[&str] = &["v_plugin", "sys_plugins"];
}

pub mod properties {
    pub const BUILD_TAG: &str = "glide.buildtag";
    pub const BUILD_NAME: &str = "glide.buildname";
    pub const BUILD_DATE: &str = "glide.builddate";
    pub const WAR: &str = "glide.war";
}

pub mod redaction {
    pub const MARKER: &str = "[REDACTED]";
}

pub mod tools {
    pub const CONNECT: &str = "servicenow_connect";
    pub const DISCONNECT: &str = "servicenow_disconnect";
    pub const SELECT: &str = "servicenow_select";
    pub const STATUS: &str = "servicenow_status";
    pub const QUERY: &str = "servicenow_query";
    pub const SYSLOGS: &str = "servicenow_syslogs";
    pub const AIA_LOGS: &str = "servicenow_aia_logs";
    pub const SCRIPT: &str = "servicenow_script";
    pub const INSTANCE: &str = "servicenow_instance";
}
