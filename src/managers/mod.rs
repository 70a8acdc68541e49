pub mod connection;
pub mod instance;
pub mod logs;
pub mod query;
pub mod script;
