pub mod auth;
pub mod client;
pub mod connection;
pub mod executor;
pub mod fields;
pub mod probe;
pub mod readonly;
pub mod retry;
pub mod script_safety;
pub mod transport;
pub mod types;
