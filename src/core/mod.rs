//! Core infrastructure for finmcp.
//!
//! Configuration loading and the retry policy shared by the MCP client.

mod config;
mod retry;

pub use config::{ClientSettings, Config, LoggingConfig, ServerSettings, LOCAL_CONFIG_FILE};
pub use retry::{retry_async_if, RetryConfig, RetryResult};
