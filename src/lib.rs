#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]

//! # finmcp
//!
//! Tool dispatch for a financial research assistant over the Model Context
//! Protocol.
//!
//! Long-lived MCP servers expose named tools (quotes, news, fundamentals)
//! over WebSocket. Agents use an [`McpClient`] to connect to several servers
//! at once, discover their tools and invoke them by id.
//!
//! ## Features
//!
//! - **Tool registry**: typed tool definitions with parameter validation
//! - **Multi-server catalog**: one view over every connected server
//! - **Concurrent requests**: replies correlated by id, answered in any order
//! - **Resilience**: per-request timeouts, transport retry, reconnect with backoff
//!
//! ## Quick Start
//!
//! ```bash
//! # Start the servers listed in .finmcp.toml
//! finmcp serve
//!
//! # List tools across servers
//! finmcp tools ws://localhost:8080
//!
//! # Invoke one
//! finmcp invoke echo --params '{"message": "hi"}' ws://localhost:8080
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::significant_drop_in_scrutinee)]
#![allow(clippy::map_unwrap_or)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::redundant_clone)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::future_not_send)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::use_self)]

pub mod core;
pub mod mcp;

pub use crate::core::{Config, RetryConfig};
pub use mcp::{
    ClientConfig, McpClient, McpError, McpServer, Message, MessageBody, Parameters, ServerConfig,
    Tool, ToolRegistry, ToolResult,
};
