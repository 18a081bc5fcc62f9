//! MCP (Model Context Protocol) tool dispatch.
//!
//! Servers expose a registry of named tools over WebSocket; clients connect
//! to several servers at once, merge their catalogs and invoke tools by id.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                    McpClient                      │
//! │  • Catalog: tool id → owning server              │
//! │  • Pending requests keyed by correlation id      │
//! │  • Reconnect with backoff per server             │
//! └──────────────────────────────────────────────────┘
//!        │ ws://          │ ws://          │ ws://
//!        ▼                ▼                ▼
//!    McpServer        McpServer        McpServer
//!   (market data)      (news)        (fundamentals)
//!        │
//!        ▼
//!   ToolRegistry → ToolHandler
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use finmcp::mcp::{ClientConfig, McpClient};
//!
//! let client = McpClient::new(ClientConfig::with_servers(["ws://localhost:8081"]));
//! client.connect_configured().await?;
//!
//! let result = client.invoke("get_quote", serde_json::json!({"symbol": "AAPL"})).await?;
//! if result.success {
//!     println!("{}", result.data);
//! }
//!
//! client.disconnect().await;
//! ```

mod builtin;
mod catalog;
mod client;
mod error;
mod pending;
mod protocol;
mod registry;
mod server;

pub use builtin::{register_builtin_tools, BUILTIN_TOOLS};
pub use catalog::{Catalog, CatalogEntry};
pub use client::{validate_url, ClientConfig, ConnectionState, HealthReport, McpClient};
pub use error::{HandlerError, McpError, RegistryError};
pub use pending::PendingRequests;
pub use protocol::{
    json_kind, peek_id, timestamp_now, Arguments, FailureKind, Message, MessageBody, Parameter,
    ParameterSchema, ParameterType, Parameters, PropertySchema, ServerInfo, Tool, ToolResult,
    ERROR_KIND_KEY, PROTOCOL_VERSION,
};
pub use registry::{bind_arguments, AsyncHandler, RegisteredTool, SyncHandler, ToolHandler, ToolRegistry};
pub use server::{McpServer, ServerConfig, TOOL_UPDATE_EVENT};
