//! Error types for the MCP layer.

use std::time::Duration;

/// Error type for client and transport operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid server URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("No MCP server could be reached")]
    NoServersAvailable,

    #[error("Failed to connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Connection to {0} was lost")]
    ConnectionLost(String),

    #[error("Not connected to {0}")]
    NotConnected(String),

    #[error("Timeout after {after:?} waiting for response to {request_id}")]
    Timeout { request_id: String, after: Duration },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Server error: {0}")]
    Remote(String),

    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: &'static str, actual: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether the error comes from the transport and may clear up on retry.
    ///
    /// Timeouts are only considered transient when `include_timeout` is set.
    pub fn is_transient(&self, include_timeout: bool) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::ConnectionLost(_) | Self::NotConnected(_) => true,
            Self::Timeout { .. } => include_timeout,
            _ => false,
        }
    }
}

/// Error raised by a tool handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Arguments do not fit the tool's parameters
    #[error("Parameter error: {0}")]
    Parameter(String),

    /// The tool ran and failed
    #[error("{0}")]
    Execution(String),
}

impl HandlerError {
    /// Create a parameter error.
    pub fn parameter(message: impl Into<String>) -> Self {
        Self::Parameter(message.into())
    }

    /// Create an execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parameter(err.to_string())
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Execution(format!("{:#}", err))
    }
}

/// Error type for registry lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),
}
