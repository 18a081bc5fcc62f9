//! Built-in tools served by `finmcp serve`.
//!
//! Market-data tools live in their own server processes; these two exist so
//! a freshly started server can be probed end to end.

use serde_json::{json, Value};

use super::protocol::{Parameter, ParameterType, Tool};
use super::registry::ToolRegistry;

/// Category shared by all built-in tools.
pub const CATEGORY: &str = "system";

/// Ids of every built-in tool.
pub const BUILTIN_TOOLS: &[&str] = &["echo", "server_time"];

/// Register the built-in tools whose ids appear in `enabled`.
///
/// An empty list enables all of them. Unknown ids are logged and skipped.
pub fn register_builtin_tools(registry: &mut ToolRegistry, enabled: &[String]) {
    let wanted = |id: &str| enabled.is_empty() || enabled.iter().any(|e| e == id);

    for name in enabled {
        if !BUILTIN_TOOLS.contains(&name.as_str()) {
            tracing::warn!(tool = %name, "Unknown built-in tool in configuration");
        }
    }

    if wanted("echo") {
        registry.register_sync(
            Tool::new("echo", "Return the given message unchanged")
                .named("Echo")
                .param(Parameter::required("message", ParameterType::String).describe("Text to echo"))
                .in_category(CATEGORY),
            |args| Ok(json!({ "message": args.get("message").cloned().unwrap_or(Value::Null) })),
        );
    }

    if wanted("server_time") {
        registry.register_sync(
            Tool::new("server_time", "Current server time in UTC")
                .named("Server Time")
                .in_category(CATEGORY)
                .capability("real-time"),
            |_| Ok(json!({ "utc": chrono::Utc::now().to_rfc3339() })),
        );
    }
}
