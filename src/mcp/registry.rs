//! Server-side tool registry.
//!
//! Maps tool ids to their metadata and handler. Handlers may be written as
//! plain functions or as async functions; both are wrapped into a single
//! [`ToolHandler`] trait object at registration so dispatch never has to care.

use std::collections::HashMap;
use std::fmt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

use super::error::{HandlerError, RegistryError};
use super::protocol::{json_kind, Arguments, FailureKind, Tool, ToolResult};

/// Executes one tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with already-bound arguments.
    async fn call(&self, args: Arguments) -> Result<Value, HandlerError>;
}

/// Adapter for synchronous handler functions.
pub struct SyncHandler<F>(pub F);

#[async_trait]
impl<F> ToolHandler for SyncHandler<F>
where
    F: Fn(Arguments) -> Result<Value, HandlerError> + Send + Sync,
{
    async fn call(&self, args: Arguments) -> Result<Value, HandlerError> {
        (self.0)(args)
    }
}

/// Adapter for asynchronous handler functions.
pub struct AsyncHandler<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for AsyncHandler<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn call(&self, args: Arguments) -> Result<Value, HandlerError> {
        (self.0)(args).await
    }
}

/// A tool together with its handler.
#[derive(Clone)]
pub struct RegisteredTool {
    /// The tool definition
    pub tool: Tool,
    handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool").field("tool", &self.tool).finish_non_exhaustive()
    }
}

/// Catalog of invocable tools, in registration order.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration with the same id replaces the
    /// earlier one in place.
    pub fn register(&mut self, tool: Tool, handler: Arc<dyn ToolHandler>) {
        let id = tool.id.clone();
        let entry = RegisteredTool { tool, handler };

        if let Some(&position) = self.index.get(&id) {
            tracing::debug!(tool = %id, "Replacing registered tool");
            self.tools[position] = entry;
        } else {
            self.index.insert(id.clone(), self.tools.len());
            self.tools.push(entry);
        }
        tracing::info!(tool = %id, "Registered tool");
    }

    /// Register a synchronous handler function.
    pub fn register_sync<F>(&mut self, tool: Tool, handler: F)
    where
        F: Fn(Arguments) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.register(tool, Arc::new(SyncHandler(handler)));
    }

    /// Register an asynchronous handler function.
    pub fn register_async<F, Fut>(&mut self, tool: Tool, handler: F)
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register(tool, Arc::new(AsyncHandler(handler)));
    }

    /// List tools, optionally restricted to one category.
    pub fn list(&self, category: Option<&str>) -> Vec<Tool> {
        self.tools
            .iter()
            .filter(|entry| category.map_or(true, |c| entry.tool.category.as_deref() == Some(c)))
            .map(|entry| entry.tool.clone())
            .collect()
    }

    /// Get a tool by id.
    pub fn get(&self, id: &str) -> Option<&Tool> {
        self.index.get(id).map(|&i| &self.tools[i].tool)
    }

    /// Get the handler for a tool.
    pub fn get_handler(&self, id: &str) -> Result<Arc<dyn ToolHandler>, RegistryError> {
        self.index
            .get(id)
            .map(|&i| Arc::clone(&self.tools[i].handler))
            .ok_or_else(|| RegistryError::ToolNotFound(id.to_string()))
    }

    /// Check if a tool exists.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Get count of tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run a tool and package the outcome as a [`ToolResult`].
    ///
    /// Never fails: unknown ids, bad arguments and handler errors all come
    /// back as `success: false` results tagged with their [`FailureKind`].
    pub async fn invoke(&self, tool_id: &str, args: Arguments) -> ToolResult {
        let (tool, handler) = match self.index.get(tool_id) {
            Some(&i) => (&self.tools[i].tool, Arc::clone(&self.tools[i].handler)),
            None => {
                let err = RegistryError::ToolNotFound(tool_id.to_string());
                tracing::warn!(tool = %tool_id, "Invocation of unknown tool");
                return ToolResult::failure(tool_id, FailureKind::NotFound, err.to_string());
            }
        };

        let started = Instant::now();
        let outcome = match bind_arguments(tool, args) {
            Ok(bound) => match AssertUnwindSafe(handler.call(bound)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(HandlerError::execution(format!("tool panicked: {}", panic_message(&*panic)))),
            },
            Err(e) => Err(e),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(data) => {
                tracing::debug!(tool = %tool_id, elapsed_ms, "Tool succeeded");
                ToolResult::success(tool_id, data).with_metadata("elapsed_ms", elapsed_ms)
            }
            Err(e @ HandlerError::Parameter(_)) => {
                tracing::warn!(tool = %tool_id, error = %e, "Tool rejected its arguments");
                ToolResult::failure(tool_id, FailureKind::Parameter, e.to_string())
            }
            Err(e @ HandlerError::Execution(_)) => {
                tracing::error!(tool = %tool_id, error = %e, "Tool execution failed");
                ToolResult::failure(tool_id, FailureKind::Execution, e.to_string())
                    .with_metadata("elapsed_ms", elapsed_ms)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Check arguments against a tool's declared parameters.
///
/// Fills in defaults for omitted optional parameters. A lone `input`
/// argument is moved to the first required parameter when the tool does not
/// declare `input` itself.
pub fn bind_arguments(tool: &Tool, mut args: Arguments) -> Result<Arguments, HandlerError> {
    if args.len() == 1 && args.contains_key("input") && tool.parameter("input").is_none() {
        let target = tool.parameters.iter().find(|p| p.required).or_else(|| tool.parameters.first());
        if let Some(target) = target {
            if let Some(value) = args.remove("input") {
                args.insert(target.name.clone(), value);
            }
        }
    }

    if let Some(unknown) = args.keys().find(|name| tool.parameter(name).is_none()) {
        return Err(HandlerError::parameter(format!("unexpected parameter '{}'", unknown)));
    }

    for param in &tool.parameters {
        match args.get(&param.name) {
            Some(value) => {
                if !param.param_type.matches(value) {
                    return Err(HandlerError::parameter(format!(
                        "'{}' must be of type {}, got {}",
                        param.name,
                        param.param_type,
                        json_kind(value)
                    )));
                }
                if let Some(ref allowed) = param.allowed {
                    if !allowed.contains(value) {
                        return Err(HandlerError::parameter(format!(
                            "'{}' must be one of {}",
                            param.name,
                            Value::from(allowed.clone())
                        )));
                    }
                }
            }
            None if param.required => {
                return Err(HandlerError::parameter(format!(
                    "missing required parameter '{}'",
                    param.name
                )));
            }
            None => {
                if let Some(ref default) = param.default {
                    args.insert(param.name.clone(), default.clone());
                }
            }
        }
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{Parameter, ParameterType};
    use serde_json::json;

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn quote_tool() -> Tool {
        Tool::new("get_quote", "Get a stock quote")
            .param(Parameter::required("symbol", ParameterType::String))
            .param(Parameter::optional("include_extended", ParameterType::Boolean).with_default(false))
            .param(
                Parameter::optional("interval", ParameterType::String)
                    .with_default("1d")
                    .one_of(["1d", "1wk", "1mo"]),
            )
            .in_category("financial_data")
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_sync(quote_tool(), |args| Ok(json!({"symbol": args["symbol"], "price": 187.5})));
        registry.register_async(Tool::new("get_news", "Latest headlines").in_category("news"), |_| async {
            Ok(json!(["headline"]))
        });
        registry.register_sync(Tool::new("explode", "Always fails"), |_| {
            Err(HandlerError::execution("upstream API error"))
        });
        registry
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_execution_failure() {
        let mut registry = registry();
        registry.register_sync(Tool::new("boom", "Panics"), |_| panic!("kaboom"));
        registry.register_async(Tool::new("boom_later", "Panics after a yield"), |_| async {
            tokio::task::yield_now().await;
            panic!("{} failed", "feed")
        });

        let result = registry.invoke("boom", Arguments::new()).await;
        assert!(!result.success);
        assert_eq!(result.failure_kind(), Some(FailureKind::Execution));
        assert!(result.error.unwrap().contains("kaboom"));

        let result = registry.invoke("boom_later", Arguments::new()).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Execution));
        assert!(result.error.unwrap().contains("feed failed"));

        // The registry keeps serving other tools
        assert!(registry.invoke("get_news", Arguments::new()).await.success);
    }

    #[test]
    fn test_list_preserves_registration_order() {
        let registry = registry();
        let ids: Vec<_> = registry.list(None).into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["get_quote", "get_news", "explode"]);

        let news: Vec<_> = registry.list(Some("news")).into_iter().map(|t| t.id).collect();
        assert_eq!(news, vec!["get_news"]);
        assert!(registry.list(Some("nothing")).is_empty());
    }

    #[test]
    fn test_listed_tool_matches_registration() {
        let registry = registry();
        let listed = registry.list(None).into_iter().find(|t| t.id == "get_quote").unwrap();
        assert_eq!(listed, quote_tool());
    }

    #[test]
    fn test_reregistration_replaces_in_place() {
        let mut registry = registry();
        registry.register_sync(Tool::new("get_quote", "v2"), |_| Ok(json!(2)));

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("get_quote").unwrap().description, "v2");
        assert_eq!(registry.list(None)[0].id, "get_quote");
    }

    #[test]
    fn test_get_handler_unknown() {
        let registry = registry();
        assert!(registry.get_handler("get_news").is_ok());
        assert_eq!(
            registry.get_handler("nope").err(),
            Some(RegistryError::ToolNotFound("nope".to_string()))
        );
    }

    #[test]
    fn test_bind_fills_defaults() {
        let bound = bind_arguments(&quote_tool(), args(json!({"symbol": "AAPL"}))).unwrap();
        assert_eq!(bound["include_extended"], json!(false));
        assert_eq!(bound["interval"], json!("1d"));
    }

    #[test]
    fn test_bind_rejections() {
        let tool = quote_tool();
        let missing = bind_arguments(&tool, Arguments::new()).unwrap_err();
        assert!(missing.to_string().contains("missing required parameter 'symbol'"));

        let wrong_type = bind_arguments(&tool, args(json!({"symbol": 42}))).unwrap_err();
        assert!(wrong_type.to_string().contains("must be of type string"));

        let bad_enum = bind_arguments(&tool, args(json!({"symbol": "A", "interval": "1h"}))).unwrap_err();
        assert!(bad_enum.to_string().contains("must be one of"));

        let unknown = bind_arguments(&tool, args(json!({"symbol": "A", "foo": 1}))).unwrap_err();
        assert!(unknown.to_string().contains("unexpected parameter 'foo'"));
    }

    #[test]
    fn test_bind_input_alias() {
        let bound = bind_arguments(&quote_tool(), args(json!({"input": "TSLA"}))).unwrap();
        assert_eq!(bound["symbol"], "TSLA");
        assert!(!bound.contains_key("input"));
    }

    #[tokio::test]
    async fn test_invoke_sync_and_async() {
        let registry = registry();

        let quote = registry.invoke("get_quote", args(json!({"symbol": "AAPL"}))).await;
        assert!(quote.success);
        assert_eq!(quote.data.unwrap()["price"], json!(187.5));
        assert!(quote.metadata.contains_key("elapsed_ms"));

        let news = registry.invoke("get_news", Arguments::new()).await;
        assert!(news.success);
        assert_eq!(news.data, Some(json!(["headline"])));
    }

    #[tokio::test]
    async fn test_invoke_failures_are_tagged() {
        let registry = registry();

        let missing = registry.invoke("nope", Arguments::new()).await;
        assert_eq!(missing.error.as_deref(), Some("Tool not found: nope"));
        assert_eq!(missing.failure_kind(), Some(FailureKind::NotFound));

        let bad = registry.invoke("get_quote", Arguments::new()).await;
        assert_eq!(bad.failure_kind(), Some(FailureKind::Parameter));
        assert!(bad.error.unwrap().starts_with("Parameter error: "));

        let failed = registry.invoke("explode", Arguments::new()).await;
        assert_eq!(failed.failure_kind(), Some(FailureKind::Execution));
        assert_eq!(failed.error.as_deref(), Some("upstream API error"));
    }

    #[tokio::test]
    async fn test_handler_parameter_error_message() {
        let mut registry = ToolRegistry::new();
        registry.register_sync(Tool::new("strict", "Rejects everything"), |_| {
            Err(HandlerError::parameter("bad arg"))
        });

        let result = registry.invoke("strict", Arguments::new()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Parameter error: bad arg"));
    }
}
