//! MCP Protocol types.
//!
//! Wire shapes for the tool-dispatch protocol. Every frame is a JSON object
//! carrying an `id`, a `type` tag and a `timestamp`, plus fields that depend
//! on the type. The transport (WebSocket) never looks inside these.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version advertised in discovery responses.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Argument map passed to tool handlers.
pub type Arguments = Map<String, Value>;

/// Current time as an RFC 3339 string.
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ============================================================================
// Tool metadata
// ============================================================================

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParameterType {
    /// Get the wire name of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    /// Check whether a JSON value has this type.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, typed input of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name
    pub name: String,
    /// Parameter type
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    /// Human readable description
    #[serde(default)]
    pub description: String,
    /// Whether the caller must supply it
    #[serde(default = "default_required")]
    pub required: bool,
    /// Value used when the caller omits it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Allowed values, if restricted
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

fn default_required() -> bool {
    true
}

impl Parameter {
    /// Create a required parameter.
    pub fn required(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: true,
            default: None,
            allowed: None,
        }
    }

    /// Create an optional parameter.
    pub fn optional(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self { required: false, ..Self::required(name, param_type) }
    }

    /// Set the description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Restrict the parameter to a set of values.
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// Tool definition as published in a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Unique tool identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Tool description
    #[serde(default)]
    pub description: String,
    /// Ordered parameter list
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Optional grouping used for filtered discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Tool version
    #[serde(default = "default_tool_version")]
    pub version: String,
    /// Free-form capability tags (e.g. "cached", "real-time")
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

fn default_tool_version() -> String {
    "1.0.0".to_string()
}

impl Tool {
    /// Create a tool whose display name equals its id.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: description.into(),
            parameters: Vec::new(),
            category: None,
            version: default_tool_version(),
            capabilities: Vec::new(),
        }
    }

    /// Set the display name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append a parameter.
    pub fn param(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Set the category.
    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Add a capability tag.
    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Look up a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Flatten the parameter list into an object schema.
    pub fn to_parameter_schema(&self) -> ParameterSchema {
        let properties = self
            .parameters
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    PropertySchema {
                        param_type: p.param_type,
                        description: p.description.clone(),
                        default: p.default.clone(),
                        allowed: p.allowed.clone(),
                    },
                )
            })
            .collect();

        ParameterSchema {
            schema_type: "object".to_string(),
            properties,
            required: self.parameters.iter().filter(|p| p.required).map(|p| p.name.clone()).collect(),
        }
    }

    /// Convert to the tool format consumed by LLM tool-selection prompts.
    pub fn to_prompt_tool(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.to_parameter_schema(),
        })
    }
}

/// Flattened object schema of a tool's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Schema type (always "object")
    #[serde(rename = "type")]
    pub schema_type: String,
    /// Properties by name
    pub properties: BTreeMap<String, PropertySchema>,
    /// Names of required properties
    pub required: Vec<String>,
}

impl ParameterSchema {
    /// Rebuild a parameter list. Properties come back in name order.
    pub fn to_parameters(&self) -> Vec<Parameter> {
        self.properties
            .iter()
            .map(|(name, prop)| Parameter {
                name: name.clone(),
                param_type: prop.param_type,
                description: prop.description.clone(),
                required: self.required.contains(name),
                default: prop.default.clone(),
                allowed: prop.allowed.clone(),
            })
            .collect()
    }
}

/// One property in a [`ParameterSchema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Property type
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    /// Property description
    #[serde(default)]
    pub description: String,
    /// Default value (null when absent)
    #[serde(default)]
    pub default: Option<Value>,
    /// Allowed values
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

// ============================================================================
// Results
// ============================================================================

/// Why a tool invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The server has no tool with the requested id
    NotFound,
    /// The caller sent arguments that do not fit the tool
    Parameter,
    /// The tool ran and failed
    Execution,
}

impl FailureKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Parameter => "parameter",
            Self::Execution => "execution",
        }
    }
}

/// Metadata key holding the [`FailureKind`] of a failed result.
pub const ERROR_KIND_KEY: &str = "error_kind";

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool that produced the result
    pub tool_id: String,
    /// Whether the call was successful
    pub success: bool,
    /// Payload returned by the tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Additional information about the execution
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ToolResult {
    /// Create a successful result.
    pub fn success(tool_id: impl Into<String>, data: Value) -> Self {
        Self {
            tool_id: tool_id.into(),
            success: true,
            data: Some(data),
            error: None,
            metadata: Map::new(),
        }
    }

    /// Create a failed result tagged with its kind.
    pub fn failure(tool_id: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        let mut metadata = Map::new();
        metadata.insert(ERROR_KIND_KEY.to_string(), Value::from(kind.as_str()));
        Self { tool_id: tool_id.into(), success: false, data: None, error: Some(message.into()), metadata }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Get the failure kind, if this is a tagged failure.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        if self.success {
            return None;
        }
        self.metadata.get(ERROR_KIND_KEY).cloned().and_then(|v| serde_json::from_value(v).ok())
    }
}

// ============================================================================
// Parameters at the caller boundary
// ============================================================================

/// Tool arguments as handed over by a caller.
///
/// LLM tool loops produce either a structured object or a raw string; the
/// union is resolved once with [`Parameters::into_map`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Parameters {
    /// Already structured arguments
    Structured(Arguments),
    /// Unparsed text
    RawText(String),
}

impl Parameters {
    /// Resolve into an argument map.
    ///
    /// Raw text holding a JSON object is parsed; text that is not JSON at all
    /// becomes `{"input": text}`. JSON that is not an object is rejected.
    pub fn into_map(self) -> Result<Arguments, String> {
        match self {
            Self::Structured(map) => Ok(map),
            Self::RawText(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Ok(Map::new());
                }
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(Value::Object(map)) => Ok(map),
                    Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
                    Err(_) => {
                        let mut map = Map::new();
                        map.insert("input".to_string(), Value::String(text));
                        Ok(map)
                    }
                }
            }
        }
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self::Structured(Map::new())
    }
}

impl From<Arguments> for Parameters {
    fn from(map: Arguments) -> Self {
        Self::Structured(map)
    }
}

impl From<String> for Parameters {
    fn from(text: String) -> Self {
        Self::RawText(text)
    }
}

impl From<&str> for Parameters {
    fn from(text: &str) -> Self {
        Self::RawText(text.to_string())
    }
}

impl From<Value> for Parameters {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Structured(map),
            Value::String(text) => Self::RawText(text),
            Value::Null => Self::default(),
            other => Self::RawText(other.to_string()),
        }
    }
}

/// Short name of a JSON value's type, for error messages.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Message envelope
// ============================================================================

/// Static description of a server, returned with its catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
    /// Protocol version
    pub protocol_version: String,
    /// Capability flags
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Wire envelope shared by every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Creation time (RFC 3339)
    #[serde(default = "timestamp_now")]
    pub timestamp: String,
    /// Type-specific payload, tagged by `type`
    #[serde(flatten)]
    pub body: MessageBody,
}

/// Message payloads keyed by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    /// Ask for the tool catalog
    ToolListRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
    },
    /// Tool catalog
    ToolListResponse {
        tools: Vec<Tool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_info: Option<ServerInfo>,
    },
    /// Invoke a tool
    ToolRequest {
        tool_id: String,
        #[serde(default)]
        parameters: Parameters,
    },
    /// Result of an invocation
    ToolResponse { result: ToolResult },
    /// Register interest in an event stream
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event: Option<String>,
    },
    /// Subscription acknowledgement
    SubscribeResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event: Option<String>,
        subscribed: bool,
    },
    /// Drop interest in an event stream
    Unsubscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event: Option<String>,
    },
    /// Unsubscription acknowledgement
    UnsubscribeResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event: Option<String>,
        unsubscribed: bool,
    },
    /// Liveness probe
    Health {},
    /// Liveness report
    HealthResponse { status: String, connected_clients: usize, registered_tools: usize },
    /// Server push of its complete catalog
    ToolUpdate { tools: Vec<Tool> },
    /// Protocol-level error
    Error { error: String },
}

impl MessageBody {
    /// Get the wire name of this message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ToolListRequest { .. } => "tool_list_request",
            Self::ToolListResponse { .. } => "tool_list_response",
            Self::ToolRequest { .. } => "tool_request",
            Self::ToolResponse { .. } => "tool_response",
            Self::Subscribe { .. } => "subscribe",
            Self::SubscribeResponse { .. } => "subscribe_response",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::UnsubscribeResponse { .. } => "unsubscribe_response",
            Self::Health {} => "health",
            Self::HealthResponse { .. } => "health_response",
            Self::ToolUpdate { .. } => "tool_update",
            Self::Error { .. } => "error",
        }
    }
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(id: Option<String>, body: MessageBody) -> Self {
        Self { id, timestamp: timestamp_now(), body }
    }

    /// Create a request with the given correlation id.
    pub fn request(id: impl Into<String>, body: MessageBody) -> Self {
        Self::new(Some(id.into()), body)
    }

    /// Create a catalog request.
    pub fn tool_list_request(id: impl Into<String>, category: Option<String>) -> Self {
        Self::request(id, MessageBody::ToolListRequest { category })
    }

    /// Create a tool invocation request.
    pub fn tool_request(id: impl Into<String>, tool_id: impl Into<String>, arguments: Arguments) -> Self {
        Self::request(
            id,
            MessageBody::ToolRequest {
                tool_id: tool_id.into(),
                parameters: Parameters::Structured(arguments),
            },
        )
    }

    /// Create an error message answering `id`.
    pub fn error(id: Option<String>, error: impl Into<String>) -> Self {
        Self::new(id, MessageBody::Error { error: error.into() })
    }

    /// Get the wire name of this message's type.
    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Best-effort extraction of the `id` of an undecodable frame.
pub fn peek_id(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("id").and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quote_tool() -> Tool {
        Tool::new("get_quote", "Get a stock quote")
            .named("Get Stock Quote")
            .param(Parameter::required("symbol", ParameterType::String).describe("Ticker"))
            .param(Parameter::optional("include_extended", ParameterType::Boolean).with_default(false))
            .param(
                Parameter::optional("interval", ParameterType::String)
                    .with_default("1d")
                    .one_of(["1d", "1wk", "1mo"]),
            )
            .in_category("financial_data")
    }

    #[test]
    fn test_tool_request_wire_shape() {
        let mut args = Map::new();
        args.insert("symbol".to_string(), json!("AAPL"));
        let message = Message::tool_request("req-1", "get_quote", args);

        let value: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(value["id"], "req-1");
        assert_eq!(value["type"], "tool_request");
        assert_eq!(value["tool_id"], "get_quote");
        assert_eq!(value["parameters"]["symbol"], "AAPL");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_parse_health_without_timestamp() {
        let message = Message::from_json(r#"{"id": "h1", "type": "health"}"#).unwrap();
        assert_eq!(message.body, MessageBody::Health {});
        assert_eq!(message.id.as_deref(), Some("h1"));
        assert!(!message.timestamp.is_empty());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(Message::from_json(r#"{"id": "x", "type": "launch_rockets"}"#).is_err());
        assert_eq!(peek_id(r#"{"id": "x", "type": "launch_rockets"}"#).as_deref(), Some("x"));
        assert_eq!(peek_id("not json"), None);
    }

    #[test]
    fn test_tool_response_parses_result() {
        let text = r#"{
            "id": "r1",
            "type": "tool_response",
            "timestamp": "2024-01-01T00:00:00Z",
            "result": {"tool_id": "get_quote", "success": true, "data": {"price": 1.5}}
        }"#;
        let message = Message::from_json(text).unwrap();
        match message.body {
            MessageBody::ToolResponse { result } => {
                assert!(result.success);
                assert_eq!(result.data, Some(json!({"price": 1.5})));
                assert!(result.metadata.is_empty());
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_schema_flattening() {
        let schema = quote_tool().to_parameter_schema();
        assert_eq!(schema.schema_type, "object");
        assert_eq!(schema.required, vec!["symbol".to_string()]);
        assert_eq!(schema.properties["symbol"].param_type, ParameterType::String);
        assert_eq!(schema.properties["include_extended"].default, Some(json!(false)));

        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["properties"]["interval"]["enum"], json!(["1d", "1wk", "1mo"]));
        assert_eq!(value["properties"]["symbol"]["default"], Value::Null);
    }

    #[test]
    fn test_schema_back_to_parameters_keeps_required_and_types() {
        let tool = quote_tool();
        let rebuilt = tool.to_parameter_schema().to_parameters();

        assert_eq!(rebuilt.len(), tool.parameters.len());
        for original in &tool.parameters {
            let back = rebuilt.iter().find(|p| p.name == original.name).unwrap();
            assert_eq!(back.required, original.required);
            assert_eq!(back.param_type, original.param_type);
        }
    }

    #[test]
    fn test_prompt_tool_format() {
        let value = quote_tool().to_prompt_tool();
        assert_eq!(value["name"], "Get Stock Quote");
        assert_eq!(value["parameters"]["type"], "object");
        assert_eq!(value["parameters"]["required"], json!(["symbol"]));
    }

    #[test]
    fn test_tool_defaults_when_deserializing() {
        let tool: Tool = serde_json::from_value(json!({"id": "t", "name": "T"})).unwrap();
        assert_eq!(tool.version, "1.0.0");
        assert!(tool.parameters.is_empty());
        assert!(tool.category.is_none());

        let param: Parameter = serde_json::from_value(json!({"name": "p", "type": "number"})).unwrap();
        assert!(param.required);
    }

    #[test]
    fn test_failure_kind_tagging() {
        let result = ToolResult::failure("t", FailureKind::Parameter, "Parameter error: bad arg");
        assert!(!result.success);
        assert_eq!(result.failure_kind(), Some(FailureKind::Parameter));
        assert_eq!(result.metadata[ERROR_KIND_KEY], "parameter");

        let ok = ToolResult::success("t", json!(1));
        assert_eq!(ok.failure_kind(), None);
    }

    #[test]
    fn test_parameters_resolution() {
        let structured = Parameters::from(json!({"symbol": "MSFT"})).into_map().unwrap();
        assert_eq!(structured["symbol"], "MSFT");

        let raw_json = Parameters::from(r#"{"symbol": "MSFT"}"#).into_map().unwrap();
        assert_eq!(raw_json["symbol"], "MSFT");

        let raw_text = Parameters::from("MSFT").into_map().unwrap();
        assert_eq!(raw_text["input"], "MSFT");

        assert!(Parameters::from("[1, 2]").into_map().is_err());
        assert!(Parameters::from("  ").into_map().unwrap().is_empty());
    }

    #[test]
    fn test_parameter_type_matching() {
        assert!(ParameterType::Number.matches(&json!(1.5)));
        assert!(!ParameterType::Number.matches(&json!("1.5")));
        assert!(ParameterType::Array.matches(&json!([])));
        assert_eq!(ParameterType::Boolean.to_string(), "boolean");
    }
}
