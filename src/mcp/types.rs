//! JSON-RPC 2.0 message model and capability descriptors
//!
//! This module defines every wire type exchanged between a Querywire client
//! and server: the [`Message`] tagged union (request, response,
//! notification), the JSON-RPC error object, and the tool, prompt, and
//! resource descriptors returned during capability discovery. Struct fields
//! are `camelCase` on the wire via `#[serde(rename_all = "camelCase")]`, and
//! `Option<>` fields omit their key when `None`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::QuerywireError;

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// JSON-RPC version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision announced during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Lifecycle: client opens a session.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Lifecycle: client confirms the session after the server ACKs.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Keepalive ping.
pub const METHOD_PING: &str = "ping";
/// List available tools.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Invoke a named tool.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// List available prompts.
pub const METHOD_PROMPTS_LIST: &str = "prompts/list";
/// Render a prompt by name.
pub const METHOD_PROMPTS_GET: &str = "prompts/get";
/// List available resources.
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
/// Read a resource by URI.
pub const METHOD_RESOURCES_READ: &str = "resources/read";

/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters (unknown tool, missing argument, unknown URI).
pub const INVALID_PARAMS: i64 = -32602;
/// Internal server error.
pub const INTERNAL_ERROR: i64 = -32603;
/// A tool, prompt, or resource handler failed.
pub const HANDLER_ERROR: i64 = -32000;

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 wire types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request object.
///
/// # Examples
///
/// ```
/// use querywire::mcp::types::JsonRpcRequest;
///
/// let req = JsonRpcRequest::new(1, "tools/list", serde_json::json!({}));
/// assert_eq!(req.jsonrpc, "2.0");
/// assert_eq!(req.id, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version identifier; always `"2.0"`.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Request correlation identifier, unique per connection.
    pub id: u64,
    /// The method name to invoke.
    pub method: String,
    /// Method parameters; `{}` when the method takes none.
    #[serde(default = "empty_object")]
    pub params: Value,
}

impl JsonRpcRequest {
    /// Build a request with the `"2.0"` version tag.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response object.
///
/// Exactly one of `result` or `error` is present in a response built by
/// [`JsonRpcResponse::success`] or [`JsonRpcResponse::failure`]. A peer that
/// sends `"result": null` deserializes with both fields absent; that is
/// treated as a successful `null` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version identifier; always `"2.0"`.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Mirrors the `id` from the corresponding request.
    pub id: u64,
    /// Successful result value; mutually exclusive with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object; mutually exclusive with `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Build a success response.
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn failure(id: u64, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Collapse the response into the outcome delivered to a pending caller.
    pub fn into_outcome(self) -> std::result::Result<Value, JsonRpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A JSON-RPC 2.0 error object.
///
/// Implements `Display` as `"JSON-RPC error {code}: {message}"`.
///
/// # Examples
///
/// ```
/// use querywire::mcp::types::JsonRpcError;
///
/// let e = JsonRpcError::new(-32600, "Invalid Request");
/// assert_eq!(e.to_string(), "JSON-RPC error -32600: Invalid Request");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable error description.
    pub message: String,
    /// Optional additional error context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Build an error object without `data`.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// `-32600 Invalid Request`.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    /// `-32601 Method not found`, naming the method.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// `-32602 Invalid params`.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    /// `-32603 Internal error`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    /// `-32000`, carrying a handler failure message verbatim.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(HANDLER_ERROR, message)
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 notification (a request with no `id`); never answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version identifier; always `"2.0"`.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// The notification method name.
    pub method: String,
    /// Notification parameters.
    #[serde(default = "empty_object")]
    pub params: Value,
}

impl JsonRpcNotification {
    /// Build a notification with the `"2.0"` version tag.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Any message that may travel in one frame.
///
/// Serialization is untagged: each variant writes its own shape. Decoding
/// goes through [`Message::from_value`], which classifies an object by the
/// keys it carries rather than by trial deserialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// A request expecting exactly one response.
    Request(JsonRpcRequest),
    /// A success or error response.
    Response(JsonRpcResponse),
    /// A fire-and-forget notification.
    Notification(JsonRpcNotification),
}

impl Message {
    /// Classify a decoded JSON value as a request, response, or notification.
    ///
    /// # Errors
    ///
    /// Returns [`QuerywireError::Parse`] when the value is not an object,
    /// when it matches none of the three shapes, or when a field has the
    /// wrong type (for example a non-integer `id`).
    pub fn from_value(value: Value) -> std::result::Result<Self, QuerywireError> {
        let Some(object) = value.as_object() else {
            return Err(QuerywireError::Parse("frame is not a JSON object".into()));
        };

        let has_id = object.get("id").is_some_and(|id| !id.is_null());
        let has_method = object.contains_key("method");
        let has_result = object.contains_key("result");
        let has_error = object.contains_key("error");

        let parsed = if has_id && has_method {
            serde_json::from_value(value).map(Message::Request)
        } else if has_id && (has_result || has_error) {
            serde_json::from_value(value).map(Message::Response)
        } else if has_method {
            serde_json::from_value(value).map(Message::Notification)
        } else {
            return Err(QuerywireError::Parse(format!(
                "unclassifiable message: has_id={has_id} has_method={has_method} \
                 has_result={has_result} has_error={has_error}"
            )));
        };

        parsed.map_err(|e| QuerywireError::Parse(e.to_string()))
    }

    /// Parse one frame of text into a message.
    ///
    /// # Errors
    ///
    /// Returns [`QuerywireError::Parse`] for invalid JSON or an unrecognized
    /// message shape.
    pub fn parse(text: &str) -> std::result::Result<Self, QuerywireError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| QuerywireError::Parse(e.to_string()))?;
        Self::from_value(value)
    }

    /// The method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            Message::Response(_) => None,
        }
    }
}

impl From<JsonRpcRequest> for Message {
    fn from(r: JsonRpcRequest) -> Self {
        Message::Request(r)
    }
}

impl From<JsonRpcResponse> for Message {
    fn from(r: JsonRpcResponse) -> Self {
        Message::Response(r)
    }
}

impl From<JsonRpcNotification> for Message {
    fn from(n: JsonRpcNotification) -> Self {
        Message::Notification(n)
    }
}

// ---------------------------------------------------------------------------
// Initialize
// ---------------------------------------------------------------------------

/// Identifies a client or server implementation by name and version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    /// Short name of the implementation (e.g. `"querywire"`).
    pub name: String,
    /// Semantic version string.
    pub version: String,
}

impl Implementation {
    /// Placeholder for a peer that did not identify itself.
    pub fn unknown() -> Self {
        Self {
            name: "unknown".to_string(),
            version: "unknown".to_string(),
        }
    }

    /// Identity of this crate.
    pub fn querywire() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Parameters sent by the client in the `initialize` request.
///
/// Every field is optional on the wire, so `{}` is a valid `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// The protocol version the client wishes to use.
    #[serde(default = "protocol_version")]
    pub protocol_version: String,
    /// Capabilities advertised by the client.
    #[serde(default = "empty_object")]
    pub capabilities: Value,
    /// Information identifying the client implementation.
    #[serde(default = "Implementation::unknown")]
    pub client_info: Implementation,
}

fn protocol_version() -> String {
    PROTOCOL_VERSION.to_string()
}

/// The set of capabilities a server advertises.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    /// Server exposes `tools/list` and `tools/call`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    /// Server exposes `prompts/list` and `prompts/get`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
    /// Server exposes `resources/list` and `resources/read`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
}

/// The server's answer to `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version selected by the server.
    pub protocol_version: String,
    /// Capabilities offered by the server.
    pub capabilities: ServerCapabilities,
    /// Information identifying the server implementation.
    pub server_info: Implementation,
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// A tool published by the server during capability discovery.
///
/// Immutable once the server has started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool name used in `tools/call`.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema describing the tool's `arguments` object.
    pub input_schema: Value,
}

/// Result of `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// All tools published by the server.
    pub tools: Vec<ToolDescriptor>,
}

/// Parameters for `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Name of the tool to invoke.
    pub name: String,
    /// Tool arguments; `{}` when omitted.
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

/// A content item carried in tool results and prompt messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Plain text (tool payloads are serialized JSON in this form).
    Text {
        /// The text body.
        text: String,
    },
}

impl Content {
    /// Build a text content item.
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    /// The text body of this item.
    pub fn as_text(&self) -> &str {
        match self {
            Content::Text { text } => text,
        }
    }
}

/// Result of `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content items produced by the tool.
    pub content: Vec<Content>,
    /// `true` when the tool reported a soft failure in-band.
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Wrap a JSON payload as a single text item.
    pub fn json(payload: &Value) -> Self {
        Self {
            content: vec![Content::text(payload.to_string())],
            is_error: false,
        }
    }

    /// Decode the first text item back into JSON.
    ///
    /// # Errors
    ///
    /// Returns [`QuerywireError::Parse`] when there is no content or the text
    /// is not valid JSON.
    pub fn payload(&self) -> std::result::Result<Value, QuerywireError> {
        let first = self
            .content
            .first()
            .ok_or_else(|| QuerywireError::Parse("tool result has no content".into()))?;
        serde_json::from_str(first.as_text()).map_err(|e| QuerywireError::Parse(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// An argument accepted by a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name, used as `{{name}}` in the template.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether `prompts/get` fails when the argument is missing.
    #[serde(default)]
    pub required: bool,
}

/// A prompt descriptor returned by `prompts/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Unique prompt name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared arguments.
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// Result of `prompts/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPromptsResult {
    /// All prompts known to the server.
    pub prompts: Vec<Prompt>,
}

/// Parameters for `prompts/get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPromptParams {
    /// Prompt name.
    pub name: String,
    /// Argument values keyed by argument name.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Speaker role of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human turn.
    User,
    /// Model turn.
    Assistant,
}

/// One rendered prompt message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Speaker role.
    pub role: Role,
    /// Message body.
    pub content: Content,
}

/// Result of `prompts/get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPromptResult {
    /// Description of the rendered prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rendered messages.
    pub messages: Vec<PromptMessage>,
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// A resource descriptor returned by `resources/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Resource URI.
    pub uri: String,
    /// Short name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the resource contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Result of `resources/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResourcesResult {
    /// All resources known to the server.
    pub resources: Vec<Resource>,
}

/// Parameters for `resources/read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResourceParams {
    /// URI of the resource to read.
    pub uri: String,
}

/// Text contents of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    /// URI the contents belong to.
    pub uri: String,
    /// MIME type of `text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Text body.
    pub text: String,
}

/// Result of `resources/read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResourceResult {
    /// Contents of the requested resource.
    pub contents: Vec<ResourceContents>,
}
