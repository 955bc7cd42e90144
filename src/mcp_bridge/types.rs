//! Shared types for the bridge.
//!
//! JSON-RPC 2.0 message types, the MCP structures the bridge reads, and the
//! plain data types handed to callers.

use serde::{Deserialize, Serialize, Serializer};

// ─── Protocol Versions ───────────────────────────────────────────────────────

/// Protocol version sent in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Protocol versions accepted in the server's `initialize` response.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (a request without an id).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
        }
    }
}

/// Reply the bridge sends to a request initiated by the server.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcReply {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Any line the server writes, before it is classified.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcMessage {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// A server message, classified by shape.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Answer to one of our requests.
    Response(JsonRpcResponse),
    /// The server asks something of us.
    Request { id: serde_json::Value, method: String },
    /// Fire-and-forget message from the server.
    Notification { method: String },
    /// Error reply with a null or missing id. The server could not tell which
    /// request it answers (typically a parse error on our line).
    UnaddressedError(JsonRpcError),
}

impl JsonRpcMessage {
    /// Classify the message. Returns `None` for shapes that fit no category
    /// (e.g. a response carrying a non-numeric id we never issued).
    pub fn classify(self) -> Option<Incoming> {
        match (self.method, self.id) {
            (Some(method), Some(id)) => Some(Incoming::Request { id, method }),
            (Some(method), None) => Some(Incoming::Notification { method }),
            (None, Some(id)) => id.as_u64().map(|id| {
                Incoming::Response(JsonRpcResponse {
                    id,
                    result: self.result,
                    error: self.error,
                })
            }),
            (None, None) => self.error.map(Incoming::UnaddressedError),
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone)]
pub struct JsonRpcResponse {
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// MCP `initialize` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// One page of a `tools/list` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsPage {
    pub tools: Vec<WireTool>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// A tool as the server describes it on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct WireTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<serde_json::Value>,
}

// ─── Caller-facing Types ─────────────────────────────────────────────────────

/// A capability a backend exposes, stripped of protocol wrappers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

impl From<WireTool> for Capability {
    fn from(tool: WireTool) -> Self {
        Self {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            input_schema: tool
                .input_schema
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
        }
    }
}

/// A failure represented as data: `{"error": "<message>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error: String,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Result of a discovery call.
///
/// Serializes as the capability list, or as `[{"error": ...}]` on failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolListing {
    Tools(Vec<Capability>),
    Failed(ErrorRecord),
}

impl ToolListing {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolListing::Failed(_))
    }

    /// The capabilities, or `None` if the listing failed.
    pub fn tools(&self) -> Option<&[Capability]> {
        match self {
            ToolListing::Tools(tools) => Some(tools),
            ToolListing::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ToolListing::Tools(_) => None,
            ToolListing::Failed(record) => Some(&record.error),
        }
    }
}

impl Serialize for ToolListing {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ToolListing::Tools(tools) => tools.serialize(serializer),
            ToolListing::Failed(record) => std::slice::from_ref(record).serialize(serializer),
        }
    }
}

/// Result of an invocation call.
///
/// Serializes as the server's result payload verbatim, or as
/// `{"error": ...}` on failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CallOutcome {
    Success(serde_json::Value),
    Failed(ErrorRecord),
}

impl CallOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, CallOutcome::Failed(_))
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            CallOutcome::Success(value) => Some(value),
            CallOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            CallOutcome::Success(_) => None,
            CallOutcome::Failed(record) => Some(&record.error),
        }
    }
}

// ─── Standard JSON-RPC Error Codes ────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
