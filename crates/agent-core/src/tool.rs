//! Tool System
//!
//! Tools live on a remote tool server. This module holds the descriptors the
//! server advertises, the normalized parameter schema derived from them, the
//! two model-facing projections of that schema, and the request/result types
//! exchanged while the orchestration loop dispatches calls.
//!
//! ## Dialects
//!
//! The same tool metadata is rendered in two shapes:
//!
//! ```text
//! catalog:   {"type":"function","name":..,"description":..,"parameters":{..}}
//! call-site: {"type":"function","function":{"name":..,"description":..,"parameters":{..}}}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::Result;

/// Tool metadata as advertised by the tool server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (may be absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Raw JSON-schema-like parameter description, untrusted
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: Option<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description,
            input_schema,
        }
    }

    /// Normalize the parameter schema; see [`normalize`]
    pub fn normalize(&self) -> NormalizedSchema {
        normalize(&self.input_schema)
    }
}

/// Parameter schema with `properties` and `required` always present
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSchema {
    /// Parameter name → type descriptor
    pub properties: Map<String, Value>,

    /// Names of required parameters, first occurrence order, no duplicates
    pub required: Vec<String>,
}

/// Degrade a raw schema into a [`NormalizedSchema`].
///
/// Never fails: a non-object schema, a missing or non-object `properties`,
/// and a missing or non-array `required` all become empty containers.
/// Non-string entries in `required` are skipped.
pub fn normalize(schema: &Value) -> NormalizedSchema {
    let Some(object) = schema.as_object() else {
        return NormalizedSchema::default();
    };

    let properties = object
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut required: Vec<String> = Vec::new();
    for name in object
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
    {
        if !required.iter().any(|existing| existing == name) {
            required.push(name.to_string());
        }
    }

    NormalizedSchema {
        properties,
        required,
    }
}

/// `{"type":"object", properties, required}` block shared by both dialects
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FunctionParameters {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub properties: Map<String, Value>,
    pub required: Vec<String>,
}

impl From<NormalizedSchema> for FunctionParameters {
    fn from(schema: NormalizedSchema) -> Self {
        Self {
            kind: "object",
            properties: schema.properties,
            required: schema.required,
        }
    }
}

/// Flat "tool catalog" dialect (responses-style APIs)
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CatalogTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub description: Option<String>,
    pub parameters: FunctionParameters,
}

/// Nested "single function call" dialect (chat-completions-style APIs)
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CallSiteTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionSpec,
}

/// Function block of the call-site dialect
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FunctionSpec {
    pub name: String,
    /// Empty string when the descriptor has none; never null
    pub description: String,
    pub parameters: FunctionParameters,
}

/// Project a descriptor into the catalog dialect
pub fn catalog_tool(descriptor: &ToolDescriptor) -> CatalogTool {
    CatalogTool {
        kind: "function",
        name: descriptor.name.clone(),
        description: descriptor.description.clone(),
        parameters: descriptor.normalize().into(),
    }
}

/// Project a descriptor into the call-site dialect
pub fn call_site_tool(descriptor: &ToolDescriptor) -> CallSiteTool {
    CallSiteTool {
        kind: "function",
        function: FunctionSpec {
            name: descriptor.name.clone(),
            description: descriptor.description.clone().unwrap_or_default(),
            parameters: descriptor.normalize().into(),
        },
    }
}

/// Tool call request emitted by the model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id, echoed back on the tool turn answering this call
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Raw argument payload exactly as the model produced it
    pub arguments: String,
}

/// Why a raw argument payload could not be used
#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("{0}")]
    Syntax(#[from] serde_json::Error),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Decode the raw payload into an argument mapping.
    ///
    /// An empty payload or a JSON `null` decodes to an empty mapping.
    /// Whitespace alone is not a payload and fails to parse.
    pub fn decode_arguments(&self) -> std::result::Result<Map<String, Value>, ArgumentError> {
        if self.arguments.is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&self.arguments)? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            Value::Bool(_) => Err(ArgumentError::NotAnObject("a boolean")),
            Value::Number(_) => Err(ArgumentError::NotAnObject("a number")),
            Value::String(_) => Err(ArgumentError::NotAnObject("a string")),
            Value::Array(_) => Err(ArgumentError::NotAnObject("an array")),
        }
    }
}

/// Textual or structured tool output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolPayload {
    Text(String),
    Structured(Value),
}

impl ToolPayload {
    /// Render for inclusion in a tool turn
    pub fn to_content(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(value) => value.to_string(),
        }
    }
}

/// Outcome status of a tool invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Result from tool execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Call ID of the request this answers
    pub id: String,

    /// Tool that was called
    pub name: String,

    /// Whether execution succeeded
    pub status: ToolStatus,

    /// Output (result or error description)
    pub payload: ToolPayload,
}

impl ToolResult {
    pub fn success(id: impl Into<String>, name: impl Into<String>, payload: ToolPayload) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ToolStatus::Success,
            payload,
        }
    }

    pub fn failure(
        id: impl Into<String>,
        name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ToolStatus::Error,
            payload: ToolPayload::Text(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// What a tool server returns for a completed invocation
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    pub payload: ToolPayload,

    /// The server executed the call but flagged the result as a failure
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: ToolPayload::Text(text.into()),
            is_error: false,
        }
    }
}

/// Remote tool server boundary
///
/// Implementations own the connection. `close` releases it; callers must
/// invoke it on every exit path of a session.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// List the tools currently exposed by the server
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Execute a tool with already-decoded arguments
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolOutput>;

    /// Release the connection
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
