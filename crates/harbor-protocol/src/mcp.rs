//! MCP handshake and tool result types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision offered when the client does not request one.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Static server identity reported in the `initialize` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Placeholder for capability groups this server declares but does not
/// implement; serializes as `{}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyCapability {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
    pub resources: EmptyCapability,
    pub prompts: EmptyCapability,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: ToolsCapability { list_changed: true },
            resources: EmptyCapability {},
            prompts: EmptyCapability {},
        }
    }
}

/// `initialize` response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

/// One registered tool as advertised to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// `tools/list` response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

/// `tools/call` success payload: always a single text content item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }
}

/// Coerce a tool handler's raw value into response text: strings pass
/// through verbatim, structured values serialize to JSON text, scalars
/// stringify.
pub fn coerce_tool_output(value: Value) -> String {
    match value {
        Value::String(text) => text,
        value @ (Value::Object(_) | Value::Array(_)) => {
            serde_json::to_string(&value).unwrap_or_default()
        }
        value => value.to_string(),
    }
}
