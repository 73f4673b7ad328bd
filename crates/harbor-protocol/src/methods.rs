//! Parse-time method resolution.
//!
//! Every supported method is resolved into a closed enum variant, with its
//! typed parameters attached, at the moment the message is parsed. Dispatch
//! downstream is an exhaustive match, not a string comparison chain.

use serde::Deserialize;
use serde_json::Value;

use crate::jsonrpc::{RequestId, RpcRequest};

/// Parameters the client sends with `initialize`. Everything beyond the
/// requested protocol revision is accepted and ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,
}

/// Parameters for `tools/call`. Arguments are never validated against the
/// tool's schema; a missing name resolves like any other unknown tool.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallParams {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// The closed set of supported methods.
#[derive(Debug, Clone)]
pub enum McpMethod {
    Initialize(InitializeParams),
    Initialized,
    Ping,
    PromptsList,
    ResourcesList,
    RootsListChanged,
    ToolsList,
    ToolsCall(ToolCallParams),
    /// A method outside the supported surface: requests get a
    /// method-not-found error, notifications are ignored.
    Unknown(String),
}

/// One decoded inbound message: the request id (absent for notifications)
/// plus the resolved method.
#[derive(Debug, Clone)]
pub struct McpMessage {
    pub id: Option<RequestId>,
    pub method: McpMethod,
}

impl McpMessage {
    /// Resolve a decoded JSON value into a message. Returns None when the
    /// value is not JSON-RPC shaped (no method field); callers ignore such
    /// messages without a response.
    pub fn parse(value: Value) -> Option<Self> {
        let RpcRequest {
            id, method, params, ..
        } = serde_json::from_value(value).ok()?;

        let method = match method.as_str() {
            "initialize" => McpMethod::Initialize(parse_params(params)),
            "notifications/initialized" => McpMethod::Initialized,
            "ping" => McpMethod::Ping,
            "prompts/list" => McpMethod::PromptsList,
            "resources/list" => McpMethod::ResourcesList,
            "notifications/roots/list_changed" => McpMethod::RootsListChanged,
            "tools/list" => McpMethod::ToolsList,
            "tools/call" => McpMethod::ToolsCall(parse_params(params)),
            other => McpMethod::Unknown(other.to_string()),
        };

        Some(Self { id, method })
    }
}

/// Deserialize params leniently, falling back to the default on absence or
/// shape mismatch.
fn parse_params<P: Default + for<'de> Deserialize<'de>>(params: Option<Value>) -> P {
    params
        .and_then(|p| serde_json::from_value(p).ok())
        .unwrap_or_default()
}
