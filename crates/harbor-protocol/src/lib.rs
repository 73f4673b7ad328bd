//! Harbor protocol types.
//!
//! JSON-RPC 2.0 compatible types for the MCP-style tool-invocation protocol.
//! This crate is the single source of truth for wire types, method
//! resolution, and error codes.

pub mod error;
pub mod jsonrpc;
pub mod mcp;
pub mod methods;

pub use error::{RpcError, RpcErrorCode};
pub use jsonrpc::{
    RequestId, RpcErrorResponse, RpcNotification, RpcRequest, RpcResponse, RpcSuccessResponse,
};
pub use mcp::{
    coerce_tool_output, InitializeResult, ServerCapabilities, ServerInfo, ToolCallResult,
    ToolContent, ToolSpec, ToolsCapability, ToolsListResult, PROTOCOL_VERSION,
};
pub use methods::{InitializeParams, McpMessage, McpMethod, ToolCallParams};
