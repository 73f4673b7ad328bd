//! Request dispatcher — executes protocol semantics for one decoded message.
//!
//! Housekeeping methods answer synchronously; `tools/call` runs its handler
//! on a spawned task so a slow tool never stalls the connection's read
//! path. Messages without an id follow notification semantics: nothing is
//! ever written back, even on error.

use std::sync::Arc;

use harbor_protocol::{
    coerce_tool_output, InitializeParams, InitializeResult, McpMessage, McpMethod, RequestId,
    RpcError, RpcResponse, ServerCapabilities, ServerInfo, ToolCallParams, ToolCallResult,
    ToolsListResult, PROTOCOL_VERSION,
};
use harbor_transport::{MessageHandler, SessionHandle};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::tools::ToolRegistry;

/// Callback fired the first time a session reports itself initialized.
pub type InitializedCallback = Arc<dyn Fn(&SessionHandle) + Send + Sync>;

pub struct RequestDispatcher {
    tools: Arc<ToolRegistry>,
    server_info: ServerInfo,
    on_initialized: Option<InitializedCallback>,
}

impl RequestDispatcher {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            server_info: ServerInfo {
                name: "harbor-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            on_initialized: None,
        }
    }

    pub fn with_server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.server_info = ServerInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    pub fn with_initialized_callback(mut self, callback: InitializedCallback) -> Self {
        self.on_initialized = Some(callback);
        self
    }

    fn respond(&self, session: &SessionHandle, id: Option<RequestId>, result: Value) {
        // Absent id: notification semantics, nothing is written.
        let Some(id) = id else { return };
        if let Ok(json) = serde_json::to_string(&RpcResponse::success(id, result)) {
            session.send_raw(json);
        }
    }

    fn respond_error(&self, session: &SessionHandle, id: Option<RequestId>, error: RpcError) {
        let Some(id) = id else { return };
        if let Ok(json) = serde_json::to_string(&RpcResponse::error(Some(id), error)) {
            session.send_raw(json);
        }
    }

    fn handle_initialize(
        &self,
        session: &SessionHandle,
        id: Option<RequestId>,
        params: InitializeParams,
    ) {
        let result = InitializeResult {
            protocol_version: params
                .protocol_version
                .unwrap_or_else(|| PROTOCOL_VERSION.into()),
            capabilities: ServerCapabilities::default(),
            server_info: self.server_info.clone(),
        };
        self.respond(session, id, serde_json::to_value(result).unwrap_or(Value::Null));
    }

    fn handle_tool_call(
        &self,
        session: SessionHandle,
        id: Option<RequestId>,
        params: ToolCallParams,
    ) {
        let ToolCallParams { name, arguments } = params;

        let Some(handler) = self.tools.resolve(&name) else {
            warn!("tool not found: {name}");
            self.respond_error(&session, id, RpcError::internal(format!("Tool not found: {name}")));
            return;
        };

        let args = arguments.unwrap_or_else(|| json!({}));

        // The handler runs on its own task, never inline in the read path.
        // If the session closed in the meantime the response write is a
        // no-op; in-flight calls are not cancelled.
        tokio::spawn(async move {
            let outcome = handler(args).await;

            // Fire-and-forget invocation: no id, no response.
            let Some(id) = id else { return };

            let response = match outcome {
                Ok(value) => {
                    let result = ToolCallResult::text(coerce_tool_output(value));
                    RpcResponse::success(id, serde_json::to_value(result).unwrap_or(Value::Null))
                }
                Err(e) => RpcResponse::error(
                    Some(id),
                    RpcError::internal(format!("Tool execution failed: {e}")),
                ),
            };
            if let Ok(json) = serde_json::to_string(&response) {
                session.send_raw(json);
            }
        });
    }
}

impl MessageHandler for RequestDispatcher {
    async fn on_message(&self, message: Value, session: SessionHandle) {
        let Some(McpMessage { id, method }) = McpMessage::parse(message) else {
            // Not JSON-RPC shaped; there is nothing to answer.
            debug!("ignoring message without a method");
            return;
        };

        match method {
            McpMethod::Initialize(params) => self.handle_initialize(&session, id, params),
            McpMethod::Initialized => {
                if session.mark_initialized() {
                    if let Some(callback) = &self.on_initialized {
                        callback(&session);
                    }
                }
            }
            McpMethod::Ping => self.respond(&session, id, json!({})),
            McpMethod::PromptsList => self.respond(&session, id, json!({"prompts": []})),
            McpMethod::ResourcesList => self.respond(&session, id, json!({"resources": []})),
            McpMethod::RootsListChanged => {
                debug!("roots changed for {}", session.client_id());
            }
            McpMethod::ToolsList => {
                let result = ToolsListResult {
                    tools: self.tools.list(),
                };
                self.respond(
                    &session,
                    id,
                    serde_json::to_value(result).unwrap_or(Value::Null),
                );
            }
            McpMethod::ToolsCall(params) => self.handle_tool_call(session, id, params),
            McpMethod::Unknown(name) => {
                if id.is_some() {
                    self.respond_error(&session, id, RpcError::method_not_found(&name));
                }
                // Unknown notification: ignored.
            }
        }
    }
}
