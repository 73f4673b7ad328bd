//! Tool registry: name-keyed table of schema-described handlers.
//!
//! The table is shared across every workspace server; registration after a
//! server has started is immediately visible to `tools/list`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use harbor_protocol::ToolSpec;
use parking_lot::RwLock;
use serde_json::Value;

/// Failure reported by a tool handler. Surfaced to the caller as a JSON-RPC
/// internal error embedding this message.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ToolError(pub String);

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type ToolResult = Result<Value, ToolError>;

type BoxedToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// A registered tool implementation, invoked with the call's `arguments`.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxedToolFuture + Send + Sync>;

struct ToolEntry {
    spec: ToolSpec,
    handler: ToolHandler,
}

/// Registration-ordered tool table; the order of `list` is the order tools
/// were first registered.
#[derive(Default)]
pub struct ToolRegistry {
    entries: RwLock<Vec<ToolEntry>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique; re-registering replaces the
    /// existing entry in place.
    pub fn register(&self, spec: ToolSpec, handler: ToolHandler) {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.spec.name == spec.name) {
            Some(entry) => *entry = ToolEntry { spec, handler },
            None => entries.push(ToolEntry { spec, handler }),
        }
    }

    /// Register an async closure as a tool handler.
    pub fn register_fn<F, Fut>(&self, spec: ToolSpec, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        self.register(spec, Arc::new(move |args| Box::pin(f(args))));
    }

    /// The full current specification list.
    pub fn list(&self) -> Vec<ToolSpec> {
        self.entries.read().iter().map(|e| e.spec.clone()).collect()
    }

    /// Resolve a tool name to its handler.
    pub fn resolve(&self, name: &str) -> Option<ToolHandler> {
        self.entries
            .read()
            .iter()
            .find(|e| e.spec.name == name)
            .map(|e| e.handler.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
