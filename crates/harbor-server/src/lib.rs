//! Harbor server core.
//!
//! The dispatcher executes protocol semantics for decoded messages, the
//! tool registry maps names to schema-described handlers, and the server
//! registry owns one server instance per workspace path. The registry is an
//! explicit object held by the application, shared via `Arc`; there is no
//! process-wide singleton.

pub mod dispatcher;
pub mod registry;
pub mod tools;

pub use dispatcher::{InitializedCallback, RequestDispatcher};
pub use registry::{
    normalize_workspace_path, RegistryError, ServerCreatedCallback, ServerEntry, ServerRegistry,
};
pub use tools::{ToolError, ToolHandler, ToolRegistry, ToolResult};
