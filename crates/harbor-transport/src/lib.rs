//! Harbor transport layer.
//!
//! Raw TCP on the loopback interface, one JSON message per frame. The
//! transport handles:
//! - Dual-mode framing (Content-Length headers and newline-delimited lines)
//! - Connection lifecycle (accept, decode, close)
//! - Notification broadcasting to connected sessions
//!
//! The transport is decoupled from protocol semantics via the
//! `MessageHandler` trait.

pub mod framing;
pub mod server;
pub mod session;

pub use framing::{encode_frame, FrameDecoder, FrameError, WireMode, LINE_OVERFLOW_LIMIT};
pub use server::{MessageHandler, ServerInstance};
pub use session::SessionHandle;
