//! Per-connection session state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::framing::WireMode;

/// Handle to one accepted connection.
///
/// Cheap to clone; all state is shared. A session belongs to exactly one
/// server instance for its entire lifetime. Writes to a session whose peer
/// is gone are silent no-ops, never errors.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    /// Accept-order key within the owning server instance.
    seq: u64,
    /// Stable id for logs.
    client_id: String,
    outbound: mpsc::UnboundedSender<String>,
    /// Framing for outgoing messages; line framing until the first decoded
    /// frame commits the connection to a mode.
    wire_mode: Mutex<WireMode>,
    /// One-shot latch for the host initialization callback.
    initialized: AtomicBool,
}

impl SessionHandle {
    /// Create a session and the receiver its writer task drains.
    pub fn channel(seq: u64, client_id: String) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let handle = Self {
            inner: Arc::new(SessionInner {
                seq,
                client_id,
                outbound,
                wire_mode: Mutex::new(WireMode::Line),
                initialized: AtomicBool::new(false),
            }),
        };
        (handle, rx)
    }

    pub fn seq(&self) -> u64 {
        self.inner.seq
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn wire_mode(&self) -> WireMode {
        *self.inner.wire_mode.lock()
    }

    pub(crate) fn commit_wire_mode(&self, mode: WireMode) {
        *self.inner.wire_mode.lock() = mode;
    }

    /// Queue one serialized message for this session. Dropped silently if
    /// the session is closing.
    pub fn send_raw(&self, json: String) {
        let _ = self.inner.outbound.send(json);
    }

    /// Serialize and queue one JSON message.
    pub fn send_value(&self, value: &Value) {
        if let Ok(json) = serde_json::to_string(value) {
            self.send_raw(json);
        }
    }

    /// Latch the initialization marker. True only on the first call, so the
    /// host callback fires at most once per session.
    pub fn mark_initialized(&self) -> bool {
        !self.inner.initialized.swap(true, Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.outbound.is_closed()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("seq", &self.inner.seq)
            .field("client_id", &self.inner.client_id)
            .finish()
    }
}
