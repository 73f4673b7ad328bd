//! Per-workspace TCP server instance.
//!
//! Binds a loopback listener, accepts connections, runs one task per
//! connection that decodes frames and hands each message to the
//! `MessageHandler`, and broadcasts notifications to every live session.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use harbor_protocol::RpcNotification;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::framing::{encode_frame, FrameDecoder, FrameError};
use crate::session::SessionHandle;

/// Trait implemented by the request dispatcher. The transport calls this
/// once per decoded message; any responses are written back through the
/// session handle.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(
        &self,
        message: Value,
        session: SessionHandle,
    ) -> impl std::future::Future<Output = ()> + Send;
}

struct Connection {
    session: SessionHandle,
    task: tokio::task::JoinHandle<()>,
}

type SessionSet = Arc<RwLock<BTreeMap<u64, Connection>>>;

/// One bound listening endpoint serving a single workspace, with its
/// ordered set of sessions.
pub struct ServerInstance {
    workspace_root: PathBuf,
    port: u16,
    sessions: SessionSet,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    accept_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ServerInstance {
    /// Bind an ephemeral loopback port and start accepting connections.
    pub async fn bind<H: MessageHandler>(
        workspace_root: PathBuf,
        handler: Arc<H>,
    ) -> io::Result<Arc<Self>> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        let sessions: SessionSet = Arc::new(RwLock::new(BTreeMap::new()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        info!(
            "workspace server listening on 127.0.0.1:{port} for {}",
            workspace_root.display()
        );

        let accept_sessions = sessions.clone();
        let accept_task = tokio::spawn(async move {
            let mut next_seq: u64 = 0;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((socket, _addr)) => {
                            next_seq += 1;
                            spawn_connection(socket, next_seq, accept_sessions.clone(), handler.clone());
                        }
                        Err(e) => warn!("accept failed: {e}"),
                    },
                }
            }
        });

        Ok(Arc::new(Self {
            workspace_root,
            port,
            sessions,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            accept_task: Mutex::new(Some(accept_task)),
        }))
    }

    /// The actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Serialize one notification and write it to every live session, in
    /// accept order. Sessions that are closing drop the write silently.
    pub fn notify_all(&self, method: &str, params: Option<Value>) {
        let notification = RpcNotification::new(method, params);
        let Ok(json) = serde_json::to_string(&notification) else {
            return;
        };
        for conn in self.sessions.read().values() {
            conn.session.send_raw(json.clone());
        }
    }

    /// Close the listening endpoint and every session. Idempotent.
    pub async fn stop(&self) {
        let shutdown_tx = self.shutdown_tx.lock().take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(()).await;
        }
        let accept_task = self.accept_task.lock().take();
        if let Some(task) = accept_task {
            let _ = task.await;
        }

        let connections: Vec<Connection> = {
            let mut sessions = self.sessions.write();
            std::mem::take(&mut *sessions).into_values().collect()
        };
        for conn in &connections {
            conn.task.abort();
        }

        info!(
            "workspace server stopped for {}",
            self.workspace_root.display()
        );
    }
}

/// Run one connection: a single task that interleaves reads (fed through
/// the framing decoder into the handler) with writes drained from the
/// session's outbound queue, so neither side blocks the other.
fn spawn_connection<H: MessageHandler>(
    socket: TcpStream,
    seq: u64,
    sessions: SessionSet,
    handler: Arc<H>,
) {
    let client_id = uuid::Uuid::new_v4().to_string();
    let (session, mut outbound_rx) = SessionHandle::channel(seq, client_id.clone());

    info!("client connected: {client_id}");

    // Hold the set lock across spawn + insert so the task's own removal on
    // an instant disconnect cannot run before the entry exists.
    let mut registered = sessions.write();

    let conn_sessions = sessions.clone();
    let conn_session = session.clone();
    let task = tokio::spawn(async move {
        let session = conn_session;
        let (mut read_half, mut write_half) = socket.into_split();
        let mut decoder = FrameDecoder::new();
        let mut read_buf = [0u8; 8192];

        'conn: loop {
            tokio::select! {
                read = read_half.read(&mut read_buf) => {
                    match read {
                        Ok(0) => {
                            debug!("client disconnected: {}", session.client_id());
                            break 'conn;
                        }
                        Ok(n) => {
                            decoder.extend(&read_buf[..n]);
                            loop {
                                match decoder.next_message() {
                                    Ok(Some(message)) => {
                                        if let Some(mode) = decoder.wire_mode() {
                                            session.commit_wire_mode(mode);
                                        }
                                        handler.on_message(message, session.clone()).await;
                                    }
                                    Ok(None) => break,
                                    Err(FrameError::MalformedHeader) => {
                                        warn!(
                                            "closing {}: malformed framing header",
                                            session.client_id()
                                        );
                                        break 'conn;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            warn!("read error for {}: {e}", session.client_id());
                            break 'conn;
                        }
                    }
                }
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(json) => {
                            let frame = encode_frame(&json, session.wire_mode());
                            if let Err(e) = write_half.write_all(frame.as_bytes()).await {
                                warn!("write error for {}: {e}", session.client_id());
                                break 'conn;
                            }
                        }
                        None => break 'conn,
                    }
                }
            }
        }

        conn_sessions.write().remove(&seq);
    });

    registered.insert(seq, Connection { session, task });
}
