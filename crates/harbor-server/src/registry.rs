//! Process-wide registry of per-workspace server instances.
//!
//! Keys are normalized workspace paths (absolute, trailing separator
//! stripped); each path has at most one running instance. The registry is
//! created by the application and shared explicitly, never a global.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use harbor_transport::ServerInstance;
use parking_lot::RwLock;
use tracing::info;

use crate::dispatcher::{InitializedCallback, RequestDispatcher};
use crate::tools::ToolRegistry;

/// One registered server plus its connection metadata. The auth token is
/// surfaced to whoever hands connection details to clients; the transport
/// itself does not enforce it.
#[derive(Clone)]
pub struct ServerEntry {
    pub instance: Arc<ServerInstance>,
    pub port: u16,
    pub auth_token: Option<String>,
}

/// Callback fired after a new server instance is registered.
pub type ServerCreatedCallback = Arc<dyn Fn(&Path, &ServerEntry) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to bind workspace server: {0}")]
    Bind(#[from] io::Error),
}

pub struct ServerRegistry {
    servers: RwLock<HashMap<PathBuf, ServerEntry>>,
    tools: Arc<ToolRegistry>,
    server_name: String,
    server_version: String,
    on_created: Option<ServerCreatedCallback>,
    on_initialized: Option<InitializedCallback>,
    fixed_token: Option<String>,
}

impl ServerRegistry {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            tools,
            server_name: "harbor-mcp".into(),
            server_version: env!("CARGO_PKG_VERSION").into(),
            on_created: None,
            on_initialized: None,
            fixed_token: None,
        }
    }

    pub fn with_server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.server_name = name.into();
        self.server_version = version.into();
        self
    }

    pub fn with_created_callback(mut self, callback: ServerCreatedCallback) -> Self {
        self.on_created = Some(callback);
        self
    }

    pub fn with_initialized_callback(mut self, callback: InitializedCallback) -> Self {
        self.on_initialized = Some(callback);
        self
    }

    /// Use one fixed auth token for every entry instead of generating one
    /// per server.
    pub fn with_fixed_token(mut self, token: impl Into<String>) -> Self {
        self.fixed_token = Some(token.into());
        self
    }

    /// Return the server for this workspace path, creating and registering
    /// one if none exists. Idempotent: equivalent paths share one instance
    /// and one bound port.
    pub async fn ensure_server(&self, path: &Path) -> Result<ServerEntry, RegistryError> {
        let key = normalize_workspace_path(path);

        if let Some(entry) = self.servers.read().get(&key) {
            return Ok(entry.clone());
        }

        // Bind outside the lock; a racing call for the same path keeps the
        // first registered entry and stops the duplicate.
        let dispatcher = self.build_dispatcher();
        let instance = ServerInstance::bind(key.clone(), Arc::new(dispatcher)).await?;
        let port = instance.port();
        let entry = ServerEntry {
            instance,
            port,
            auth_token: Some(
                self.fixed_token
                    .clone()
                    .unwrap_or_else(generate_auth_token),
            ),
        };

        {
            let mut servers = self.servers.write();
            if let Some(existing) = servers.get(&key) {
                let duplicate = entry.instance;
                tokio::spawn(async move { duplicate.stop().await });
                return Ok(existing.clone());
            }
            servers.insert(key.clone(), entry.clone());
        }

        info!("workspace server created: {} (port {port})", key.display());
        if let Some(callback) = &self.on_created {
            callback(&key, &entry);
        }

        Ok(entry)
    }

    /// Look up the server for this workspace path. Never creates.
    pub fn get_server(&self, path: &Path) -> Option<ServerEntry> {
        let key = normalize_workspace_path(path);
        self.servers.read().get(&key).cloned()
    }

    /// Paths with a running server, in no particular order.
    pub fn workspace_paths(&self) -> Vec<PathBuf> {
        self.servers.read().keys().cloned().collect()
    }

    /// Stop every instance (listener and sessions) and clear the table.
    pub async fn stop_all(&self) {
        let entries: Vec<(PathBuf, ServerEntry)> = {
            let mut servers = self.servers.write();
            servers.drain().collect()
        };
        for (path, entry) in entries {
            info!("stopping workspace server: {}", path.display());
            entry.instance.stop().await;
        }
    }

    /// Stop every instance, then re-create one for each previously-known
    /// path. New instances get fresh ports; the creation callback fires for
    /// each.
    pub async fn restart_all(&self) -> Result<Vec<ServerEntry>, RegistryError> {
        let paths = self.workspace_paths();
        self.stop_all().await;

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            entries.push(self.ensure_server(&path).await?);
        }
        Ok(entries)
    }

    fn build_dispatcher(&self) -> RequestDispatcher {
        let mut dispatcher = RequestDispatcher::new(self.tools.clone())
            .with_server_info(self.server_name.clone(), self.server_version.clone());
        if let Some(callback) = &self.on_initialized {
            dispatcher = dispatcher.with_initialized_callback(callback.clone());
        }
        dispatcher
    }
}

/// Normalize a workspace path to its registry key: absolute, with no
/// trailing separator.
pub fn normalize_workspace_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    // Re-collecting components drops trailing separators and `.` segments.
    absolute.components().collect()
}

fn generate_auth_token() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}
