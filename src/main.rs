//! harbor-mcp — per-workspace MCP tool servers over loopback TCP.
//!
//! A single process that binds one server per workspace directory. Clients
//! connect over TCP and speak JSON-RPC 2.0 with either Content-Length
//! header framing or newline framing.
//!
//! Usage:
//!   harbor-mcp --workspace /path/to/project
//!   harbor-mcp --workspace /a --workspace /b --verbose
//!   harbor-mcp --workspace . --token mysecret

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use harbor_protocol::ToolSpec;
use harbor_server::{ServerRegistry, ToolRegistry};
use serde_json::json;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "harbor-mcp", about = "Per-workspace MCP tool server")]
struct Cli {
    /// Workspace root directory to serve (repeatable)
    #[arg(long = "workspace", required = true)]
    workspaces: Vec<PathBuf>,

    /// Fixed auth token for every server (random per server if not provided)
    #[arg(long)]
    token: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Tools every server exposes regardless of what the host registers.
fn register_builtin_tools(tools: &ToolRegistry) {
    tools.register_fn(
        ToolSpec {
            name: "echo".into(),
            description: "Echo the provided text back to the caller".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to echo" }
                },
            }),
        },
        |args| async move {
            match args.get("text").and_then(|v| v.as_str()) {
                Some(text) => Ok(json!(text)),
                None => Ok(args),
            }
        },
    );
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(ref log_path) = cli.log_file {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .unwrap_or_else(|e| panic!("Failed to open log file {}: {e}", log_path.display()));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let tools = Arc::new(ToolRegistry::new());
    register_builtin_tools(&tools);

    let mut registry = ServerRegistry::new(tools)
        .with_server_info("harbor-mcp", env!("CARGO_PKG_VERSION"))
        .with_created_callback(Arc::new(|path, entry| {
            tracing::info!(
                "server ready: {} on 127.0.0.1:{}",
                path.display(),
                entry.port
            );
        }));
    if let Some(token) = cli.token.clone() {
        registry = registry.with_fixed_token(token);
    }
    let registry = Arc::new(registry);

    println!();
    println!("  harbor-mcp — per-workspace MCP tool server");
    println!();

    for workspace in &cli.workspaces {
        match registry.ensure_server(workspace).await {
            Ok(entry) => {
                println!("  Workspace:  {}", workspace.display());
                println!("    Endpoint: 127.0.0.1:{}", entry.port);
                match entry.auth_token.as_deref() {
                    Some(token) if token.len() > 16 => {
                        println!("    Token:    {}...{}", &token[..8], &token[token.len() - 8..]);
                    }
                    Some(token) => println!("    Token:    {token}"),
                    None => {}
                }
                println!();
            }
            Err(e) => {
                error!("Failed to start server for {}: {e}", workspace.display());
                std::process::exit(1);
            }
        }
    }

    println!("  Press Ctrl+C to stop.");
    println!();

    // Wait for shutdown: Ctrl+C or stdin EOF. Host applications pass a pipe
    // as stdin; when the host dies the pipe closes and we detect EOF here,
    // preventing orphaned server processes.
    let shutdown_notify = Arc::new(tokio::sync::Notify::new());
    {
        let notify = shutdown_notify.clone();
        std::thread::spawn(move || {
            use std::io::Read;
            let mut buf = [0u8; 1];
            loop {
                match std::io::stdin().read(&mut buf) {
                    Ok(0) | Err(_) => {
                        notify.notify_one();
                        return;
                    }
                    Ok(_) => continue,
                }
            }
        });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = shutdown_notify.notified() => {
            eprintln!("stdin closed (parent process gone), shutting down");
        }
    }

    println!();
    println!("  Shutting down...");
    registry.stop_all().await;
    println!("  Stopped.");
}
