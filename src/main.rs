//! canvas-bridge command-line entry point.
//!
//! One binary, three roles: `serve` runs the host, `sandbox` runs an in-memory
//! execution target, and the remaining subcommands are short-lived clients.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use canvas_bridge::bridge::{ConnectionManager, Dispatcher};
use canvas_bridge::client::BridgeClient;
use canvas_bridge::config::BridgeConfig;
use canvas_bridge::http::build_router;
use canvas_bridge::ipc::{connect_with_retry, TargetListener};
use canvas_bridge::mcp::McpServer;
use canvas_bridge::models::{BatchRequest, CommandSpec};
use canvas_bridge::target::{MemoryDocument, TargetAgent};

#[derive(Parser, Debug)]
#[command(name = "canvas-bridge", version, about)]
struct Args {
    /// Host socket path (overrides CANVAS_BRIDGE_SOCKET).
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Host base URL for client commands (overrides CANVAS_BRIDGE_URL).
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the host: target socket plus HTTP front door.
    Serve {
        /// HTTP listen address (overrides CANVAS_BRIDGE_ADDR).
        #[arg(long)]
        addr: Option<std::net::SocketAddr>,
    },
    /// Run an in-memory execution target attached to the host.
    Sandbox {
        /// Connection attempts before giving up.
        #[arg(long, default_value_t = 8)]
        attempts: u32,
    },
    /// Run one command and print its result.
    Exec {
        command: String,
        /// Command arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Run a batch read from a JSON file (`-` for stdin).
    Batch {
        file: PathBuf,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Show whether an execution target is attached.
    Status,
    /// Serve agent tool calls over stdio.
    Mcp,
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run(Args::parse()).await {
        error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout carries command output and MCP messages.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "canvas_bridge=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn run(args: Args) -> Result<()> {
    let mut config = BridgeConfig::from_env().context("failed to load configuration")?;
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    if let Some(url) = args.url {
        config.bridge_url = url.trim_end_matches('/').to_string();
    }

    match args.cmd {
        Command::Serve { addr } => {
            if let Some(addr) = addr {
                config.http_addr = addr;
            }
            serve(config).await
        }
        Command::Sandbox { attempts } => sandbox(config, attempts).await,
        Command::Exec {
            command,
            args,
            timeout_ms,
        } => {
            let args: Value = serde_json::from_str(&args).context("--args must be valid JSON")?;
            let result = client(&config)
                .execute(&command, args, timeout_ms.map(Duration::from_millis))
                .await?;
            print_json(&result)
        }
        Command::Batch { file, timeout_ms } => {
            let commands = read_batch(&file)?;
            let outcome = client(&config)
                .execute_batch(commands, timeout_ms.map(Duration::from_millis))
                .await?;
            print_json(&outcome)
        }
        Command::Status => {
            let status = client(&config).status().await?;
            print_json(&status)
        }
        Command::Mcp => {
            info!(url = %config.bridge_url, "Starting MCP server on stdio");
            McpServer::new(client(&config))
                .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
                .await
        }
    }
}

fn client(config: &BridgeConfig) -> BridgeClient {
    BridgeClient::new(config.bridge_url.clone(), config.heavy_timeout)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Accepts either a bare array of commands or a `{"commands": [...]}` body.
fn read_batch(file: &PathBuf) -> Result<Vec<CommandSpec>> {
    let raw = if file.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("failed to read batch from stdin")?
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?
    };

    let value: Value = serde_json::from_str(&raw).context("batch file is not valid JSON")?;
    if value.is_array() {
        return serde_json::from_value(value).context("invalid batch command list");
    }
    let request: BatchRequest = serde_json::from_value(value).context("invalid batch body")?;
    Ok(request.commands)
}

async fn serve(config: BridgeConfig) -> Result<()> {
    info!("Starting canvas-bridge host v{}", env!("CARGO_PKG_VERSION"));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(ConnectionManager::new()),
        config.timeout_policy(),
    ));

    let target_listener = TargetListener::bind(&config.socket_path, Arc::clone(&dispatcher))?;
    let target_task = tokio::spawn(async move {
        if let Err(e) = target_listener.run().await {
            error!(error = %e, "Target listener stopped");
        }
    });

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    info!(
        addr = %config.http_addr,
        socket = %config.socket_path.display(),
        light_ms = config.light_timeout.as_millis() as u64,
        heavy_ms = config.heavy_timeout.as_millis() as u64,
        "Host ready"
    );

    axum::serve(listener, build_router(dispatcher))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    // Dropping the listener removes the socket file.
    target_task.abort();
    let _ = target_task.await;
    info!("Host stopped");
    Ok(())
}

async fn sandbox(config: BridgeConfig, attempts: u32) -> Result<()> {
    let agent = Arc::new(TargetAgent::new(Arc::new(MemoryDocument::new())));

    loop {
        let stream = connect_with_retry(&config.socket_path, attempts)
            .await
            .with_context(|| format!("could not reach host at {}", config.socket_path.display()))?;
        info!(socket = %config.socket_path.display(), "Sandbox attached to host");

        tokio::select! {
            result = Arc::clone(&agent).serve(stream) => {
                if let Err(e) = result {
                    warn!(error = %e, "Host connection failed");
                }
                info!("Reconnecting");
            }
            _ = shutdown_signal() => return Ok(()),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install ctrl+c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
