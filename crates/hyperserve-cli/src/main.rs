//! The `hyperserve` binary.
//!
//! Serves HTTP with the MCP control plane according to CLI flags and `HS_*`
//! environment overrides. Log output goes to stderr so the stdio transport
//! keeps stdout clean for JSON-RPC responses.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use hyperserve::prelude::*;
use hyperserve_mcp::StdioTransport;
use hyperserve_server::options::{DiscoveryPolicy, McpTransportKind};

#[derive(Debug, Parser)]
#[command(name = "hyperserve", version, about = "Hardened, observable, AI-controllable HTTP runtime")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 8080, env = "HS_PORT")]
    port: u16,

    /// Bind host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable the MCP control plane
    #[arg(long, env = "HS_MCP_ENABLED")]
    mcp: bool,

    /// Enable MCP developer mode (request debugger, route inspector)
    #[arg(long = "mcp-dev", env = "HS_MCP_DEV")]
    mcp_dev: bool,

    /// Register the MCP observability resources
    #[arg(long = "mcp-observability", env = "HS_MCP_OBSERVABILITY")]
    mcp_observability: bool,

    /// MCP transport: http or stdio
    #[arg(long = "mcp-transport", default_value = "http", env = "HS_MCP_TRANSPORT")]
    mcp_transport: McpTransportKind,

    /// Advertised MCP server name
    #[arg(long = "mcp-server-name", default_value = "hyperserve", env = "HS_MCP_SERVER_NAME")]
    mcp_server_name: String,

    /// Advertised MCP server version
    #[arg(long = "mcp-server-version", env = "HS_MCP_SERVER_VERSION")]
    mcp_server_version: Option<String>,

    /// Discovery policy: none, count, authenticated or public
    #[arg(long = "mcp-discovery", default_value = "count")]
    mcp_discovery: DiscoveryPolicy,

    /// Hardened mode: security headers on every route
    #[arg(long, env = "HS_HARDENED_MODE")]
    hardened: bool,

    /// Log filter (overrides RUST_LOG)
    #[arg(long = "log-level", env = "HS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Graceful shutdown timeout in seconds
    #[arg(long = "shutdown-timeout", default_value_t = 30, env = "HS_SHUTDOWN_TIMEOUT")]
    shutdown_timeout: u64,

    /// Verbose logging (debug level)
    #[arg(long, short)]
    verbose: bool,
}

fn build_server(cli: &Cli) -> Server {
    let defaults = McpOptions::default();
    let server_version = cli
        .mcp_server_version
        .clone()
        .unwrap_or_else(|| defaults.server_version.clone());
    let mcp = McpOptions {
        enabled: cli.mcp,
        dev_mode: cli.mcp_dev,
        observability: cli.mcp_observability,
        transport: cli.mcp_transport,
        server_name: cli.mcp_server_name.clone(),
        server_version,
        discovery_policy: cli.mcp_discovery,
        ..defaults
    };

    ServerBuilder::new()
        .addr(format!("{}:{}", cli.host, cli.port))
        .hardened(cli.hardened)
        .mcp(mcp)
        .build()
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = cli
        .log_level
        .clone()
        .or_else(|| cli.verbose.then(|| "debug".to_string()))
        .unwrap_or_else(|| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()));
    let env_filter = tracing_subscriber::EnvFilter::new(filter);

    let server = build_server(&cli);
    let install = match hyperserve_mcp::install(&server) {
        Ok(install) => install,
        Err(e) => {
            eprintln!("failed to install MCP control plane: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Logs go to stderr; the buffer layer feeds logs://server/recent.
    tracing_subscriber::registry()
        .with(env_filter)
        .with(install.logs.layer())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if cli.mcp && cli.mcp_transport == McpTransportKind::Stdio {
        info!("serving MCP over stdio");
        let transport = StdioTransport::new(install.handler.engine());
        return match transport.run().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "stdio transport failed");
                ExitCode::FAILURE
            }
        };
    }

    server.add_default_middleware();

    let shutdown = server.shutdown_handle();
    let timeout = Duration::from_secs(cli.shutdown_timeout);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("signal received, shutting down");
        if tokio::time::timeout(timeout, shutdown.shutdown()).await.is_err() {
            error!("graceful shutdown timed out");
            std::process::exit(1);
        }
    });

    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server terminated");
            ExitCode::FAILURE
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => return tokio::signal::ctrl_c().await.unwrap_or_default(),
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
