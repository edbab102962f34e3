//! ServiceNow MCP gateway
//!
//! Entry point: `--mcp-server` serves MCP over stdio, otherwise the gateway
//! answers JSON-RPC envelopes over HTTP.

use clap::Parser;
use servicenow_mcp_core::{
    api::{ApiServer, ApiServerConfig},
    build_server,
    error::{Result, ServiceNowError},
    McpServer, ServiceNowClient, ServiceNowConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "servicenow-mcp")]
#[command(about = "Model Context Protocol gateway for ServiceNow", long_about = None)]
#[command(version)]
struct Cli {
    /// Serve MCP over stdin/stdout instead of HTTP
    #[arg(long)]
    mcp_server: bool,

    /// Configuration file (TOML); SERVICENOW_* environment variables override it
    #[arg(short, long, env = "SERVICENOW_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long, default_value = "127.0.0.1:7071")]
    http_addr: String,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn init_tracing(log_level: &str) {
    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Our crates at the requested level, HTTP internals quieter
    let filter = EnvFilter::new(format!(
        "servicenow_mcp={lvl},servicenow_mcp_core={lvl},tower_http={lvl},hyper=warn,reqwest=warn",
        lvl = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // stdout carries the protocol stream
        .init();
}

/// Cancel the server's token on Ctrl-C
fn spawn_shutdown_listener(server: &McpServer) {
    let token = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                token.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    debug!("servicenow-mcp v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = ServiceNowConfig::load(cli.config.as_deref())?;
    info!("Using ServiceNow instance {}", config.instance_url);

    let client = Arc::new(ServiceNowClient::new(&config)?);
    let server = Arc::new(build_server(client)?);
    spawn_shutdown_listener(&server);

    if cli.mcp_server {
        return server.run_stdio().await;
    }

    let addr: SocketAddr = cli.http_addr.parse().map_err(|e| {
        ServiceNowError::InvalidArgument(format!("Invalid address '{}': {}", cli.http_addr, e))
    })?;

    ApiServer::new(ApiServerConfig { addr }, server).serve().await?;
    Ok(())
}
