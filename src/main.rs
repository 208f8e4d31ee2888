//! Demo server.
//!
//! ```text
//! serve-core --config server.toml
//! ```
//!
//! Answers every request with `<method> <resource>` as plain text and runs
//! until a configured stop trigger fires (Ctrl+C by default).

use std::path::PathBuf;

use clap::Parser;

use serve_core::config::{load_config, ServerConfig};
use serve_core::http::{BoxError, Request, ResponseProperties};
use serve_core::lifecycle::Server;
use serve_core::observability::init_logging;

#[derive(Parser)]
#[command(name = "serve-core")]
#[command(about = "Echo server built on the serving core", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

async fn echo(request: Request) -> Result<ResponseProperties, BoxError> {
    let body = format!("{} {}", request.method(), request.resource());
    Ok(ResponseProperties::new()
        .status(200)
        .header("content-type", "text/plain")
        .header("content-length", body.len())
        .body(body))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    init_logging(config.observability.log_level);
    tracing::info!(config = ?cli.config, "Configuration loaded");

    let server = Server::new(config).request_to_response(echo).start().await?;
    let reason = server.stopped().await;

    tracing::info!(reason = %reason, "Shutdown complete");
    Ok(())
}
