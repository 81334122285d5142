use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use toolgate_core::Gateway;
use toolgate_server::api;
use toolgate_server::config::{AppState, ServerConfig, DEFAULT_HOST, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(name = "toolgate")]
#[command(about = "Gateway that exposes stdio tool providers over HTTP", long_about = None)]
struct Args {
    /// Path to configuration file (.toml, or .json for the mcp.servers layout)
    #[arg(short, long, env = "TOOLGATE_CONFIG", default_value = "toolgate.toml")]
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long, env = "TOOLGATE_PORT")]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "TOOLGATE_HOST")]
    host: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "toolgate=info,tower_http=debug".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    tracing::info!("Starting toolgate");

    // Load configuration
    let config = ServerConfig::load(&args.config)?;
    let host = args
        .host
        .or_else(|| config.server.host.clone())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = args.port.or(config.server.port).unwrap_or(DEFAULT_PORT);

    let gateway = Arc::new(Gateway::start(config.gateway_config())?);

    // Start API server
    let addr = format!("{}:{}", host, port);
    let state = AppState::new(Arc::clone(&gateway));
    let stopping = Arc::clone(&gateway);
    let served = api::serve(&addr, state, async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        stopping.shutdown().await;
    })
    .await;

    gateway.shutdown().await;
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
