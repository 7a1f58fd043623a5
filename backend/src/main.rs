//! Tether server.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tether::{config::Config, create_app_with_state, mcp::CatalogExecutor, state::AppState};

/// Tether - resumable MCP Streamable HTTP server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Additional TOML config file, merged after the user and local ones
    #[arg(short, long, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

/// Install the tracing subscriber. The returned guard flushes the log file on drop.
fn init_logging(config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = match &config.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("log_file has no file name: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_figment(args.host, args.port, args.log_level, args.config.as_deref())?;
    let _log_guard = init_logging(&config)?;

    info!("Starting Tether MCP server v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config.log_file {
        info!("Logging to file: {}", path.display());
    }

    let state = AppState::from_config(&config, Arc::new(CatalogExecutor::default()));
    let sweeper = state.cleanup_sweeper();
    sweeper.start();

    let app = create_app_with_state(state.clone()).await;

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.stop().await;
    let closed = state.sessions().terminate_all().await;
    info!("Server stopped ({} session(s) closed)", closed);

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down gracefully...");
}
