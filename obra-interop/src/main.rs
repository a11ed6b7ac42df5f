//! obra-interop - Regulator interoperability service
//!
//! Submits contracts, measurements and works status to the external audit
//! Regulator, imports its settlements, and exposes the integration ledger.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use obra_common::config::TomlConfig;
use obra_common::events::EventBus;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use obra_interop::AppState;

const DEFAULT_PORT: u16 = 5790;

/// Command-line arguments for obra-interop
#[derive(Parser, Debug)]
#[command(name = "obra-interop")]
#[command(about = "Regulator interoperability service for Obra")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "OBRA_INTEROP_PORT")]
    port: Option<u16>,

    /// SQLite database file
    #[arg(short, long, env = "OBRA_DATABASE_PATH")]
    database: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "OBRA_CONFIG")]
    config: Option<PathBuf>,

    /// Regulator base URL, overriding the config file
    #[arg(long, env = "OBRA_REGULATOR_URL")]
    regulator_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = TomlConfig::load_or_default(args.config.as_deref());

    let default_filter = format!(
        "obra_interop={level},obra_common={level},tower_http=info",
        level = config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting obra-interop version {}", env!("CARGO_PKG_VERSION"));

    if let Some(url) = args.regulator_url {
        config.regulator.base_url = url;
    }
    info!("Regulator: {}", config.regulator.base_url);

    let db_path = config.resolve_database_path(args.database.as_deref());
    info!("Database: {}", db_path.display());
    let db_pool = obra_interop::db::init_database_pool(&db_path)
        .await
        .context("Failed to initialize database")?;

    let event_bus = EventBus::new(100);
    let port = args.port.or(config.port).unwrap_or(DEFAULT_PORT);

    let state = AppState::from_config(db_pool, event_bus, config)
        .context("Failed to build Regulator client")?;
    let app = obra_interop::build_router(state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
