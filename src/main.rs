use clap::Parser;
use emberd::config::Config;
use emberd::crypto::CryptoManager;
use emberd::db::Database;
use emberd::network::Gateway;
use emberd::security::session::spawn_sweeper;
use emberd::state::Hub;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "emberd", about = "Line-oriented encrypted chat daemon")]
struct Args {
    /// Path to the server configuration file.
    #[arg(short, long, default_value = "configs/server.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Config is loaded before tracing so the configured level can seed the
    // default filter; RUST_LOG still wins.
    let config = Config::load(&args.config).map_err(|e| {
        eprintln!("Failed to load config {}: {e}", args.config);
        e
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .with_target(true)
        .init();

    info!(
        server = %config.server.server_name,
        port = config.server.port,
        "Starting emberd"
    );

    let db = Database::new(&config.database).await.map_err(|e| {
        error!(error = %e, "Failed to open database");
        e
    })?;

    let crypto = Arc::new(CryptoManager::initialize(&config.security).map_err(|e| {
        error!(error = %e, "Failed to initialize crypto");
        e
    })?);

    let hub = Arc::new(Hub::new(config, db, crypto));

    spawn_sweeper(Arc::clone(&hub.sessions), hub.shutdown.clone());

    // Signal handling: first SIGINT/SIGTERM starts the graceful shutdown.
    let shutdown = hub.shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Initiating graceful shutdown");
        shutdown.cancel();
    });

    let gateway = Gateway::bind(Arc::clone(&hub)).await.map_err(|e| {
        error!(error = %e, "Failed to bind listener");
        e
    })?;
    gateway.run().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
