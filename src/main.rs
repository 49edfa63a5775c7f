//! Mock API Server - CLI Entry Point

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use mock_api_server::{router, AppState, MockStore, Registry, ServerConfig};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mock-api-server",
    about = "Persistent mock API server - register fake routes and replay canned responses",
    version
)]
struct Args {
    /// Path to the fixture configuration file
    #[arg(short, long, default_value = "mock-api.yaml")]
    config: PathBuf,

    /// Path to the SQLite mock store
    #[arg(short, long, default_value = "mock-api.db")]
    db: PathBuf,

    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:3042")]
    bind: SocketAddr,

    /// Secret the Authorization header must exactly equal
    #[arg(long, env = "MOCK_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print default config if requested
    if args.print_config {
        println!("{}", mock_api_server::config::DEFAULT_CONFIG);
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        ServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default fixture configuration");
        ServerConfig::default()
    };

    // Validate and exit if requested
    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} fixture events defined)",
            config.events.len()
        );
        return Ok(());
    }

    let Some(token) = args.token else {
        anyhow::bail!("No secret token configured (set MOCK_API_TOKEN or pass --token)");
    };

    // Open the store and load the route index
    let store = MockStore::open(args.db)?;
    let registry = Registry::open(store).await?;

    let state = AppState {
        registry: Arc::new(registry),
        config: Arc::new(config),
        token: Arc::from(token.as_str()),
    };

    info!(bind = %args.bind, "Starting mock API server");
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to install shutdown handler");
        return;
    }
    info!("Shutdown requested");
}
