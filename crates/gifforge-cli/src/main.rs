//! gifforge CLI
//!
//! Serves the session HTTP API and the published GIFs.

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use gifforge_session::{create_router, AppState, Config, OrderStoreConfig, SessionCoordinator};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// gifforge - turn uploaded images into animated GIFs
///
/// Keeps a private, ordered image collection per browser session and
/// renders it into a GIF on request.
#[derive(Parser, Debug)]
#[command(name = "gifforge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: gifforge.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Address to bind the HTTP server to
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Port for the HTTP server
    #[arg(short, long)]
    port: Option<u16>,

    /// Root directory for uploads and generated GIFs
    #[arg(short, long, value_name = "DIR")]
    storage_root: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("gifforge starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run_server(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration, wires the coordinator and serves until Ctrl+C.
async fn run_server(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(ref host) = args.host {
        config.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(ref storage_root) = args.storage_root {
        config.storage_root.clone_from(storage_root);
    }

    // Re-validate after overrides
    config.validate().map_err(|e| anyhow::anyhow!("{e}"))?;

    print_config(&config);

    tokio::fs::create_dir_all(&config.storage_root)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to create storage root: {e}\n\nPath: {}",
                config.storage_root
            )
        })?;

    let coordinator = SessionCoordinator::from_config(&config)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let router = create_router(AppState::new(Arc::new(coordinator)));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| {
            anyhow::anyhow!(
                "Invalid bind address '{}:{}': {e}\n\nSuggestion: Use an IP address such as 0.0.0.0 for host",
                config.host,
                config.port
            )
        })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind HTTP server to {addr}: {e}\n\nSuggestion: Use --port to pick a free port"
        )
    })?;

    println!();
    println!("gifforge running on http://{addr}");
    tracing::info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("gifforge stopped");
    Ok(())
}

/// Resolves once Ctrl+C is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!();
    println!("Shutting down...");
}

/// Loads configuration from the explicit path or the working directory.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Prints the effective configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Listen: {}:{}", config.host, config.port);
    println!("  Storage root: {}", config.storage_root);
    println!("  Public URL prefix: {}", config.public_url_prefix);
    println!(
        "  Defaults: {}ms per frame, loop count {}",
        config.default_duration_ms, config.default_loop_count
    );
    println!("  Max upload: {} bytes", config.max_upload_bytes);
    println!("  Generate timeout: {}s", config.generate_timeout_secs);
    match &config.order_store {
        OrderStoreConfig::Memory => println!("  Order store: memory"),
        OrderStoreConfig::Redis { url, .. } => println!("  Order store: redis ({url})"),
    }
    if config.optimizer.enabled {
        println!("  Optimizer: {}", config.optimizer.binary);
    } else {
        println!("  Optimizer: disabled");
    }
}
