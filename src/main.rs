//! jcache server
//!
//! Parses the command line, opens the configured storage backend and serves
//! clients until Ctrl+C.

use clap::Parser;
use jcache::auth::PasswordFile;
use jcache::commands::CommandHandler;
use jcache::config::{Backend, StorageConfig, StorageKind, DEFAULT_STORAGE_PATH};
use jcache::connection::{handle_connection, ConnectionStats};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// A small cache server with pluggable storage.
#[derive(Parser, Debug)]
#[command(name = "jcache", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = jcache::DEFAULT_LISTEN)]
    listen: String,

    /// Storage backend: memory, multi_memory or durable
    #[arg(long = "storage-type", default_value_t = StorageKind::Memory)]
    storage_type: StorageKind,

    /// Number of shards for the multi_memory backend
    #[arg(long = "storage-multi-memory-count", default_value_t = 1)]
    storage_multi_memory_count: usize,

    /// Database file for the durable backend
    #[arg(long = "storage-path", default_value = DEFAULT_STORAGE_PATH)]
    storage_path: PathBuf,

    /// Seconds between expiry sweeps
    #[arg(long = "sweep-interval", default_value_t = 60)]
    sweep_interval: u64,

    /// Password file of user:hash lines; leave unset to disable AUTH
    #[arg(long)]
    htpasswd: Option<PathBuf>,
}

impl Args {
    fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            kind: self.storage_type,
            shard_count: self.storage_multi_memory_count,
            path: self.storage_path.clone(),
            sweep_interval: Duration::from_secs(self.sweep_interval),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!(version = jcache::VERSION, "Starting jcache");

    let passwords = args
        .htpasswd
        .as_ref()
        .map(PasswordFile::load)
        .transpose()?;

    // Shared by every connection
    let backend = Backend::open(&args.storage_config())?;
    let stats = Arc::new(ConnectionStats::new());

    let mut handler = CommandHandler::new(backend.storage());
    if let Some(passwords) = passwords {
        handler = handler.with_passwords(Arc::new(passwords));
    }

    let listener = TcpListener::bind(&args.listen).await?;
    info!(
        address = %args.listen,
        storage = %backend.kind(),
        auth = handler.requires_auth(),
        "Listening"
    );

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, handler, stats) => {}
        _ = shutdown => {}
    }

    backend.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Accepts connections forever, one task per client.
async fn accept_loop(listener: TcpListener, handler: CommandHandler, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = handler.clone();
                let stats = Arc::clone(&stats);
                tokio::spawn(handle_connection(stream, addr, handler, stats));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
