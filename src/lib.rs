//! # jcache - A Small Cache Server with Pluggable Storage
//!
//! jcache stores strings, hashes and lists under string keys, each with an
//! optional time-to-live, and serves them over a line-based text protocol.
//!
//! ## Features
//!
//! - **One contract, three backends**: every store implements
//!   [`storage::Storage`]
//! - **TTL Support**: lazy expiry on access plus a background sweeper
//! - **Sharding**: CRC-32 routed in-memory shards for write concurrency
//! - **Durability**: a redb-backed store that survives restarts
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                              jcache                              │
//! │                                                                  │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐           │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │           │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │           │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘           │
//! │                                               ▼                  │
//! │                     ┌──────────────────────────────────────────┐ │
//! │                     │ dyn Storage                              │ │
//! │                     │ MemoryStorage | ShardedStorage | Durable │ │
//! │                     └──────────────────────────────────────────┘ │
//! │                                               ▲                  │
//! │                     ┌─────────────────────────┴────────────────┐ │
//! │                     │     ExpirySweeper (Background Task)      │ │
//! │                     └──────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use jcache::commands::CommandHandler;
//! use jcache::config::{Backend, StorageConfig};
//! use jcache::connection::{handle_connection, ConnectionStats};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = Backend::open(&StorageConfig::default())?;
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind("127.0.0.1:9999").await?;
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         let handler = CommandHandler::new(backend.storage());
//!         tokio::spawn(handle_connection(stream, addr, handler, Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: the storage contract and its backends
//! - [`commands`]: request parsing and dispatch
//! - [`connection`]: client connection management
//! - [`config`]: backend selection and lifecycle
//! - [`auth`]: optional password file for `AUTH`

pub mod auth;
pub mod commands;
pub mod config;
pub mod connection;
pub mod storage;

// Re-export commonly used types for convenience
pub use auth::PasswordFile;
pub use commands::{Command, CommandHandler, Reply, Session};
pub use config::{Backend, StorageConfig, StorageKind};
pub use connection::{handle_connection, ConnectionStats};
pub use storage::{DurableStorage, MemoryStorage, ShardedStorage, Storage, StorageError};

/// The default address jcache listens on
pub const DEFAULT_LISTEN: &str = "0.0.0.0:9999";

/// Version of jcache
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
