//! Command Module
//!
//! This module implements the command layer for jcache. It parses text
//! request lines, executes them against the storage backend and renders
//! one-line replies.
//!
//! ## Architecture
//!
//! ```text
//! Request line
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Command::parse  │  (parser)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (handler)
//! │  - Dispatch     │
//! │  - Render Reply │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   dyn Storage   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! ### Keys and Strings
//! - `KEYS`, `EXPIRE key ttl`, `DEL key`
//! - `GET key`, `SET key "value" [ttl]`, `UPDATE key "value"`
//!
//! ### Hashes
//! - `HCREATE key [ttl]`, `HSET key field:"value"`, `HGET key field`
//! - `HGETALL key`, `HDEL key field`, `HLEN key`, `HKEYS key`
//!
//! ### Lists
//! - `LCREATE key [ttl]`, `LPUSH key "value"`, `RPUSH key "value"`
//! - `LPOP key`, `RPOP key`, `LLEN key`, `LRANGE key start stop`
//!
//! ### Server
//! - `PING`
//! - `AUTH user password` (only when a password file is configured)

pub mod handler;
pub mod parser;

pub use handler::{CommandHandler, Reply, Session};
pub use parser::{parse_ttl, Command, CommandError};
