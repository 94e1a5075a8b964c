//! Connection Handler Module
//!
//! This module handles individual client connections to jcache.
//! Each client gets its own handler task that runs in a loop,
//! reading request lines and writing one reply line per request.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │  Read bytes into buffer      │
//!    │  Split off complete lines    │
//!    │  Execute each line           │
//!    │  Write reply + '\n'          │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / error
//! ```
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a `BytesMut`; a read may carry half a line
//! or several lines. A line that grows past [`MAX_LINE_LENGTH`] without a
//! newline closes the connection.
//!
//! ## Blocking Work
//!
//! Commands that [`CommandHandler::blocks_on`] reports as blocking (durable
//! storage calls and `AUTH` hashing) run through `spawn_blocking`, one at a
//! time and in request order. Everything else runs inline on the task.

use crate::commands::{Command, CommandHandler, Reply, Session};
use bytes::{Buf, BytesMut};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, trace, warn};

/// Longest accepted request line, newline excluded (64 KiB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Stream ended in the middle of a line
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// A request line exceeded [`MAX_LINE_LENGTH`]
    #[error("Request line too long")]
    LineTooLong,

    /// A request line was not valid UTF-8
    #[error("Request line is not valid UTF-8")]
    InvalidUtf8,

    /// A command offloaded to the blocking pool did not complete
    #[error("Command task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Handles a single client connection.
///
/// Generic over the stream so that tests can drive it with mock I/O.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,
    /// Peer description (for logging)
    peer: String,
    buffer: BytesMut,
    command_handler: CommandHandler,
    session: Session,
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: impl fmt::Display,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            peer: peer.to_string(),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            session: Session::new(),
            stats,
        }
    }

    /// Runs the read-execute-respond loop until the client goes away.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.peer, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.peer, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                info!(client = %self.peer, "Client disconnected")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.peer, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.peer, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(line) = self.next_line()? {
                let reply = self.execute(&line).await?;
                self.stats.command_processed();
                trace!(client = %self.peer, reply = %reply, "Executed request");
                self.send_line(&reply.to_string()).await?;
            }
            self.stream.flush().await?;

            self.read_more_data().await?;
        }
    }

    /// Executes one request line against this connection's session.
    async fn execute(&mut self, line: &str) -> Result<Reply, ConnectionError> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                trace!(client = %self.peer, error = %e, "Rejected request line");
                return Ok(e.into());
            }
        };

        if !self.command_handler.blocks_on(&command) {
            return Ok(self.command_handler.execute(command, &mut self.session));
        }

        let handler = self.command_handler.clone();
        let mut session = std::mem::take(&mut self.session);
        let (reply, session) = tokio::task::spawn_blocking(move || {
            let reply = handler.execute(command, &mut session);
            (reply, session)
        })
        .await?;
        self.session = session;
        Ok(reply)
    }

    /// Splits the next complete line off the buffer, if there is one.
    fn next_line(&mut self) -> Result<Option<String>, ConnectionError> {
        let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
            if self.buffer.len() > MAX_LINE_LENGTH {
                error!(
                    client = %self.peer,
                    size = self.buffer.len(),
                    "Request line limit exceeded"
                );
                return Err(ConnectionError::LineTooLong);
            }
            return Ok(None);
        };

        let mut line = self.buffer.split_to(pos);
        self.buffer.advance(1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        if line.len() > MAX_LINE_LENGTH {
            return Err(ConnectionError::LineTooLong);
        }

        String::from_utf8(line.to_vec())
            .map(Some)
            .map_err(|_| ConnectionError::InvalidUtf8)
    }

    /// Reads more data from the stream into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.peer, bytes = n, "Read data");
        Ok(())
    }

    async fn send_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stats.bytes_written(line.len() + 1);
        Ok(())
    }
}

/// Handles a client connection to completion.
///
/// Convenience wrapper around [`ConnectionHandler`] that swallows the
/// ordinary ways a connection ends.
pub async fn handle_connection<S>(
    stream: S,
    peer: impl fmt::Display,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer = peer.to_string();
    let handler = ConnectionHandler::new(stream, &peer, command_handler, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %peer, error = %e, "Connection ended with error");
            }
        }
    }
}
