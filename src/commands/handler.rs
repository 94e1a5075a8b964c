//! Command Handler
//!
//! Executes parsed [`Command`]s against any [`Storage`] backend and renders
//! the outcome as a one-line [`Reply`].
//!
//! ## Reply Format
//!
//! | Reply     | Rendered as                         |
//! |-----------|-------------------------------------|
//! | `Ok`      | `OK`                                |
//! | `Pong`    | `PONG`                              |
//! | `Value`   | `"v"`                               |
//! | `Integer` | `3`                                 |
//! | `List`    | `"a" "b"` (empty list: empty line)  |
//! | `Hash`    | `f1:"v1" f2:"v2"`, sorted by field  |
//! | `Error`   | `ERR <message>`                     |
//!
//! ## Authentication
//!
//! With a [`PasswordFile`] attached, a connection's [`Session`] must pass
//! `AUTH user password` before any other command runs. Without one, `AUTH`
//! is rejected and everything else is allowed.

use crate::auth::PasswordFile;
use crate::commands::parser::{Command, CommandError};
use crate::storage::{Storage, StorageError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// The response to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Pong,
    Value(String),
    Integer(i64),
    List(Vec<String>),
    Hash(BTreeMap<String, String>),
    Error(String),
}

impl Reply {
    pub fn error(msg: impl Into<String>) -> Self {
        Reply::Error(msg.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

impl From<StorageError> for Reply {
    fn from(err: StorageError) -> Self {
        Reply::Error(err.to_string())
    }
}

impl From<CommandError> for Reply {
    fn from(err: CommandError) -> Self {
        Reply::Error(err.to_string())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => f.write_str("OK"),
            Reply::Pong => f.write_str("PONG"),
            Reply::Value(v) => write!(f, "\"{}\"", v),
            Reply::Integer(n) => write!(f, "{}", n),
            Reply::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "\"{}\"", item)?;
                }
                Ok(())
            }
            Reply::Hash(fields) => {
                for (i, (field, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}:\"{}\"", field, value)?;
                }
                Ok(())
            }
            Reply::Error(msg) => write!(f, "ERR {}", msg),
        }
    }
}

/// Authentication state of one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    user: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the user this session authenticated as, if any.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

/// Dispatches commands to a shared storage backend.
///
/// Cheap to clone; every connection gets its own copy.
#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<dyn Storage>,
    passwords: Option<Arc<PasswordFile>>,
}

impl CommandHandler {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            passwords: None,
        }
    }

    /// Requires every session to authenticate against `passwords`.
    pub fn with_passwords(mut self, passwords: Arc<PasswordFile>) -> Self {
        self.passwords = Some(passwords);
        self
    }

    pub fn requires_auth(&self) -> bool {
        self.passwords.is_some()
    }

    /// Returns true if executing `command` may block the calling thread,
    /// either on backend I/O or on password hashing.
    pub fn blocks_on(&self, command: &Command) -> bool {
        match command {
            Command::Auth { .. } => self.passwords.is_some(),
            _ => self.storage.is_blocking(),
        }
    }

    /// Parses and executes one request line.
    pub fn execute_line(&self, line: &str, session: &mut Session) -> Reply {
        match Command::parse(line) {
            Ok(command) => self.execute(command, session),
            Err(e) => {
                trace!(error = %e, "Rejected request line");
                e.into()
            }
        }
    }

    /// Executes a command for `session` and returns the reply.
    pub fn execute(&self, command: Command, session: &mut Session) -> Reply {
        if let Command::Auth { user, password } = command {
            return self.authenticate(session, user, &password);
        }
        if self.passwords.is_some() && session.user.is_none() {
            trace!(command = command.name(), "Rejected unauthenticated command");
            return Reply::error("authentication required");
        }

        let name = command.name();
        match self.dispatch(command) {
            Ok(reply) => reply,
            Err(e) => {
                if !e.is_client_error() {
                    warn!(command = name, error = %e, "Storage backend failure");
                }
                e.into()
            }
        }
    }

    /// A failed attempt leaves an earlier login in place.
    fn authenticate(&self, session: &mut Session, user: String, password: &str) -> Reply {
        let Some(passwords) = &self.passwords else {
            return Reply::error("authentication is not enabled");
        };

        if passwords.verify(&user, password) {
            debug!(user = %user, "Client authenticated");
            session.user = Some(user);
            Reply::Ok
        } else {
            warn!(user = %user, "Authentication failed");
            Reply::error("invalid username or password")
        }
    }

    fn dispatch(&self, command: Command) -> Result<Reply, StorageError> {
        let storage = &self.storage;
        let reply = match command {
            // Handled before dispatch
            Command::Auth { .. } => Reply::error("unexpected AUTH"),
            Command::Ping => Reply::Pong,
            Command::Keys => Reply::List(storage.keys()?),
            Command::Expire { key, ttl } => {
                storage.expire(&key, ttl)?;
                Reply::Ok
            }
            Command::Get { key } => Reply::Value(storage.get(&key)?),
            Command::Set { key, value, ttl } => {
                storage.set(&key, &value, ttl)?;
                Reply::Ok
            }
            Command::Update { key, value } => {
                storage.update(&key, &value)?;
                Reply::Ok
            }
            Command::Delete { key } => {
                storage.delete(&key)?;
                Reply::Ok
            }
            Command::HashCreate { key, ttl } => {
                storage.hash_create(&key, ttl)?;
                Reply::Ok
            }
            Command::HashGet { key, field } => Reply::Value(storage.hash_get(&key, &field)?),
            Command::HashGetAll { key } => Reply::Hash(storage.hash_get_all(&key)?),
            Command::HashSet { key, field, value } => {
                storage.hash_set(&key, &field, &value)?;
                Reply::Ok
            }
            Command::HashDelete { key, field } => {
                storage.hash_delete(&key, &field)?;
                Reply::Ok
            }
            Command::HashLen { key } => Reply::Integer(len(storage.hash_len(&key)?)),
            Command::HashKeys { key } => Reply::List(storage.hash_keys(&key)?),
            Command::ListCreate { key, ttl } => {
                storage.list_create(&key, ttl)?;
                Reply::Ok
            }
            Command::ListLeftPush { key, value } => {
                storage.list_left_push(&key, &value)?;
                Reply::Ok
            }
            Command::ListRightPush { key, value } => {
                storage.list_right_push(&key, &value)?;
                Reply::Ok
            }
            Command::ListLeftPop { key } => Reply::Value(storage.list_left_pop(&key)?),
            Command::ListRightPop { key } => Reply::Value(storage.list_right_pop(&key)?),
            Command::ListLen { key } => Reply::Integer(len(storage.list_len(&key)?)),
            Command::ListRange { key, start, stop } => {
                Reply::List(storage.list_range(&key, start, stop)?)
            }
        };
        Ok(reply)
    }
}

fn len(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
