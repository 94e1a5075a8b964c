//! Password File Authentication
//!
//! When the server starts with a password file, every connection must send
//! `AUTH user password` before any other command.
//!
//! The file holds one `user:hash` entry per line, where `hash` is an Argon2
//! PHC string:
//!
//! ```text
//! # jcache users
//! ariz:$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$...
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. The file is read
//! once at startup.

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while loading a password file.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to read password file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: expected user:hash")]
    MalformedLine { line: usize },

    #[error("line {line}: invalid password hash for user '{user}'")]
    InvalidHash { line: usize, user: String },

    #[error("line {line}: duplicate user '{user}'")]
    DuplicateUser { line: usize, user: String },

    #[error("password file has no users")]
    NoUsers,
}

/// Users and their password hashes.
#[derive(Clone)]
pub struct PasswordFile {
    users: HashMap<String, String>,
}

impl fmt::Debug for PasswordFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordFile")
            .field("users", &self.users.len())
            .finish()
    }
}

impl PasswordFile {
    /// Reads and validates the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| AuthError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let file = Self::parse(&contents)?;
        info!(path = %path.display(), users = file.len(), "Password file loaded");
        Ok(file)
    }

    /// Parses file contents. Every hash must be a well-formed PHC string.
    pub fn parse(contents: &str) -> Result<Self, AuthError> {
        let mut users = HashMap::new();

        for (index, raw) in contents.lines().enumerate() {
            let line = index + 1;
            let entry = raw.trim();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }

            let (user, hash) = entry
                .split_once(':')
                .filter(|(user, hash)| !user.is_empty() && !hash.is_empty())
                .ok_or(AuthError::MalformedLine { line })?;

            if PasswordHash::new(hash).is_err() {
                return Err(AuthError::InvalidHash {
                    line,
                    user: user.to_string(),
                });
            }
            if users.insert(user.to_string(), hash.to_string()).is_some() {
                return Err(AuthError::DuplicateUser {
                    line,
                    user: user.to_string(),
                });
            }
        }

        if users.is_empty() {
            return Err(AuthError::NoUsers);
        }
        Ok(Self { users })
    }

    /// Returns the number of users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Checks `password` against the stored hash for `user`.
    ///
    /// Hash verification is slow CPU work; async callers should run it on
    /// the blocking pool.
    pub fn verify(&self, user: &str, password: &str) -> bool {
        let Some(hash) = self.users.get(user) else {
            debug!(user, "Unknown user");
            return false;
        };
        match PasswordHash::new(hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

/// Builds a `user:hash` line with cheap Argon2 parameters.
#[cfg(test)]
pub(crate) fn password_line(user: &str, password: &str) -> String {
    use argon2::password_hash::{PasswordHasher, SaltString};
    use argon2::{Algorithm, Params, Version};

    let salt = SaltString::encode_b64(b"jcache-test-salt").unwrap();
    let params = Params::new(1024, 1, 1, None).unwrap();
    let hash = Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password(password.as_bytes(), &salt)
        .unwrap();
    format!("{}:{}", user, hash)
}
