//! Storage Error Vocabulary
//!
//! Every backend reports failures through [`StorageError`]. The first group
//! of variants is the contract vocabulary: expected conditions a caller can
//! act on (missing key, wrong type, ...). The second group covers backend
//! failures that only the durable store or the bootstrap can produce.

use crate::storage::durable::CodecError;
use std::fmt;
use thiserror::Error;

/// The type of value held by an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    String,
    Hash,
    List,
}

impl ValueKind {
    /// Lowercase name, as used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Hash => "hash",
            ValueKind::List => "list",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The key is absent or its item has expired
    #[error("Key does not exist")]
    KeyNotExists,

    /// A create operation found a live item under the key
    #[error("Key already exists")]
    KeyAlreadyExists,

    /// Pop on a list with no elements
    #[error("List is empty")]
    ListEmpty,

    /// The hash has no such field
    #[error("Field does not exist")]
    FieldNotExist,

    /// The item under the key holds a different type than the operation expects
    #[error("Key type is not {0}")]
    TypeMismatch(ValueKind),

    /// The backend does not implement this class of operations
    #[error("Operation is not supported by durable storage")]
    NotSupported,

    /// The embedded engine failed
    #[error("storage engine error: {0}")]
    Engine(#[from] redb::Error),

    /// A stored record could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A backend was constructed with unusable parameters
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A background task was requested outside of a Tokio runtime
    #[error("no Tokio runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

impl StorageError {
    /// Wraps any of redb's specific error types.
    pub(crate) fn engine(err: impl Into<redb::Error>) -> Self {
        StorageError::Engine(err.into())
    }

    /// Returns true for contract errors caused by the request itself,
    /// false for backend failures.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StorageError::KeyNotExists
                | StorageError::KeyAlreadyExists
                | StorageError::ListEmpty
                | StorageError::FieldNotExist
                | StorageError::TypeMismatch(_)
                | StorageError::NotSupported
        )
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(StorageError::KeyNotExists.to_string(), "Key does not exist");
        assert_eq!(
            StorageError::TypeMismatch(ValueKind::Hash).to_string(),
            "Key type is not hash"
        );
        assert_eq!(
            StorageError::NotSupported.to_string(),
            "Operation is not supported by durable storage"
        );
    }

    #[test]
    fn test_client_errors() {
        assert!(StorageError::ListEmpty.is_client_error());
        assert!(StorageError::TypeMismatch(ValueKind::List).is_client_error());
        assert!(!StorageError::Codec(CodecError::Empty).is_client_error());
        assert!(!StorageError::InvalidConfig("x".into()).is_client_error());
    }
}
