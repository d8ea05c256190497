//! Error types for the collaborator boundary.
//!
//! A missing row is never an error here: lookups return `Ok(None)`. These
//! variants describe infrastructure faults and rejected writes.

/// Errors reported by a [`Directory`](crate::Directory) or
/// [`AuthProvider`](crate::AuthProvider) implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    /// The backing store could not be reached.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// A query or RPC was rejected by the backing store.
    #[error("Query error: {message}")]
    Query {
        /// Description of the rejected query.
        message: String,
    },

    /// A write conflicted with an existing row.
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflicting row.
        message: String,
    },

    /// Credentials were rejected by the auth collaborator.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The collaborator call did not finish in time.
    #[error("Timed out after {millis}ms")]
    Timeout {
        /// How long the call ran before giving up.
        millis: u64,
    },
}

impl DirectoryError {
    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Query` error.
    #[must_use]
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Returns `true` if retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}
