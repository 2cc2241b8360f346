//! Error types for switch database operations.

use std::io;
use thiserror::Error;

/// Result type alias for switch database operations.
pub type OvsdbResult<T> = Result<T, OvsdbError>;

/// Errors that can occur while talking to the switch database.
#[derive(Debug, Error)]
pub enum OvsdbError {
    /// Could not reach the database socket.
    #[error("Failed to connect to switch database at '{path}': {source}")]
    Connect {
        /// Socket path.
        path: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Reading from or writing to the connection failed.
    #[error("Switch database I/O error: {0}")]
    Io(#[from] io::Error),

    /// The connection closed while a request was outstanding.
    #[error("Switch database connection closed")]
    Disconnected,

    /// The server answered a JSON-RPC request with an error object.
    #[error("Switch database RPC '{method}' failed: {message}")]
    Rpc {
        /// The JSON-RPC method.
        method: String,
        /// Error object rendered as text.
        message: String,
    },

    /// A message could not be encoded or decoded.
    #[error("Malformed switch database message: {0}")]
    Protocol(String),

    /// One operation of a transaction was rejected; nothing was committed.
    #[error("{error}({details})")]
    Transaction {
        /// Index of the failing operation in the transaction.
        index: usize,
        /// Short error tag, e.g. "constraint violation".
        error: String,
        /// Human-readable detail supplied by the server.
        details: String,
    },
}

impl OvsdbError {
    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Creates a transaction error from a failed reply.
    pub fn transaction(index: usize, error: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Transaction {
            index,
            error: error.into(),
            details: details.into(),
        }
    }

    /// Returns true if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OvsdbError::Connect { .. } | OvsdbError::Io(_) | OvsdbError::Disconnected
        )
    }
}

impl From<serde_json::Error> for OvsdbError {
    fn from(e: serde_json::Error) -> Self {
        OvsdbError::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_error_combines_message_and_details() {
        let err = OvsdbError::transaction(1, "constraint violation", "duplicate name p1");
        assert_eq!(err.to_string(), "constraint violation(duplicate name p1)");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_is_retryable() {
        assert!(OvsdbError::Disconnected.is_retryable());
        assert!(!OvsdbError::protocol("bad frame").is_retryable());
    }
}
