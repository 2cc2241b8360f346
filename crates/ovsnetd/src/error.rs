//! Error types for driver operations.
//!
//! Every operation exposed by [`Driver`](crate::Driver) returns a
//! [`DriverError`]. Validation failures are raised before anything is
//! mutated; switch failures carry the database's own `error(details)` text.

use ovsdb_client::OvsdbError;
use std::io;
use thiserror::Error;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors that can occur while handling a driver request.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A request field is missing or malformed.
    #[error("Invalid {field}: {message}")]
    InvalidRequest {
        /// The offending field.
        field: String,
        /// Error message.
        message: String,
    },

    /// No network with this id is registered.
    #[error("Network '{0}' not found")]
    NetworkNotFound(String),

    /// No endpoint with this id exists in the network.
    #[error("Endpoint '{0}' not found")]
    EndpointNotFound(String),

    /// The network still has endpoints and cannot be replaced.
    #[error("Network '{id}' still has {endpoints} endpoint(s)")]
    NetworkInUse {
        /// The network id.
        id: String,
        /// Number of endpoints attached.
        endpoints: usize,
    },

    /// The endpoint address lies in none of the network's subnets.
    #[error("No matching subnet for IP {address} in network {network}")]
    NoMatchingSubnet {
        /// The endpoint address.
        address: String,
        /// The network id.
        network: String,
    },

    /// The port is absent from the local switch cache.
    #[error("Port '{0}' not found in switch cache")]
    PortNotCached(String),

    /// The switch database rejected or failed a request.
    #[error(transparent)]
    Switch(#[from] OvsdbError),

    /// A persisted record was changed by someone else since it was read.
    #[error("Endpoint store conflict on '{key}'")]
    StoreConflict {
        /// The record key.
        key: String,
    },

    /// Reading or writing the endpoint store failed.
    #[error("Endpoint store {operation} failed: {message}")]
    Store {
        /// The operation that failed (e.g., "put", "delete", "list").
        operation: String,
        /// Error message.
        message: String,
    },

    /// A link command could not be spawned.
    #[error("Failed to execute link command '{command}': {source}")]
    LinkExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A link command returned a non-zero exit code.
    #[error("Link command failed: '{command}' (exit code {exit_code}): {output}")]
    LinkCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// The network metadata service failed.
    #[error("Network lookup for '{network}' failed: {message}")]
    Lookup {
        /// The network id.
        network: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Configuration file could not be read or parsed.
    #[error("Failed to load configuration from '{path}': {message}")]
    ConfigLoad {
        /// The file path.
        path: String,
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl DriverError {
    /// Creates an invalid request error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an endpoint store error.
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a network lookup error.
    pub fn lookup(network: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Lookup {
            network: network.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the request was rejected before any state changed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DriverError::InvalidRequest { .. }
                | DriverError::NetworkNotFound(_)
                | DriverError::EndpointNotFound(_)
                | DriverError::NetworkInUse { .. }
                | DriverError::NoMatchingSubnet { .. }
        )
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            DriverError::Switch(e) => e.is_retryable(),
            DriverError::StoreConflict { .. }
            | DriverError::Store { .. }
            | DriverError::Lookup { .. } => true,
            _ => false,
        }
    }
}
