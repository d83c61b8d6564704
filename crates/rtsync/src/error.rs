//! Error types for route reconciliation.

use std::io;

use crate::addr::{AddrError, Family};
use crate::backend::{BackendError, RouteOp};

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or applying the route table.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The kernel table could not be dumped. The route store is untouched.
    #[error("failed to snapshot {family} routes: {source}")]
    Snapshot {
        family: Family,
        #[source]
        source: BackendError,
    },

    /// A single route operation failed. Logged by the driver, never fatal.
    #[error("{op} {route}: {source}")]
    Apply {
        op: RouteOp,
        /// Description of the route, as logged.
        route: String,
        #[source]
        source: BackendError,
    },

    /// The route arena is at its configured limit.
    #[error("route allocation failed: limit of {limit} routes reached")]
    AllocationFailure { limit: usize },

    /// A producer could not enumerate its routes.
    #[error("producer {producer}: {message}")]
    Producer { producer: String, message: String },

    /// A route or event named an interface that is not in the table.
    #[error("interface not found: {name}")]
    InterfaceNotFound { name: String },

    /// Address or prefix error.
    #[error(transparent)]
    Addr(#[from] AddrError),

    /// Configuration is well-formed but semantically invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// YAML parse error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Build a producer error.
    pub fn producer(producer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Producer {
            producer: producer.into(),
            message: message.into(),
        }
    }

    /// Check if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::InterfaceNotFound { .. } => true,
            Self::Snapshot { source, .. } | Self::Apply { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if the kernel reported the route as already present.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Snapshot { source, .. } | Self::Apply { source, .. } => {
                source.is_already_exists()
            }
            _ => false,
        }
    }

    /// Get the errno value if a kernel error is at the root.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Snapshot { source, .. } | Self::Apply { source, .. } => source.errno(),
            Self::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}
