//! Error taxonomy for identity resolution.

use crate::multiaddr::FormatError;
use std::time::Duration;
use thiserror::Error;

/// Failure executing a command inside a workload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Command exited with {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure talking to the identity cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache IO error: {0}")]
    Io(String),
}

/// Failure resolving a node's identity or connections.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Remote execution failed on {node}: {source}")]
    Execution {
        node: String,
        #[source]
        source: ExecError,
    },

    #[error("Empty identity returned by {0}")]
    EmptyIdentity(String),

    #[error("Invalid address for {node}: {source}")]
    Format {
        node: String,
        #[source]
        source: FormatError,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Resolution cancelled")]
    Cancelled,
}

impl ResolveError {
    pub fn execution(node: impl Into<String>, source: ExecError) -> Self {
        ResolveError::Execution {
            node: node.into(),
            source,
        }
    }

    pub fn format(node: impl Into<String>, source: FormatError) -> Self {
        ResolveError::Format {
            node: node.into(),
            source,
        }
    }

    /// Whether the failure may clear up on its own and is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            ResolveError::Execution { .. }
            | ResolveError::EmptyIdentity(_)
            | ResolveError::Cache(_) => true,
            ResolveError::Format { .. } | ResolveError::Cancelled => false,
        }
    }

    pub fn is_format(&self) -> bool {
        matches!(self, ResolveError::Format { .. })
    }
}

pub type Result<T> = std::result::Result<T, ResolveError>;
