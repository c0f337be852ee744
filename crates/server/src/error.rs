//! Server errors.

use protosim_stubbing::PrimeError;
use protosim_types::{NodeAddress, NodeKey};
use std::time::Duration;
use thiserror::Error;

/// Errors from address resolution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolverError {
    /// Every address the policy can produce is in use. Treated as a
    /// misconfiguration; the policy never wraps around.
    #[error("Address space exhausted: {0}")]
    Exhausted(String),
}

/// Errors from topology management.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Duplicate ids, unknown ids, nodes that already belong to a cluster.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to bind node {node} to {address}: {source}")]
    Bind {
        node: NodeKey,
        address: NodeAddress,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {timeout:?} binding node {node} to {address}")]
    BindTimeout {
        node: NodeKey,
        address: NodeAddress,
        timeout: Duration,
    },

    #[error("Address resolution failed: {0}")]
    Resolver(#[from] ResolverError),

    #[error("Invalid prime: {0}")]
    Prime(#[from] PrimeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server is shut down")]
    Shutdown,
}

impl ServerError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        ServerError::Config(message.into())
    }

    /// Whether this failure was a bind timeout rather than a refusal.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ServerError::BindTimeout { .. })
    }
}
