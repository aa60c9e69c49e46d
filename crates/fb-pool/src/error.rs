//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by a connection factory.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur acquiring or managing pooled connections.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No capacity became available within the acquire timeout.
    #[error("timed out after {0:?} waiting for a pooled connection")]
    Timeout(Duration),

    /// The pool has been cleared or removed.
    #[error("connection pool is closed")]
    PoolClosed,

    /// The pool configuration is invalid.
    #[error("invalid pool configuration: {0}")]
    Config(String),

    /// Opening a new physical connection failed.
    #[error("failed to open a pooled connection: {0}")]
    Connect(#[source] BoxError),
}
