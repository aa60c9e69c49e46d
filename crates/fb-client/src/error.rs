//! Client error types.
//!
//! Every failure surfaced to callers is an [`Error`]. Wire-layer failures
//! keep the server's status code and message list; [`Error::kind`] maps
//! each variant onto a coarse category for callers that branch on it.

use std::time::Duration;

use fb_pool::PoolError;
use fb_protocol::ProtocolError;
use fb_types::TypeError;
use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An operation attempted in a state that does not allow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    /// A data reader is still open on the statement.
    #[error("a data reader is already open for this statement")]
    ReaderOpen,
    /// The statement or session has no open connection.
    #[error("no open connection")]
    NotConnected,
    /// The connection already has an unfinished transaction.
    #[error("a transaction is already active on this connection")]
    TransactionActive,
    /// The transaction was already committed or rolled back.
    #[error("the transaction has already been committed or rolled back")]
    TransactionFinalized,
    /// The statement has no SQL text.
    #[error("command text is empty")]
    EmptyCommandText,
    /// The statement has not been prepared.
    #[error("the statement is not prepared")]
    NotPrepared,
    /// The transaction belongs to a different connection.
    #[error("the transaction belongs to a different connection")]
    TransactionMismatch,
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or missing connection-string fields.
    Configuration,
    /// No pooled connection became available in time.
    PoolTimeout,
    /// The server or the link reported a failure.
    Protocol,
    /// The operation is invalid in the current state.
    State,
    /// A parameter could not be typed or converted.
    Parameter,
    /// The operation is not supported.
    Unsupported,
}

/// Errors returned by the client.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection string or options failed validation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No pooled connection became available within the connection timeout.
    #[error("timed out after {0:?} waiting for a pooled connection")]
    PoolTimeout(Duration),

    /// The pool was closed while acquiring a connection.
    #[error("connection pool is closed")]
    PoolClosed,

    /// Failure reported by the wire layer.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Operation invalid in the current state.
    #[error("invalid state: {0}")]
    State(#[from] StateError),

    /// Parameter could not be described or bound.
    #[error("parameter error: {0}")]
    Parameter(String),

    /// A name spliced into SQL is not a valid identifier.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Operation not supported by the driver.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Value conversion failed.
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl Error {
    /// Classify the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::PoolTimeout(_) => ErrorKind::PoolTimeout,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::State(_) | Self::PoolClosed => ErrorKind::State,
            Self::Parameter(_) | Self::InvalidIdentifier(_) | Self::Type(_) => {
                ErrorKind::Parameter
            }
            Self::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    /// Whether retrying the operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::PoolTimeout(_) | Self::PoolClosed => true,
            Self::Protocol(e) => e.is_transient(),
            _ => false,
        }
    }

    /// The wire error, if this is one.
    #[must_use]
    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        match self {
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }

    /// The state error, if this is one.
    #[must_use]
    pub fn state_error(&self) -> Option<StateError> {
        match self {
            Self::State(e) => Some(*e),
            _ => None,
        }
    }

    pub(crate) fn parameter(message: impl Into<String>) -> Self {
        Self::Parameter(message.into())
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout(waited) => Self::PoolTimeout(waited),
            PoolError::PoolClosed => Self::PoolClosed,
            PoolError::Config(message) => Self::Configuration(message),
            PoolError::Connect(source) => match source.downcast::<Error>() {
                Ok(err) => *err,
                Err(source) => match source.downcast::<ProtocolError>() {
                    Ok(err) => Self::Protocol(*err),
                    Err(source) => Self::Protocol(ProtocolError::new(
                        fb_protocol::error::codes::NETWORK_ERROR,
                        source.to_string(),
                    )),
                },
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use fb_protocol::error::codes;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            Error::Configuration("x".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            Error::State(StateError::ReaderOpen).kind(),
            ErrorKind::State
        );
        assert_eq!(
            Error::InvalidIdentifier("1x".into()).kind(),
            ErrorKind::Parameter
        );
        assert_eq!(Error::Unsupported("cancel").kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_pool_errors_convert() {
        let err: Error = PoolError::Timeout(Duration::from_secs(3)).into();
        assert_eq!(err.kind(), ErrorKind::PoolTimeout);
        assert!(err.is_transient());

        let inner = Error::Protocol(ProtocolError::new(codes::NETWORK_ERROR, "refused"));
        let err: Error = PoolError::Connect(Box::new(inner)).into();
        assert_eq!(err.protocol_error().unwrap().code, codes::NETWORK_ERROR);
    }

    #[test]
    fn test_protocol_error_keeps_messages() {
        let err = Error::from(ProtocolError::with_messages(
            codes::DSQL_ERROR,
            vec!["Dynamic SQL Error".into(), "Token unknown".into()],
        ));
        assert!(!err.is_transient());
        assert_eq!(err.protocol_error().unwrap().messages.len(), 2);
        assert!(err.to_string().contains("Token unknown"));
    }
}
