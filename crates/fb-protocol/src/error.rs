//! Protocol-level error type.

use thiserror::Error;

/// Well-known server status codes.
pub mod codes {
    /// Invalid database handle (no active connection).
    pub const BAD_DB_HANDLE: i32 = 335_544_324;
    /// Invalid transaction handle.
    pub const BAD_TRANS_HANDLE: i32 = 335_544_332;
    /// Deadlock.
    pub const DEADLOCK: i32 = 335_544_336;
    /// Lock conflict on no wait transaction.
    pub const LOCK_CONFLICT: i32 = 335_544_345;
    /// Dynamic SQL error.
    pub const DSQL_ERROR: i32 = 335_544_569;
    /// Unable to complete network request to host.
    pub const NETWORK_ERROR: i32 = 335_544_721;
    /// Error reading data from the connection.
    pub const NET_READ_ERROR: i32 = 335_544_726;
    /// Error writing data to the connection.
    pub const NET_WRITE_ERROR: i32 = 335_544_727;
    /// Connection lost to database.
    pub const CONNECTION_LOST: i32 = 335_544_741;
}

/// A failure reported by the wire layer.
///
/// The server reports a primary status code plus an ordered list of
/// messages (the status vector). Both are preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("wire error {code}: {text}", text = .messages.join("; "))]
pub struct ProtocolError {
    /// Primary status code.
    pub code: i32,
    /// Messages in the order the server reported them.
    pub messages: Vec<String>,
}

impl ProtocolError {
    /// Create an error with a single message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            messages: vec![message.into()],
        }
    }

    /// Create an error from a full message list.
    pub fn with_messages(code: i32, messages: Vec<String>) -> Self {
        Self { code, messages }
    }

    /// Whether the error means the underlying link is gone.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self.code,
            codes::NETWORK_ERROR
                | codes::NET_READ_ERROR
                | codes::NET_WRITE_ERROR
                | codes::CONNECTION_LOST
                | codes::BAD_DB_HANDLE
        )
    }

    /// Whether retrying the same work may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.is_connection_lost() || matches!(self.code, codes::DEADLOCK | codes::LOCK_CONFLICT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_joins_messages() {
        let err = ProtocolError::with_messages(
            codes::DSQL_ERROR,
            vec!["Dynamic SQL Error".into(), "Token unknown".into()],
        );
        assert_eq!(
            err.to_string(),
            "wire error 335544569: Dynamic SQL Error; Token unknown"
        );
    }

    #[test]
    fn test_classification() {
        assert!(ProtocolError::new(codes::CONNECTION_LOST, "lost").is_connection_lost());
        assert!(ProtocolError::new(codes::DEADLOCK, "deadlock").is_transient());
        assert!(!ProtocolError::new(codes::DSQL_ERROR, "syntax").is_transient());
    }
}
