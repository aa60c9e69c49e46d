//! Type conversion errors.

use thiserror::Error;

/// Errors that can occur converting between Rust and SQL values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// The value has a different type than requested.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Requested type.
        expected: &'static str,
        /// What the value actually was.
        actual: String,
    },

    /// The value was NULL where a non-null value was required.
    #[error("unexpected NULL value")]
    UnexpectedNull,

    /// The value does not fit the requested type.
    #[error("value out of range for {target}")]
    OutOfRange {
        /// Requested type.
        target: &'static str,
    },
}
