//! # fb-testing
//!
//! Test support for the Firebird driver.
//!
//! [`MockServer`] stands in for a real server behind the
//! [`fb_protocol::WireConnector`] contract. It records every wire call so
//! integration tests can check round trips, transaction boundaries and
//! handle lifetimes without a database.
//!
//! ```rust,ignore
//! use fb_testing::{MockServer, StatementScript, column};
//! use fb_protocol::{SqlType, WireValue};
//!
//! let server = MockServer::new();
//! server.script(
//!     "select id",
//!     StatementScript::select(vec![column("ID", SqlType::Long)], vec![vec![WireValue::Long(1)]]),
//! );
//! let driver = server.driver();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock;

pub use mock::{MockDatabase, MockServer, StatementScript, WireEvent, column, dsql_error};

/// A connection string for the mock server with pooling settings appended.
#[must_use]
pub fn connection_string(extra: &str) -> String {
    let base = "DataSource=mock.local;Database=/data/test.fdb;User=SYSDBA;Password=masterkey";
    if extra.is_empty() {
        base.to_owned()
    } else {
        format!("{base};{extra}")
    }
}
