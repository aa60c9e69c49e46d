//! # fb-client
//!
//! Async Firebird client: connection options, pooled sessions, transactions
//! and prepared statements.
//!
//! The client does not speak the wire protocol itself. It drives a
//! [`fb_protocol::WireConnector`] supplied by the caller, so the same code
//! runs against a network implementation or an in-memory double.
//!
//! ## Features
//!
//! - **Connection strings**: synonym-tolerant keys, validation up front
//! - **Pooling**: one pool per normalized connection string, bounded size,
//!   idle-lifetime eviction
//! - **Transactions**: explicit transactions with savepoints, or implicit
//!   ones that end with each call
//! - **Statements**: lazy preparation, `@name` placeholders, stored
//!   procedure calls, output parameters
//!
//! ## Example
//!
//! ```rust,ignore
//! use fb_client::Driver;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fb_client::Error> {
//!     let driver = Driver::new(connector);
//!     let mut conn = driver
//!         .open("DataSource=localhost;Database=/data/shop.fdb;User=SYSDBA;Password=masterkey")
//!         .await?;
//!
//!     let tx = conn.begin_transaction().await?;
//!     let mut stmt = conn.create_statement("UPDATE stock SET qty = qty - 1 WHERE id = @id")?;
//!     stmt.set_transaction(Some(&tx))?;
//!     stmt.parameters_mut().add_with_value("@id", 17);
//!     stmt.execute_non_query().await?;
//!     tx.commit().await?;
//!
//!     conn.close().await
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
mod convert;
pub mod driver;
pub mod error;
pub mod parameter;
pub mod reader;
pub mod row;
pub mod session;
pub mod sql;
pub mod statement;
pub mod transaction;

// Re-export commonly used types
pub use config::{ConnectionOptions, DEFAULT_PORT, ServerType};
pub use connection::PhysicalConnection;
pub use driver::Driver;
pub use error::{Error, ErrorKind, Result, StateError};
pub use fb_pool::{PoolMetrics, PoolStatus};
pub use fb_types::{DbType, FromSql, SqlValue, ToSql};
pub use parameter::{Parameter, ParameterCollection, ParameterDirection};
pub use reader::DataReader;
pub use row::{Column, Row};
pub use session::Connection;
pub use statement::{CommandType, Statement, StatementState};
pub use transaction::{IsolationLevel, SavePoint, Transaction, TransactionOptions};
