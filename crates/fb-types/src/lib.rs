//! # fb-types
//!
//! Host-side value model for the Firebird driver.
//!
//! - [`SqlValue`]: a dynamically typed value exchanged with statements
//! - [`DbType`]: the logical type a parameter is declared with
//! - [`ToSql`] / [`FromSql`]: conversions between Rust types and [`SqlValue`]

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod db_type;
pub mod error;
pub mod from_sql;
pub mod to_sql;
pub mod value;

pub use db_type::DbType;
pub use error::TypeError;
pub use from_sql::FromSql;
pub use to_sql::ToSql;
pub use value::SqlValue;
