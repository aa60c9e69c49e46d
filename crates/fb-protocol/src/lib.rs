//! # fb-protocol
//!
//! The boundary between the Firebird client layer and the byte-level wire
//! protocol.
//!
//! This crate does not speak the protocol itself. It defines the capability
//! contract the client consumes ([`WireConnector`] / [`WireDatabase`]), the
//! opaque handles that cross it, and the small protocol vocabularies the
//! client needs to build requests:
//!
//! - Transaction parameter buffers ([`TransactionFlags`], [`Tpb`])
//! - SQL type codes and statement types ([`sqltype`])
//! - Parameter descriptors ([`ParamDescriptor`], [`ParamSlot`], [`WireValue`])
//! - Character sets ([`Charset`])
//!
//! All wire failures surface as a single [`ProtocolError`] carrying the
//! server's numeric code and message list.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod charset;
pub mod descriptor;
pub mod error;
pub mod sqltype;
pub mod tpb;
pub mod wire;

pub use charset::Charset;
pub use descriptor::{ParamDescriptor, ParamSlot, WireValue};
pub use error::ProtocolError;
pub use sqltype::{SqlType, StatementType};
pub use tpb::{Tpb, TransactionFlags};
pub use wire::{
    AttachParams, BlobId, ColumnInfo, ExecuteOutcome, PreparedInfo, StatementHandle,
    TransactionHandle, WireConnector, WireDatabase,
};
