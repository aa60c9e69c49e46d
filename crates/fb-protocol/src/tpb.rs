//! Transaction parameter buffers.
//!
//! A TPB is the flag bundle sent with a start-transaction request. It
//! describes the isolation mode, access mode and lock resolution of the new
//! transaction.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

/// TPB version tag that prefixes every buffer.
pub const TPB_VERSION3: u8 = 3;

bitflags! {
    /// Transaction options carried in a TPB.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TransactionFlags: u16 {
        /// Table-stability isolation (serializable).
        const CONSISTENCY = 1 << 0;
        /// Snapshot isolation (repeatable read).
        const CONCURRENCY = 1 << 1;
        /// Shared table reservation.
        const SHARED = 1 << 2;
        /// Protected table reservation.
        const PROTECTED = 1 << 3;
        /// Exclusive table reservation.
        const EXCLUSIVE = 1 << 4;
        /// Wait on lock conflicts.
        const WAIT = 1 << 5;
        /// Fail immediately on lock conflicts.
        const NO_WAIT = 1 << 6;
        /// Read-only access.
        const READ = 1 << 7;
        /// Read-write access.
        const WRITE = 1 << 8;
        /// Read-committed isolation.
        const READ_COMMITTED = 1 << 9;
        /// Read the latest committed record version.
        const REC_VERSION = 1 << 10;
        /// Wait for uncommitted record versions to resolve.
        const NO_REC_VERSION = 1 << 11;
    }
}

impl TransactionFlags {
    /// Wire tag for each flag, in encoding order.
    const TAGS: [(TransactionFlags, u8); 12] = [
        (Self::CONSISTENCY, 1),
        (Self::CONCURRENCY, 2),
        (Self::SHARED, 3),
        (Self::PROTECTED, 4),
        (Self::EXCLUSIVE, 5),
        (Self::WAIT, 6),
        (Self::NO_WAIT, 7),
        (Self::READ, 8),
        (Self::WRITE, 9),
        (Self::READ_COMMITTED, 15),
        (Self::REC_VERSION, 17),
        (Self::NO_REC_VERSION, 18),
    ];
}

/// An encoded-on-demand transaction parameter buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tpb {
    flags: TransactionFlags,
}

impl Tpb {
    /// Create a TPB from a flag set.
    #[must_use]
    pub fn new(flags: TransactionFlags) -> Self {
        Self { flags }
    }

    /// The flags in this buffer.
    #[must_use]
    pub fn flags(&self) -> TransactionFlags {
        self.flags
    }

    /// Encode to the byte form sent on the wire.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + TransactionFlags::TAGS.len());
        buf.put_u8(TPB_VERSION3);
        for (flag, tag) in TransactionFlags::TAGS {
            if self.flags.contains(flag) {
                buf.put_u8(tag);
            }
        }
        buf.freeze()
    }
}

impl From<TransactionFlags> for Tpb {
    fn from(flags: TransactionFlags) -> Self {
        Self::new(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_read_committed() {
        let tpb = Tpb::new(
            TransactionFlags::READ_COMMITTED
                | TransactionFlags::NO_REC_VERSION
                | TransactionFlags::WRITE
                | TransactionFlags::WAIT,
        );
        assert_eq!(&tpb.encode()[..], &[3, 6, 9, 15, 18]);
    }

    #[test]
    fn test_encode_empty() {
        let tpb = Tpb::new(TransactionFlags::empty());
        assert_eq!(&tpb.encode()[..], &[TPB_VERSION3]);
    }
}
