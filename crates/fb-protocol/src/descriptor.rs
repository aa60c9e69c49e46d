//! Parameter descriptors.
//!
//! A descriptor is the ordered list of typed slots the server expects for a
//! prepared statement's input parameters. The client either builds it from
//! declared parameter metadata or asks the server to describe it, then fills
//! each slot with a null flag and a value before executing.

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::charset::Charset;
use crate::sqltype::SqlType;
use crate::wire::BlobId;

/// A value in wire representation.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// SQL NULL.
    Null,
    /// SMALLINT (scaled when `scale < 0`).
    Short(i16),
    /// INTEGER (scaled when `scale < 0`).
    Long(i32),
    /// BIGINT (scaled when `scale < 0`).
    Int64(i64),
    /// FLOAT.
    Float(f32),
    /// DOUBLE PRECISION.
    Double(f64),
    /// Character or octet data, already encoded in the slot's charset.
    Text(Bytes),
    /// DATE.
    Date(NaiveDate),
    /// TIME.
    Time(NaiveTime),
    /// TIMESTAMP.
    Timestamp(NaiveDateTime),
    /// Reference to a server-side large object.
    Blob(BlobId),
}

impl WireValue {
    /// Whether this is SQL NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// One typed parameter slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSlot {
    /// Type code; odd codes are the nullable variant.
    pub sql_type: u16,
    /// Sub-type (BLOB sub-type, or NUMERIC/DECIMAL marker).
    pub sub_type: i16,
    /// Decimal scale (zero or negative).
    pub scale: i16,
    /// Byte length of the slot.
    pub length: u16,
    /// Character set of character slots.
    pub charset: Charset,
    /// Null indicator.
    pub null: bool,
    /// Bound value.
    pub value: WireValue,
}

impl ParamSlot {
    /// Create an unbound slot.
    #[must_use]
    pub fn new(sql_type: SqlType, sub_type: i16, length: u16, charset: Charset) -> Self {
        Self {
            sql_type: sql_type.code(),
            sub_type,
            scale: 0,
            length,
            charset,
            null: false,
            value: WireValue::Null,
        }
    }

    /// Set the decimal scale.
    #[must_use]
    pub fn with_scale(mut self, scale: i16) -> Self {
        self.scale = scale;
        self
    }

    /// The decoded SQL type, if the code is known.
    #[must_use]
    pub fn sql_type(&self) -> Option<SqlType> {
        SqlType::from_code(self.sql_type)
    }

    /// Whether the slot uses the nullable variant of its type.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.sql_type & 1 == 1
    }

    /// Switch the slot to the nullable variant of its type.
    pub fn set_nullable(&mut self) {
        self.sql_type |= 1;
    }

    /// Bind a null.
    pub fn set_null(&mut self) {
        self.null = true;
        self.value = WireValue::Null;
    }

    /// Bind a value.
    pub fn set_value(&mut self, value: WireValue) {
        self.null = value.is_null();
        self.value = value;
    }
}

/// The ordered input descriptor of a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamDescriptor {
    slots: Vec<ParamSlot>,
}

impl ParamDescriptor {
    /// An empty descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a descriptor from slots.
    #[must_use]
    pub fn from_slots(slots: Vec<ParamSlot>) -> Self {
        Self { slots }
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots in order.
    #[must_use]
    pub fn slots(&self) -> &[ParamSlot] {
        &self.slots
    }

    /// Mutable slots in order.
    pub fn slots_mut(&mut self) -> &mut [ParamSlot] {
        &mut self.slots
    }

    /// Slot at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ParamSlot> {
        self.slots.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nullable_variant() {
        let mut slot = ParamSlot::new(SqlType::Long, 0, 4, Charset::NONE);
        assert!(!slot.is_nullable());
        slot.set_nullable();
        assert!(slot.is_nullable());
        assert_eq!(slot.sql_type(), Some(SqlType::Long));
        assert_eq!(slot.sql_type, 497);
    }

    #[test]
    fn test_set_value_tracks_null_flag() {
        let mut slot = ParamSlot::new(SqlType::Long, 0, 4, Charset::NONE);
        slot.set_value(WireValue::Long(7));
        assert!(!slot.null);
        slot.set_null();
        assert!(slot.null);
        assert!(slot.value.is_null());
    }
}
