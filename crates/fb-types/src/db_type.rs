//! Logical parameter types.

use crate::value::SqlValue;

/// The logical type a parameter is declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DbType {
    /// ARRAY.
    Array,
    /// BIGINT.
    BigInt,
    /// BLOB SUB_TYPE 0.
    Binary,
    /// Boolean, stored as SMALLINT.
    Boolean,
    /// CHAR(n).
    Char,
    /// DATE.
    Date,
    /// DECIMAL(p, s).
    Decimal,
    /// DOUBLE PRECISION.
    Double,
    /// FLOAT.
    Float,
    /// CHAR(16) CHARACTER SET OCTETS.
    Guid,
    /// INTEGER.
    #[default]
    Integer,
    /// NUMERIC(p, s).
    Numeric,
    /// SMALLINT.
    SmallInt,
    /// BLOB SUB_TYPE 1.
    Text,
    /// TIME.
    Time,
    /// TIMESTAMP.
    TimeStamp,
    /// VARCHAR(n).
    VarChar,
}

impl DbType {
    /// Whether the wire length of this type cannot be inferred client-side.
    ///
    /// Descriptors containing such parameters must be described by the
    /// server instead.
    #[must_use]
    pub const fn is_indeterminate(self) -> bool {
        matches!(self, Self::Array | Self::Decimal | Self::Numeric)
    }

    /// Whether values of this type are stored as large objects.
    #[must_use]
    pub const fn is_blob(self) -> bool {
        matches!(self, Self::Binary | Self::Text)
    }

    /// Infer a declaration type from a value.
    #[must_use]
    pub fn infer(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null | SqlValue::String(_) => Self::VarChar,
            SqlValue::Bool(_) => Self::Boolean,
            SqlValue::SmallInt(_) => Self::SmallInt,
            SqlValue::Int(_) => Self::Integer,
            SqlValue::BigInt(_) => Self::BigInt,
            SqlValue::Float(_) => Self::Float,
            SqlValue::Double(_) => Self::Double,
            SqlValue::Decimal(_) => Self::Decimal,
            SqlValue::Binary(_) => Self::Binary,
            SqlValue::Guid(_) => Self::Guid,
            SqlValue::Date(_) => Self::Date,
            SqlValue::Time(_) => Self::Time,
            SqlValue::Timestamp(_) => Self::TimeStamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indeterminate_types() {
        assert!(DbType::Array.is_indeterminate());
        assert!(DbType::Decimal.is_indeterminate());
        assert!(DbType::Numeric.is_indeterminate());
        assert!(!DbType::VarChar.is_indeterminate());
        assert!(!DbType::BigInt.is_indeterminate());
    }

    #[test]
    fn test_infer() {
        assert_eq!(DbType::infer(&SqlValue::Int(1)), DbType::Integer);
        assert_eq!(DbType::infer(&SqlValue::String("a".into())), DbType::VarChar);
        assert_eq!(DbType::infer(&SqlValue::Null), DbType::VarChar);
    }
}
