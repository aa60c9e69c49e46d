//! Conversion of [`SqlValue`] into Rust values.

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::TypeError;
use crate::value::SqlValue;

/// Types that can be read from a SQL value.
pub trait FromSql: Sized {
    /// Convert from a non-null SQL value.
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError>;

    /// Convert from a possibly-null SQL value.
    fn from_sql_nullable(value: &SqlValue) -> Result<Option<Self>, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            Self::from_sql(value).map(Some)
        }
    }
}

fn mismatch(expected: &'static str, value: &SqlValue) -> TypeError {
    match value {
        SqlValue::Null => TypeError::UnexpectedNull,
        other => TypeError::TypeMismatch {
            expected,
            actual: other.type_name().to_string(),
        },
    }
}

macro_rules! impl_from_sql_int {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl FromSql for $ty {
                fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
                    let wide = value.as_i64().ok_or_else(|| mismatch($name, value))?;
                    <$ty>::try_from(wide).map_err(|_| TypeError::OutOfRange { target: $name })
                }
            }
        )*
    };
}

impl_from_sql_int! {
    i16 => "SMALLINT",
    i32 => "INTEGER",
    i64 => "BIGINT",
}

impl FromSql for bool {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Bool(v) => Ok(*v),
            other => other
                .as_i64()
                .map(|v| v != 0)
                .ok_or_else(|| mismatch("BOOLEAN", other)),
        }
    }
}

impl FromSql for f64 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Float(v) => Ok(f64::from(*v)),
            SqlValue::Double(v) => Ok(*v),
            SqlValue::Decimal(d) => {
                rust_decimal::prelude::ToPrimitive::to_f64(d)
                    .ok_or(TypeError::OutOfRange { target: "DOUBLE PRECISION" })
            }
            other => other
                .as_i64()
                .map(|v| v as f64)
                .ok_or_else(|| mismatch("DOUBLE PRECISION", other)),
        }
    }
}

impl FromSql for f32 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Float(v) => Ok(*v),
            other => f64::from_sql(other).map(|v| v as f32),
        }
    }
}

impl FromSql for Decimal {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Decimal(d) => Ok(*d),
            other => other
                .as_i64()
                .map(Decimal::from)
                .ok_or_else(|| mismatch("DECIMAL", other)),
        }
    }
}

impl FromSql for String {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::String(s) => Ok(s.clone()),
            SqlValue::Binary(b) => String::from_utf8(b.to_vec()).map_err(|_| TypeError::TypeMismatch {
                expected: "VARCHAR",
                actual: "non UTF-8 BLOB".to_string(),
            }),
            SqlValue::Null => Err(TypeError::UnexpectedNull),
            other => Ok(other.to_string()),
        }
    }
}

impl FromSql for Bytes {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Binary(b) => Ok(b.clone()),
            SqlValue::String(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            SqlValue::Guid(g) => Ok(Bytes::copy_from_slice(g.as_bytes())),
            other => Err(mismatch("BLOB", other)),
        }
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        Bytes::from_sql(value).map(|b| b.to_vec())
    }
}

impl FromSql for Uuid {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Guid(g) => Ok(*g),
            SqlValue::Binary(b) => Uuid::from_slice(b).map_err(|_| mismatch("GUID", value)),
            SqlValue::String(s) => Uuid::parse_str(s).map_err(|_| mismatch("GUID", value)),
            other => Err(mismatch("GUID", other)),
        }
    }
}

impl FromSql for NaiveDate {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Date(d) => Ok(*d),
            SqlValue::Timestamp(ts) => Ok(ts.date()),
            other => Err(mismatch("DATE", other)),
        }
    }
}

impl FromSql for NaiveTime {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Time(t) => Ok(*t),
            SqlValue::Timestamp(ts) => Ok(ts.time()),
            other => Err(mismatch("TIME", other)),
        }
    }
}

impl FromSql for NaiveDateTime {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Timestamp(ts) => Ok(*ts),
            SqlValue::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
            other => Err(mismatch("TIMESTAMP", other)),
        }
    }
}

impl FromSql for SqlValue {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        Ok(value.clone())
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        T::from_sql_nullable(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widening_and_narrowing() {
        assert_eq!(i64::from_sql(&SqlValue::SmallInt(7)).unwrap(), 7);
        assert_eq!(i16::from_sql(&SqlValue::BigInt(12)).unwrap(), 12);
        assert_eq!(
            i16::from_sql(&SqlValue::BigInt(i64::from(i16::MAX) + 1)),
            Err(TypeError::OutOfRange { target: "SMALLINT" })
        );
    }

    #[test]
    fn test_null_handling() {
        assert_eq!(i32::from_sql(&SqlValue::Null), Err(TypeError::UnexpectedNull));
        assert_eq!(Option::<i32>::from_sql(&SqlValue::Null).unwrap(), None);
        assert_eq!(Option::<i32>::from_sql(&SqlValue::Int(3)).unwrap(), Some(3));
    }

    #[test]
    fn test_mismatch_reports_actual_type() {
        let err = NaiveDate::from_sql(&SqlValue::Int(3)).unwrap_err();
        assert_eq!(
            err,
            TypeError::TypeMismatch {
                expected: "DATE",
                actual: "INTEGER".to_string()
            }
        );
    }

    #[test]
    fn test_decimal_to_integer() {
        let d = Decimal::new(1200, 2);
        assert_eq!(i32::from_sql(&SqlValue::Decimal(d)).unwrap(), 12);
        assert!(i32::from_sql(&SqlValue::Decimal(Decimal::new(1250, 2))).is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn narrowing_agrees_with_try_from(v in any::<i64>()) {
                let value = SqlValue::BigInt(v);
                prop_assert_eq!(i32::from_sql(&value).ok(), i32::try_from(v).ok());
                prop_assert_eq!(i16::from_sql(&value).ok(), i16::try_from(v).ok());
                prop_assert_eq!(i64::from_sql(&value).ok(), Some(v));
            }

            #[test]
            fn whole_decimals_convert_exactly(v in any::<i32>(), scale in 0u32..6) {
                let scaled = Decimal::from(v) * Decimal::from(10i64.pow(scale));
                let value = SqlValue::Decimal(scaled.round_dp(0));
                prop_assert_eq!(i64::from_sql(&value).ok(), i64::try_from(scaled).ok());
            }
        }
    }
}
