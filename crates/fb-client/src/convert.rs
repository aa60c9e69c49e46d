//! Conversion between host values and wire slots.

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use fb_protocol::sqltype::{BLOB_SUB_TYPE_BINARY, BLOB_SUB_TYPE_TEXT};
use fb_protocol::{Charset, ColumnInfo, ParamSlot, SqlType, WireValue};
use fb_types::{DbType, FromSql, SqlValue, TypeError};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{Error, Result};
use crate::parameter::Parameter;

/// Build a slot from declared parameter metadata.
///
/// Returns `None` when the type cannot be resolved locally, in which case
/// the server must describe the parameters.
pub(crate) fn client_slot(param: &Parameter, connection_charset: Charset) -> Option<ParamSlot> {
    let db_type = param.db_type();
    let charset = param.charset().unwrap_or(if db_type == DbType::Guid {
        Charset::OCTETS
    } else {
        connection_charset
    });
    let chars = param.size().saturating_mul(u32::from(charset.bytes_per_char()));

    let (sql_type, sub_type, length) = match db_type {
        DbType::BigInt => (SqlType::Int64, 0, 8),
        DbType::Binary => (SqlType::Blob, BLOB_SUB_TYPE_BINARY, 8),
        DbType::Text => (SqlType::Blob, BLOB_SUB_TYPE_TEXT, 8),
        DbType::Boolean | DbType::SmallInt => (SqlType::Short, 0, 2),
        DbType::Char => (SqlType::Text, 0, chars),
        DbType::VarChar => (SqlType::Varying, 0, chars),
        DbType::Date => (SqlType::Date, 0, 4),
        DbType::Time => (SqlType::Time, 0, 4),
        DbType::TimeStamp => (SqlType::Timestamp, 0, 8),
        DbType::Double => (SqlType::Double, 0, 8),
        DbType::Float => (SqlType::Float, 0, 4),
        DbType::Guid => (SqlType::Text, 0, 16),
        DbType::Integer => (SqlType::Long, 0, 4),
        DbType::Array | DbType::Decimal | DbType::Numeric => return None,
    };

    let length = u16::try_from(length).ok().filter(|&l| l > 0)?;
    Some(ParamSlot::new(sql_type, sub_type, length, charset))
}

fn mismatch(expected: &'static str, value: &SqlValue) -> Error {
    match value {
        SqlValue::Null => TypeError::UnexpectedNull.into(),
        other => TypeError::TypeMismatch {
            expected,
            actual: other.type_name().to_string(),
        }
        .into(),
    }
}

fn to_decimal(value: &SqlValue) -> Result<Decimal> {
    match value {
        SqlValue::Float(v) => {
            Decimal::try_from(*v).map_err(|_| TypeError::OutOfRange { target: "DECIMAL" }.into())
        }
        SqlValue::Double(v) => {
            Decimal::try_from(*v).map_err(|_| TypeError::OutOfRange { target: "DECIMAL" }.into())
        }
        SqlValue::String(s) => s.trim().parse().map_err(|_| mismatch("DECIMAL", value)),
        other => Ok(Decimal::from_sql(other)?),
    }
}

/// Integer representation of `value` in a slot with the given scale.
fn scaled_integer(value: &SqlValue, scale: i16, target: &'static str) -> Result<i64> {
    let mut decimal = to_decimal(value)?;
    if scale < 0 {
        let factor = 10i64
            .checked_pow(u32::from(scale.unsigned_abs()))
            .ok_or(TypeError::OutOfRange { target })?;
        decimal = decimal
            .checked_mul(Decimal::from(factor))
            .ok_or(TypeError::OutOfRange { target })?;
    }
    let rounded = decimal.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    i64::try_from(rounded).map_err(|_| TypeError::OutOfRange { target }.into())
}

fn to_f64(value: &SqlValue) -> Result<f64> {
    match value {
        SqlValue::String(s) => s.trim().parse().map_err(|_| mismatch("DOUBLE PRECISION", value)),
        other => Ok(f64::from_sql(other)?),
    }
}

/// Bytes of `value` for a character or octet slot.
fn encode_text(value: &SqlValue, charset: Charset) -> Result<Bytes> {
    match value {
        SqlValue::Binary(bytes) => Ok(bytes.clone()),
        SqlValue::Guid(guid) if charset == Charset::OCTETS => {
            Ok(Bytes::copy_from_slice(guid.as_bytes()))
        }
        other => {
            let text = String::from_sql(other)?;
            charset.encode(&text).map(Bytes::from).ok_or_else(|| {
                Error::parameter(format!(
                    "value cannot be represented in character set {}",
                    charset.name()
                ))
            })
        }
    }
}

/// Content of a large-object parameter.
pub(crate) fn blob_bytes(value: &SqlValue, slot: &ParamSlot) -> Result<Bytes> {
    if slot.sub_type == BLOB_SUB_TYPE_TEXT {
        encode_text(value, slot.charset)
    } else {
        Ok(Bytes::from_sql(value)?)
    }
}

fn parse_date(value: &SqlValue) -> Result<NaiveDate> {
    match value {
        SqlValue::String(s) => {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| mismatch("DATE", value))
        }
        other => Ok(NaiveDate::from_sql(other)?),
    }
}

fn parse_time(value: &SqlValue) -> Result<NaiveTime> {
    match value {
        SqlValue::String(s) => {
            NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").map_err(|_| mismatch("TIME", value))
        }
        other => Ok(NaiveTime::from_sql(other)?),
    }
}

fn parse_timestamp(value: &SqlValue) -> Result<NaiveDateTime> {
    match value {
        SqlValue::String(s) => NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f")
            .map_err(|_| mismatch("TIMESTAMP", value)),
        other => Ok(NaiveDateTime::from_sql(other)?),
    }
}

/// Convert a non-null, non-blob value for `slot`.
pub(crate) fn to_wire(value: &SqlValue, slot: &ParamSlot) -> Result<WireValue> {
    let Some(sql_type) = slot.sql_type() else {
        return Err(Error::parameter(format!(
            "unknown parameter type code {}",
            slot.sql_type
        )));
    };

    Ok(match sql_type {
        SqlType::Text | SqlType::Varying => {
            let bytes = encode_text(value, slot.charset)?;
            if slot.length > 0 && bytes.len() > usize::from(slot.length) {
                return Err(Error::parameter(format!(
                    "value of {} bytes exceeds the parameter length of {}",
                    bytes.len(),
                    slot.length
                )));
            }
            WireValue::Text(bytes)
        }
        SqlType::Short => {
            let v = scaled_integer(value, slot.scale, "SMALLINT")?;
            WireValue::Short(
                i16::try_from(v).map_err(|_| TypeError::OutOfRange { target: "SMALLINT" })?,
            )
        }
        SqlType::Long => {
            let v = scaled_integer(value, slot.scale, "INTEGER")?;
            WireValue::Long(
                i32::try_from(v).map_err(|_| TypeError::OutOfRange { target: "INTEGER" })?,
            )
        }
        SqlType::Int64 => WireValue::Int64(scaled_integer(value, slot.scale, "BIGINT")?),
        SqlType::Float => WireValue::Float(to_f64(value)? as f32),
        SqlType::Double | SqlType::DFloat => WireValue::Double(to_f64(value)?),
        SqlType::Date => WireValue::Date(parse_date(value)?),
        SqlType::Time => WireValue::Time(parse_time(value)?),
        SqlType::Timestamp => WireValue::Timestamp(parse_timestamp(value)?),
        SqlType::Blob => {
            return Err(Error::parameter(
                "large object values must be staged before execution",
            ));
        }
        SqlType::Array | SqlType::Quad => {
            return Err(Error::parameter("array parameters are not supported"));
        }
    })
}

fn scaled(raw: i64, scale: i16) -> Option<SqlValue> {
    (scale < 0).then(|| {
        Decimal::try_new(raw, u32::from(scale.unsigned_abs()))
            .map_or(SqlValue::BigInt(raw), SqlValue::Decimal)
    })
}

/// Convert a fetched value to a host value.
///
/// Large-object references must be resolved with [`blob_value`] first;
/// an unresolved reference decodes as NULL.
pub(crate) fn from_wire(value: WireValue, column: &ColumnInfo) -> SqlValue {
    match value {
        WireValue::Null | WireValue::Blob(_) => SqlValue::Null,
        WireValue::Short(v) => {
            scaled(i64::from(v), column.scale).unwrap_or(SqlValue::SmallInt(v))
        }
        WireValue::Long(v) => scaled(i64::from(v), column.scale).unwrap_or(SqlValue::Int(v)),
        WireValue::Int64(v) => scaled(v, column.scale).unwrap_or(SqlValue::BigInt(v)),
        WireValue::Float(v) => SqlValue::Float(v),
        WireValue::Double(v) => SqlValue::Double(v),
        WireValue::Text(bytes) if column.charset == Charset::OCTETS => SqlValue::Binary(bytes),
        WireValue::Text(bytes) => {
            let text = column.charset.decode(&bytes);
            if column.sql_type == SqlType::Text {
                SqlValue::String(text.trim_end_matches(' ').to_owned())
            } else {
                SqlValue::String(text)
            }
        }
        WireValue::Date(d) => SqlValue::Date(d),
        WireValue::Time(t) => SqlValue::Time(t),
        WireValue::Timestamp(ts) => SqlValue::Timestamp(ts),
    }
}

/// Host value of a large object read in full.
pub(crate) fn blob_value(data: Bytes, column: &ColumnInfo) -> SqlValue {
    if column.sub_type == BLOB_SUB_TYPE_TEXT {
        SqlValue::String(column.charset.decode(&data))
    } else {
        SqlValue::Binary(data)
    }
}
