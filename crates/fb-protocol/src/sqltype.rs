//! SQL type codes and statement types.

/// BLOB sub-type for untyped binary data.
pub const BLOB_SUB_TYPE_BINARY: i16 = 0;
/// BLOB sub-type for text.
pub const BLOB_SUB_TYPE_TEXT: i16 = 1;

/// Wire-level SQL type of a descriptor slot.
///
/// Each type has an even code. The odd code (`code | 1`) is the nullable
/// variant of the same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    /// Fixed-length character data.
    Text,
    /// Variable-length character data.
    Varying,
    /// 16-bit integer.
    Short,
    /// 32-bit integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// VAX double (legacy).
    DFloat,
    /// Date and time.
    Timestamp,
    /// BLOB reference.
    Blob,
    /// Array reference.
    Array,
    /// 64-bit quad reference.
    Quad,
    /// Time of day.
    Time,
    /// Calendar date.
    Date,
    /// 64-bit integer (also scaled NUMERIC/DECIMAL).
    Int64,
}

impl SqlType {
    /// The even (non-nullable) type code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Varying => 448,
            Self::Text => 452,
            Self::Double => 480,
            Self::Float => 482,
            Self::Long => 496,
            Self::Short => 500,
            Self::Timestamp => 510,
            Self::Blob => 520,
            Self::DFloat => 530,
            Self::Array => 540,
            Self::Quad => 550,
            Self::Time => 560,
            Self::Date => 570,
            Self::Int64 => 580,
        }
    }

    /// The nullable variant of the type code.
    #[must_use]
    pub const fn nullable_code(self) -> u16 {
        self.code() | 1
    }

    /// Decode a type code; the nullable bit is ignored.
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code & !1 {
            448 => Self::Varying,
            452 => Self::Text,
            480 => Self::Double,
            482 => Self::Float,
            496 => Self::Long,
            500 => Self::Short,
            510 => Self::Timestamp,
            520 => Self::Blob,
            530 => Self::DFloat,
            540 => Self::Array,
            550 => Self::Quad,
            560 => Self::Time,
            570 => Self::Date,
            580 => Self::Int64,
            _ => return None,
        })
    }

    /// SQL name of the type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Text => "CHAR",
            Self::Varying => "VARCHAR",
            Self::Short => "SMALLINT",
            Self::Long => "INTEGER",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE PRECISION",
            Self::DFloat => "D_FLOAT",
            Self::Timestamp => "TIMESTAMP",
            Self::Blob => "BLOB",
            Self::Array => "ARRAY",
            Self::Quad => "QUAD",
            Self::Time => "TIME",
            Self::Date => "DATE",
            Self::Int64 => "BIGINT",
        }
    }

    /// Whether values of this type are exchanged as character data.
    #[must_use]
    pub const fn is_character(self) -> bool {
        matches!(self, Self::Text | Self::Varying)
    }
}

/// Kind of a prepared statement as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementType {
    /// SELECT.
    Select,
    /// INSERT.
    Insert,
    /// UPDATE.
    Update,
    /// DELETE.
    Delete,
    /// Data definition.
    Ddl,
    /// BLOB segment read.
    GetSegment,
    /// BLOB segment write.
    PutSegment,
    /// EXECUTE PROCEDURE.
    ExecProcedure,
    /// SET TRANSACTION.
    StartTransaction,
    /// COMMIT.
    Commit,
    /// ROLLBACK.
    Rollback,
    /// SELECT ... FOR UPDATE.
    SelectForUpdate,
    /// SET GENERATOR.
    SetGenerator,
    /// SAVEPOINT / RELEASE SAVEPOINT.
    SavePoint,
}

impl StatementType {
    /// Decode the server's statement-type info value.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Select,
            2 => Self::Insert,
            3 => Self::Update,
            4 => Self::Delete,
            5 => Self::Ddl,
            6 => Self::GetSegment,
            7 => Self::PutSegment,
            8 => Self::ExecProcedure,
            9 => Self::StartTransaction,
            10 => Self::Commit,
            11 => Self::Rollback,
            12 => Self::SelectForUpdate,
            13 => Self::SetGenerator,
            14 => Self::SavePoint,
            _ => return None,
        })
    }

    /// Whether executing the statement opens a cursor.
    #[must_use]
    pub const fn returns_rows(self) -> bool {
        matches!(self, Self::Select | Self::SelectForUpdate)
    }
}
