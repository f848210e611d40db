//! Declared column types for result tables.
//!
//! Field schemas arrive as `(FIELD_NAME, FIELD_TYPE)` pairs where the type is
//! free text (`integer`, `varchar(255)`, `bigint`, `float`, ...). This module
//! parses that text into a closed set of types that every dialect knows how
//! to emit, so that merge casts and `CREATE TABLE` statements agree.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// SQL-level data type of a result column.
///
/// # Examples
///
/// ```ignore
/// use achilles::sql::types::DataType;
///
/// assert_eq!(DataType::parse("bigint"), Some(DataType::Int64));
/// assert_eq!(DataType::parse("varchar(255)"), Some(DataType::Varchar(255)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 32-bit signed integer (INT/INTEGER).
    Int32,

    /// 64-bit signed integer (BIGINT).
    Int64,

    /// 64-bit floating point (FLOAT/DOUBLE PRECISION).
    Float64,

    /// Fixed-precision decimal with precision and scale.
    Decimal(u8, u8),

    /// Variable-length character string with maximum length.
    Varchar(u16),

    /// Unbounded string.
    Text,

    /// Date without time.
    Date,

    /// Timestamp without timezone.
    Timestamp,
}

impl DataType {
    /// Parse a declared field type.
    ///
    /// Accepts the spellings used across the supported engines:
    /// - `int`, `integer`, `int4`, `int32`
    /// - `bigint`, `int8`, `int64`
    /// - `float`, `double`, `double precision`, `float8`, `real`
    /// - `decimal(p,s)`, `numeric(p,s)`
    /// - `varchar(n)`, `nvarchar(n)`, `character varying(n)`
    /// - `text`, `string`, `varchar`
    /// - `date`, `timestamp`, `datetime`, `datetime2`
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();

        if let Some(inner) = extract_parens(&s, "decimal").or_else(|| extract_parens(&s, "numeric"))
        {
            return parse_decimal_params(&inner);
        }

        if let Some(inner) = extract_parens(&s, "varchar")
            .or_else(|| extract_parens(&s, "nvarchar"))
            .or_else(|| extract_parens(&s, "character varying"))
        {
            let inner = inner.trim();
            if inner.eq_ignore_ascii_case("max") {
                return Some(DataType::Text);
            }
            return inner.parse().ok().map(DataType::Varchar);
        }

        match s.as_str() {
            "int" | "integer" | "int4" | "int32" => Some(DataType::Int32),
            "bigint" | "int8" | "int64" => Some(DataType::Int64),
            "float" | "double" | "double precision" | "float8" | "float64" | "real" => {
                Some(DataType::Float64)
            }
            "decimal" | "numeric" => Some(DataType::Decimal(18, 2)),
            "text" | "string" | "varchar" | "nvarchar" | "clob" => Some(DataType::Text),
            "date" => Some(DataType::Date),
            "timestamp" | "datetime" | "datetime2" => Some(DataType::Timestamp),
            _ => None,
        }
    }

    /// Returns true if this is an integer type.
    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }

    /// Returns true if this is a numeric type.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int32 | DataType::Int64 | DataType::Float64 | DataType::Decimal(_, _)
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Int32 => write!(f, "INTEGER"),
            DataType::Int64 => write!(f, "BIGINT"),
            DataType::Float64 => write!(f, "FLOAT"),
            DataType::Decimal(p, s) => write!(f, "DECIMAL({}, {})", p, s),
            DataType::Varchar(n) => write!(f, "VARCHAR({})", n),
            DataType::Text => write!(f, "TEXT"),
            DataType::Date => write!(f, "DATE"),
            DataType::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}

impl Serialize for DataType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string().to_lowercase())
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DataType::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown field type '{}'", raw)))
    }
}

/// Extract content inside parentheses for a given type prefix.
/// e.g., extract_parens("decimal(10,2)", "decimal") returns Some("10,2")
fn extract_parens(s: &str, prefix: &str) -> Option<String> {
    let rest = s.strip_prefix(prefix)?.trim();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    Some(inner.to_string())
}

/// Parse decimal parameters "precision,scale".
fn parse_decimal_params(inner: &str) -> Option<DataType> {
    let (precision, scale) = inner.split_once(',')?;
    Some(DataType::Decimal(
        precision.trim().parse().ok()?,
        scale.trim().parse().ok()?,
    ))
}
