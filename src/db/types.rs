//! Native column type mappings.
//!
//! This module maps database-specific column values onto [`Value`], the only
//! shapes a calling script understands.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! Decoding happens when a row is fetched, not when the statement runs, so an
//! unrepresentable column only fails the fetch that reads it.

use crate::db::dialect::Brand;
use crate::error::{SqlError, SqlResult};
use crate::models::{ColumnMeta, Value};
use sqlx::mysql::{MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgTypeInfo, PgValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Temporal,
    Json,
    Uuid,
    Array,
    Binary,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, brand: Brand) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.ends_with("[]") {
        return TypeCategory::Array;
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if brand == Brand::Sqlite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // "interval" would otherwise match the integer check below
    if lower == "interval" {
        return TypeCategory::Unknown;
    }

    if lower.contains("date") || lower.contains("time") {
        return TypeCategory::Temporal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    // UUID (PostgreSQL)
    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" || lower == "enum" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

/// Column metadata for a row, in column order.
pub fn column_metadata<R: Row>(row: &R) -> Vec<ColumnMeta> {
    described_metadata(row.columns())
}

/// Column metadata from a statement description, used when a result has no
/// row to read it from.
pub fn described_metadata<C: Column>(columns: &[C]) -> Vec<ColumnMeta> {
    columns
        .iter()
        .map(|col| ColumnMeta::new(col.name(), col.type_info().name()))
        .collect()
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation until it is converted.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl RawDecimal {
    fn into_value(self) -> Value {
        match self.0.parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::String(self.0),
        }
    }
}

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Shared conversions
// =============================================================================

fn number_i64(v: i64) -> Value {
    Value::Number(v as f64)
}

/// JSON documents are handed to scripts as their text; a bare JSON string is
/// handed over unquoted.
fn json_text(v: serde_json::Value) -> Value {
    match v {
        serde_json::Value::String(s) => Value::String(s),
        other => Value::String(other.to_string()),
    }
}

fn list<T, F: Fn(T) -> Value>(items: Vec<T>, f: F) -> Value {
    Value::List(items.into_iter().map(f).collect())
}

/// Try each Rust type in order; return the first successful decode.
macro_rules! try_decode {
    ($row:expr, $idx:expr, $($ty:ty => $map:expr),+ $(,)?) => {
        $(
            if let Ok(v) = $row.try_get::<$ty, _>($idx) {
                return Ok(($map)(v));
            }
        )+
    };
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

pub mod mysql {
    use super::*;
    use sqlx::mysql::MySqlRow;

    pub fn decode_row(row: &MySqlRow, columns: &[ColumnMeta]) -> SqlResult<Vec<Value>> {
        columns
            .iter()
            .enumerate()
            .map(|(idx, col)| decode_column(row, idx, col))
            .collect()
    }

    fn decode_column(row: &MySqlRow, idx: usize, col: &ColumnMeta) -> SqlResult<Value> {
        if row.try_get_raw(idx)?.is_null() {
            return Ok(Value::null());
        }

        match categorize_type(&col.type_name, Brand::MySql) {
            TypeCategory::Binary | TypeCategory::Array => {
                return Err(SqlError::unsupported_column(&col.name, &col.type_name));
            }
            TypeCategory::Integer => {
                try_decode!(row, idx,
                    i64 => number_i64,
                    u64 => |v: u64| Value::Number(v as f64),
                );
            }
            TypeCategory::Float => {
                try_decode!(row, idx,
                    f64 => Value::Number,
                    f32 => |v: f32| Value::Number(f64::from(v)),
                );
            }
            TypeCategory::Decimal => {
                try_decode!(row, idx, RawDecimal => RawDecimal::into_value);
            }
            TypeCategory::Boolean => {
                try_decode!(row, idx, bool => Value::Boolean);
            }
            TypeCategory::Temporal => {
                try_decode!(row, idx,
                    chrono::NaiveDateTime => |v: chrono::NaiveDateTime| Value::String(v.to_string()),
                    chrono::DateTime<chrono::Utc> => |v: chrono::DateTime<chrono::Utc>| Value::String(v.to_rfc3339()),
                    chrono::NaiveDate => |v: chrono::NaiveDate| Value::String(v.to_string()),
                    chrono::NaiveTime => |v: chrono::NaiveTime| Value::String(v.to_string()),
                );
            }
            TypeCategory::Json => {
                try_decode!(row, idx, serde_json::Value => json_text);
            }
            TypeCategory::Text | TypeCategory::Uuid | TypeCategory::Unknown => {}
        }

        try_decode!(row, idx, String => Value::String);
        Err(SqlError::unsupported_column(&col.name, &col.type_name))
    }
}

pub mod postgres {
    use super::*;
    use sqlx::postgres::PgRow;

    pub fn decode_row(row: &PgRow, columns: &[ColumnMeta]) -> SqlResult<Vec<Value>> {
        columns
            .iter()
            .enumerate()
            .map(|(idx, col)| decode_column(row, idx, col))
            .collect()
    }

    fn decode_column(row: &PgRow, idx: usize, col: &ColumnMeta) -> SqlResult<Value> {
        if row.try_get_raw(idx)?.is_null() {
            return Ok(Value::null());
        }

        match categorize_type(&col.type_name, Brand::PostgreSql) {
            TypeCategory::Binary => {
                return Err(SqlError::unsupported_column(&col.name, &col.type_name));
            }
            TypeCategory::Integer => {
                try_decode!(row, idx,
                    i64 => number_i64,
                    i32 => |v: i32| Value::Number(f64::from(v)),
                    i16 => |v: i16| Value::Number(f64::from(v)),
                );
            }
            TypeCategory::Float => {
                try_decode!(row, idx,
                    f64 => Value::Number,
                    f32 => |v: f32| Value::Number(f64::from(v)),
                );
            }
            TypeCategory::Decimal => {
                try_decode!(row, idx, RawDecimal => RawDecimal::into_value);
            }
            TypeCategory::Boolean => {
                try_decode!(row, idx, bool => Value::Boolean);
            }
            TypeCategory::Temporal => {
                try_decode!(row, idx,
                    chrono::NaiveDateTime => |v: chrono::NaiveDateTime| Value::String(v.to_string()),
                    chrono::DateTime<chrono::Utc> => |v: chrono::DateTime<chrono::Utc>| Value::String(v.to_rfc3339()),
                    chrono::NaiveDate => |v: chrono::NaiveDate| Value::String(v.to_string()),
                    chrono::NaiveTime => |v: chrono::NaiveTime| Value::String(v.to_string()),
                );
            }
            TypeCategory::Json => {
                try_decode!(row, idx, serde_json::Value => json_text);
            }
            TypeCategory::Uuid => {
                try_decode!(row, idx, uuid::Uuid => |v: uuid::Uuid| Value::String(v.to_string()));
            }
            TypeCategory::Array => {
                try_decode!(row, idx,
                    Vec<i64> => |v: Vec<i64>| list(v, number_i64),
                    Vec<i32> => |v: Vec<i32>| list(v, |n| Value::Number(f64::from(n))),
                    Vec<i16> => |v: Vec<i16>| list(v, |n| Value::Number(f64::from(n))),
                    Vec<f64> => |v: Vec<f64>| list(v, Value::Number),
                    Vec<f32> => |v: Vec<f32>| list(v, |n| Value::Number(f64::from(n))),
                    Vec<bool> => |v: Vec<bool>| list(v, Value::Boolean),
                    Vec<String> => |v: Vec<String>| list(v, Value::String),
                );
                return Err(SqlError::unsupported_column(&col.name, &col.type_name));
            }
            TypeCategory::Text | TypeCategory::Unknown => {}
        }

        try_decode!(row, idx, String => Value::String);
        Err(SqlError::unsupported_column(&col.name, &col.type_name))
    }
}

pub mod sqlite {
    use super::*;
    use sqlx::sqlite::SqliteRow;

    pub fn decode_row(row: &SqliteRow, columns: &[ColumnMeta]) -> SqlResult<Vec<Value>> {
        columns
            .iter()
            .enumerate()
            .map(|(idx, col)| decode_column(row, idx, col))
            .collect()
    }

    /// SQLite is dynamically typed: the stored value's storage class decides
    /// the decoding, except for columns declared boolean.
    fn decode_column(row: &SqliteRow, idx: usize, col: &ColumnMeta) -> SqlResult<Value> {
        let storage = {
            let raw = row.try_get_raw(idx)?;
            if raw.is_null() {
                return Ok(Value::null());
            }
            raw.type_info().name().to_uppercase()
        };

        if categorize_type(&col.type_name, Brand::Sqlite) == TypeCategory::Boolean {
            try_decode!(row, idx, bool => Value::Boolean);
        }

        match storage.as_str() {
            "INTEGER" => {
                try_decode!(row, idx, i64 => number_i64);
            }
            "REAL" => {
                try_decode!(row, idx, f64 => Value::Number);
            }
            "TEXT" => {
                try_decode!(row, idx, String => Value::String);
            }
            _ => {}
        }

        Err(SqlError::unsupported_column(&col.name, &col.type_name))
    }
}
