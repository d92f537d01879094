//! Database-agnostic type mappings.
//!
//! This module decodes database rows into [`Record`]s of [`Value`]s.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! A column that fails to decode under its category falls back to text and
//! finally to `Null`, with a warning naming the column.

use crate::models::{DatabaseType, Record, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};
use uuid::Uuid;

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
    Binary,
    Json,
    Date,
    DateTime,
    Time,
    Uuid,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "date" {
        return TypeCategory::Date;
    }
    if lower == "datetime" || lower.starts_with("timestamp") {
        return TypeCategory::DateTime;
    }
    if lower == "time" || lower == "timetz" {
        return TypeCategory::Time;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    // Integer types ("interval" and "point" also contain "int")
    if (lower.contains("int") && !lower.contains("interval") && !lower.contains("point"))
        || lower.contains("serial")
        || lower.contains("tiny")
    {
        return TypeCategory::Integer;
    }

    // Boolean
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // Float types
    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    // JSON types
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    // Binary types
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    TypeCategory::Text
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

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

fn float_value(v: f64) -> Value {
    Value::Float(v)
}

fn time_value(v: NaiveTime) -> Value {
    Value::Text(v.format("%H:%M:%S%.f").to_string())
}

fn undecodable(column: &str, type_name: &str) -> Value {
    tracing::warn!(column, type_name, "Failed to decode column, returning NULL");
    Value::Null
}

// =============================================================================
// Row to Record Trait
// =============================================================================

/// Trait for converting database rows to records keyed by column name.
pub trait RowToRecord {
    fn to_record(&self) -> Record;
}

impl RowToRecord for MySqlRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::MySQL);
                let value = mysql::decode_column(self, idx, col.name(), type_name, category);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToRecord for PgRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::PostgreSQL);
                let value = postgres::decode_column(self, idx, col.name(), type_name, category);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToRecord for SqliteRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::SQLite);
                let value = sqlite::decode_column(self, idx, col.name(), type_name, category);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        column: &str,
        type_name: &str,
        category: TypeCategory,
    ) -> Value {
        let decoded = match category {
            TypeCategory::Decimal => row
                .try_get::<Option<RawDecimal>, _>(idx)
                .map(|v| v.map_or(Value::Null, |d| Value::Text(d.0))),
            TypeCategory::Integer => return decode_integer(row, idx, column, type_name),
            TypeCategory::Boolean => row.try_get::<Option<bool>, _>(idx).map(Value::from),
            TypeCategory::Float => row
                .try_get::<Option<f64>, _>(idx)
                .or_else(|_| row.try_get::<Option<f32>, _>(idx).map(|v| v.map(f64::from)))
                .map(|v| v.map_or(Value::Null, float_value)),
            TypeCategory::Binary => row.try_get::<Option<Vec<u8>>, _>(idx).map(Value::from),
            TypeCategory::Json => row.try_get::<Option<JsonValue>, _>(idx).map(Value::from),
            TypeCategory::Date => row.try_get::<Option<NaiveDate>, _>(idx).map(Value::from),
            TypeCategory::DateTime => row
                .try_get::<Option<NaiveDateTime>, _>(idx)
                .map(Value::from),
            TypeCategory::Time => row
                .try_get::<Option<NaiveTime>, _>(idx)
                .map(|v| v.map_or(Value::Null, time_value)),
            TypeCategory::Text | TypeCategory::Uuid => {
                row.try_get::<Option<String>, _>(idx).map(Value::from)
            }
        };
        decoded
            .or_else(|_| row.try_get::<Option<String>, _>(idx).map(Value::from))
            .unwrap_or_else(|_| undecodable(column, type_name))
    }

    fn decode_integer(row: &MySqlRow, idx: usize, column: &str, type_name: &str) -> Value {
        // Signed first, then unsigned; u64 beyond i64 range keeps its digits as text
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return Value::from(v);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return Value::from(v);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return Value::from(v);
        }
        if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
            return Value::from(v);
        }
        if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
            return Value::from(v);
        }
        if let Ok(v) = row.try_get::<Option<u16>, _>(idx) {
            return Value::from(v);
        }
        if let Ok(v) = row.try_get::<Option<u8>, _>(idx) {
            return Value::from(v);
        }
        if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            return match v {
                None => Value::Null,
                Some(n) => i64::try_from(n)
                    .map(Value::Int)
                    .unwrap_or_else(|_| Value::Text(n.to_string())),
            };
        }
        undecodable(column, type_name)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        column: &str,
        type_name: &str,
        category: TypeCategory,
    ) -> Value {
        let decoded = match category {
            TypeCategory::Decimal => row
                .try_get::<Option<RawDecimal>, _>(idx)
                .map(|v| v.map_or(Value::Null, |d| Value::Text(d.0))),
            TypeCategory::Integer => row
                .try_get::<Option<i64>, _>(idx)
                .or_else(|_| row.try_get::<Option<i32>, _>(idx).map(|v| v.map(i64::from)))
                .or_else(|_| row.try_get::<Option<i16>, _>(idx).map(|v| v.map(i64::from)))
                .map(Value::from),
            TypeCategory::Boolean => row.try_get::<Option<bool>, _>(idx).map(Value::from),
            TypeCategory::Float => row
                .try_get::<Option<f64>, _>(idx)
                .or_else(|_| row.try_get::<Option<f32>, _>(idx).map(|v| v.map(f64::from)))
                .map(|v| v.map_or(Value::Null, float_value)),
            TypeCategory::Binary => row.try_get::<Option<Vec<u8>>, _>(idx).map(Value::from),
            TypeCategory::Json => row.try_get::<Option<JsonValue>, _>(idx).map(Value::from),
            TypeCategory::Date => row.try_get::<Option<NaiveDate>, _>(idx).map(Value::from),
            TypeCategory::DateTime => row
                .try_get::<Option<NaiveDateTime>, _>(idx)
                .or_else(|_| {
                    row.try_get::<Option<DateTime<Utc>>, _>(idx)
                        .map(|v| v.map(|dt| dt.naive_utc()))
                })
                .map(Value::from),
            TypeCategory::Time => row
                .try_get::<Option<NaiveTime>, _>(idx)
                .map(|v| v.map_or(Value::Null, time_value)),
            TypeCategory::Uuid => row
                .try_get::<Option<Uuid>, _>(idx)
                .map(|v| v.map_or(Value::Null, |id| Value::Text(id.hyphenated().to_string()))),
            TypeCategory::Text => row.try_get::<Option<String>, _>(idx).map(Value::from),
        };
        decoded
            .or_else(|_| row.try_get::<Option<String>, _>(idx).map(Value::from))
            .unwrap_or_else(|_| undecodable(column, type_name))
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        column: &str,
        type_name: &str,
        category: TypeCategory,
    ) -> Value {
        let decoded = match category {
            TypeCategory::Integer => row.try_get::<Option<i64>, _>(idx).map(Value::from),
            TypeCategory::Boolean => row.try_get::<Option<bool>, _>(idx).map(Value::from),
            TypeCategory::Float | TypeCategory::Decimal => row
                .try_get::<Option<f64>, _>(idx)
                .map(|v| v.map_or(Value::Null, float_value)),
            TypeCategory::Binary => row.try_get::<Option<Vec<u8>>, _>(idx).map(Value::from),
            TypeCategory::Date => row.try_get::<Option<NaiveDate>, _>(idx).map(Value::from),
            TypeCategory::DateTime => row
                .try_get::<Option<NaiveDateTime>, _>(idx)
                .map(Value::from),
            TypeCategory::Time => row
                .try_get::<Option<NaiveTime>, _>(idx)
                .map(|v| v.map_or(Value::Null, time_value)),
            // SQLite has no native JSON type; JSON columns hold text
            TypeCategory::Json => row.try_get::<Option<String>, _>(idx).map(|v| match v {
                Some(s) => serde_json::from_str::<JsonValue>(&s)
                    .map(Value::Json)
                    .unwrap_or(Value::Text(s)),
                None => Value::Null,
            }),
            TypeCategory::Text | TypeCategory::Uuid => {
                row.try_get::<Option<String>, _>(idx).map(Value::from)
            }
        };
        decoded
            .or_else(|_| row.try_get::<Option<String>, _>(idx).map(Value::from))
            .or_else(|_| row.try_get::<Option<i64>, _>(idx).map(Value::from))
            .unwrap_or_else(|_| undecodable(column, type_name))
    }
}
