//! Rendering result rows as JSON.
//!
//! Rows come back through the `Any` driver, which reports a reduced set of column
//! kinds (`BOOLEAN`, `SMALLINT`, `INTEGER`, `BIGINT`, `REAL`, `DOUBLE`, `TEXT`, `BLOB`,
//! `NULL`). Each column is classified into a [`TypeCategory`] first, then decoded with
//! cascading `try_get` attempts so a driver that widens or narrows a type still renders.

use serde_json::{Map, Value as JsonValue};
use sqlx::any::AnyRow;
use sqlx::{Column, Row, TypeInfo};

/// Logical category for column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Null,
}

/// Classify a column type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower == "null" {
        return TypeCategory::Null;
    }
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }
    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "numeric"
        || lower == "decimal"
    {
        return TypeCategory::Float;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    TypeCategory::Text
}

/// Encode binary data for JSON.
///
/// With `decode_binary`, valid UTF-8 is returned as text; everything else is base64.
pub fn decode_binary_value(bytes: &[u8], decode_binary: bool) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    if decode_binary {
        if let Ok(s) = std::str::from_utf8(bytes) {
            return JsonValue::String(s.to_string());
        }
    }
    JsonValue::String(STANDARD.encode(bytes))
}

/// Convert a row into a column-name → value map.
pub fn row_to_json(row: &AnyRow, decode_binary: bool) -> Map<String, JsonValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let category = categorize_type(col.type_info().name());
            (col.name().to_string(), decode_column(row, idx, category, decode_binary))
        })
        .collect()
}

pub fn rows_to_json(rows: &[AnyRow], decode_binary: bool) -> Vec<JsonValue> {
    rows.iter()
        .map(|row| JsonValue::Object(row_to_json(row, decode_binary)))
        .collect()
}

fn decode_column(row: &AnyRow, idx: usize, category: TypeCategory, decode_binary: bool) -> JsonValue {
    match category {
        TypeCategory::Null => JsonValue::Null,
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => decode_binary_col(row, idx, decode_binary),
        TypeCategory::Text => decode_text(row, idx),
    }
}

fn decode_integer(row: &AnyRow, idx: usize) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(JsonValue::from).unwrap_or(JsonValue::Null);
    }
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
        return JsonValue::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
        return JsonValue::from(v);
    }
    JsonValue::Null
}

fn decode_boolean(row: &AnyRow, idx: usize) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(JsonValue::Bool).unwrap_or(JsonValue::Null);
    }
    decode_integer(row, idx)
}

fn decode_float(row: &AnyRow, idx: usize) -> JsonValue {
    let value = row
        .try_get::<Option<f64>, _>(idx)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<f32>, _>(idx)
                .ok()
                .flatten()
                .map(f64::from)
        });
    match value {
        Some(v) => serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string())),
        None => JsonValue::Null,
    }
}

fn decode_binary_col(row: &AnyRow, idx: usize, decode_binary: bool) -> JsonValue {
    row.try_get::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(|v| decode_binary_value(&v, decode_binary))
        .unwrap_or(JsonValue::Null)
}

fn decode_text(row: &AnyRow, idx: usize) -> JsonValue {
    match row.try_get::<Option<String>, _>(idx) {
        Ok(v) => v.map(JsonValue::String).unwrap_or(JsonValue::Null),
        Err(_) => decode_binary_col(row, idx, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_any_kinds() {
        assert_eq!(categorize_type("BIGINT"), TypeCategory::Integer);
        assert_eq!(categorize_type("SMALLINT"), TypeCategory::Integer);
        assert_eq!(categorize_type("INTEGER"), TypeCategory::Integer);
        assert_eq!(categorize_type("DOUBLE"), TypeCategory::Float);
        assert_eq!(categorize_type("REAL"), TypeCategory::Float);
        assert_eq!(categorize_type("BOOLEAN"), TypeCategory::Boolean);
        assert_eq!(categorize_type("BLOB"), TypeCategory::Binary);
        assert_eq!(categorize_type("TEXT"), TypeCategory::Text);
        assert_eq!(categorize_type("NULL"), TypeCategory::Null);
    }

    #[test]
    fn test_categorize_driver_names() {
        assert_eq!(categorize_type("TINYINT"), TypeCategory::Integer);
        assert_eq!(categorize_type("bytea"), TypeCategory::Binary);
        assert_eq!(categorize_type("VARCHAR"), TypeCategory::Text);
        assert_eq!(categorize_type("DATETIME"), TypeCategory::Text);
    }

    #[test]
    fn test_decode_binary_value_with_valid_utf8() {
        let bytes = b"hello world";
        assert_eq!(
            decode_binary_value(bytes, true),
            JsonValue::String("hello world".to_string())
        );
        assert_eq!(
            decode_binary_value(bytes, false),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
    }

    #[test]
    fn test_decode_binary_value_with_invalid_utf8() {
        let bytes: &[u8] = &[0xFF, 0xFE, 0x00, 0x01];
        assert_eq!(
            decode_binary_value(bytes, true),
            JsonValue::String("//4AAQ==".to_string())
        );
    }
}
