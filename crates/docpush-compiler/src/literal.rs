//! Literal conversion into native document values

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use docpush_ir::{DataType, Value};
use serde_json::{json, Number, Value as JsonValue};

use crate::error::{CompileError, Result};

/// Resolves binary literals into the value stored in documents
pub trait BlobResolver {
    fn resolve(&self, bytes: &[u8]) -> Result<JsonValue>;
}

/// Stores binary values inline as lowercase hex strings
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineBlobResolver;

impl BlobResolver for InlineBlobResolver {
    fn resolve(&self, bytes: &[u8]) -> Result<JsonValue> {
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        Ok(JsonValue::String(hex))
    }
}

/// Convert a literal of the given logical type into its native form
pub fn to_native(value: &Value, data_type: &DataType, blobs: &dyn BlobResolver) -> Result<JsonValue> {
    match value {
        Value::Null => Ok(JsonValue::Null),
        Value::Bool(b) => Ok(JsonValue::Bool(*b)),
        Value::Int(i) => convert_int(*i, data_type),
        Value::Float(f) => match data_type {
            DataType::Decimal { .. } => Ok(decimal(&f.to_string())),
            _ => float(*f),
        },
        Value::Decimal { decimal: text } => {
            if text.parse::<f64>().is_err() {
                return Err(CompileError::InvalidLiteral(format!("decimal '{}'", text)));
            }
            match data_type {
                DataType::Float32 | DataType::Float64 => float(text.parse::<f64>().unwrap_or_default()),
                _ => Ok(decimal(text)),
            }
        }
        Value::String(s) => Ok(JsonValue::String(s.clone())),
        Value::Bytes { bytes } => blobs.resolve(bytes),
        Value::Date { date } => epoch_days(date).map(JsonValue::from),
        Value::Time { time } => millis_of_day(time).map(JsonValue::from),
        Value::Timestamp { timestamp } => epoch_millis(timestamp).map(JsonValue::from),
        Value::Array(items) => {
            let component = data_type.component();
            let converted = items
                .iter()
                .map(|item| to_native(item, component, blobs))
                .collect::<Result<Vec<_>>>()?;
            Ok(JsonValue::Array(converted))
        }
        Value::Document(entries) => {
            let mut doc = serde_json::Map::new();
            for (key, item) in entries {
                doc.insert(key.clone(), to_native(item, &DataType::Unknown, blobs)?);
            }
            Ok(JsonValue::Object(doc))
        }
    }
}

fn convert_int(i: i64, data_type: &DataType) -> Result<JsonValue> {
    if data_type.is_narrow_int() {
        let narrow = i32::try_from(i)
            .map_err(|_| CompileError::InvalidLiteral(format!("{} does not fit a 32-bit integer", i)))?;
        return Ok(JsonValue::from(narrow));
    }
    match data_type {
        DataType::Decimal { .. } => Ok(decimal(&i.to_string())),
        DataType::Float32 | DataType::Float64 => float(i as f64),
        _ => Ok(JsonValue::from(i)),
    }
}

fn float(f: f64) -> Result<JsonValue> {
    Number::from_f64(f)
        .map(JsonValue::Number)
        .ok_or_else(|| CompileError::InvalidLiteral(format!("non-finite number {}", f)))
}

fn decimal(text: &str) -> JsonValue {
    json!({ "$numberDecimal": text })
}

/// Days from 0001-01-01 to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

fn epoch_days(date: &str) -> Result<i64> {
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| CompileError::InvalidLiteral(format!("date '{}': {}", date, e)))?;
    Ok(i64::from(parsed.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE)
}

fn millis_of_day(time: &str) -> Result<i64> {
    let parsed = NaiveTime::parse_from_str(time, "%H:%M:%S%.f")
        .map_err(|e| CompileError::InvalidLiteral(format!("time '{}': {}", time, e)))?;
    Ok(i64::from(parsed.num_seconds_from_midnight()) * 1000 + i64::from(parsed.nanosecond() / 1_000_000))
}

fn epoch_millis(timestamp: &str) -> Result<i64> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) {
        return Ok(parsed.timestamp_millis());
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(timestamp, format).ok())
        .map(|parsed| parsed.and_utc().timestamp_millis())
        .ok_or_else(|| CompileError::InvalidLiteral(format!("timestamp '{}'", timestamp)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(value: Value, data_type: DataType) -> JsonValue {
        to_native(&value, &data_type, &InlineBlobResolver).unwrap()
    }

    #[test]
    fn test_narrow_integers_are_checked() {
        assert_eq!(convert(Value::Int(20), DataType::Int32), json!(20));
        assert!(to_native(&Value::Int(i64::MAX), &DataType::Int16, &InlineBlobResolver).is_err());
        assert_eq!(convert(Value::Int(i64::MAX), DataType::Int64), json!(i64::MAX));
    }

    #[test]
    fn test_decimal_keeps_text() {
        let value = Value::Decimal { decimal: "12.50".to_string() };
        assert_eq!(
            convert(value, DataType::Decimal { precision: 10, scale: 2 }),
            json!({"$numberDecimal": "12.50"})
        );
    }

    #[test]
    fn test_temporal_values() {
        assert_eq!(convert(Value::Date { date: "1970-01-11".into() }, DataType::Date), json!(10));
        assert_eq!(convert(Value::Time { time: "00:00:01.500".into() }, DataType::Time), json!(1500));
        assert_eq!(
            convert(Value::Timestamp { timestamp: "1970-01-01 00:00:02".into() }, DataType::Timestamp),
            json!(2000)
        );
        assert!(to_native(&Value::Date { date: "yesterday".into() }, &DataType::Date, &InlineBlobResolver).is_err());
    }

    #[test]
    fn test_bytes_inline_hex() {
        let value = Value::Bytes { bytes: vec![0xde, 0xad, 0x01] };
        assert_eq!(convert(value, DataType::Blob), json!("dead01"));
    }
}
