use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::db::models::TaskPriority;

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_day(value: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").with_context(|| format!("failed to parse {field}"))
}

pub fn parse_priority(value: &str) -> Result<TaskPriority> {
    TaskPriority::parse(value).ok_or_else(|| anyhow!("unknown task priority {value}"))
}

/// Epoch milliseconds as stored under `sessionEndTs`/`sessionStartTs`.
pub fn to_millis(value: Option<DateTime<Utc>>) -> Value {
    match value {
        Some(at) => Value::from(at.timestamp_millis()),
        None => Value::Null,
    }
}

/// Lenient read of a stored timestamp. Anything that is not a number becomes `None`.
pub fn from_millis(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let millis = match value? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float.round() as i64))?,
        _ => return None,
    };
    DateTime::from_timestamp_millis(millis)
}

/// Decode a stored value, falling back to `default` when absent or malformed.
pub fn decode_or<T: DeserializeOwned>(value: Option<&Value>, default: T) -> T {
    value
        .cloned()
        .and_then(|raw| serde_json::from_value(raw).ok())
        .unwrap_or(default)
}
