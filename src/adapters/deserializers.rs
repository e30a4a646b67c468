use chrono::{DateTime, Utc};
use serde::de::Error;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use uuid::Uuid;

/// Treats an explicit JSON `null` like a missing field.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Lenient timestamp: RFC3339 strings, epoch seconds (float) or epoch milliseconds.
/// Unparseable values become `None` rather than failing the record.
pub fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(timestamp_from_value))
}

pub fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let raw = n.as_f64()?;
            // Values past the year 33658 in seconds are almost certainly milliseconds
            if raw.abs() > 1.0e12 { epoch_seconds(raw / 1000.0) } else { epoch_seconds(raw) }
        }
        Value::String(s) => parse_rfc3339(s),
        _ => None,
    }
}

pub fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Naive ISO timestamps are taken as UTC
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok().map(|n| n.and_utc())
}

/// Converts fractional epoch seconds; non-positive values mean "unknown".
pub fn epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
    DateTime::from_timestamp(whole, nanos)
}

/// Custom deserializer for vendor identifiers that must be UUIDs
pub fn deserialize_uuid<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;

    if s.is_empty() {
        return Err(Error::custom("uuid cannot be empty"));
    }

    Uuid::parse_str(&s).map_err(|e| Error::custom(format!("invalid UUID format: {}", e)))?;

    Ok(s)
}
