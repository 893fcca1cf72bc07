use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::schema::sql;

/// A column definition used when creating streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: false,
        }
    }

    pub fn nullable(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
        }
    }
}

/// A single result row: column name to JSON-typed value, as returned by the
/// engine's `FORMAT JSON` / `FORMAT JSONEachRow` output.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A typed SQL literal for validated inserts.
///
/// Rendering rules: strings single-quoted with `''` escaping, timestamps as
/// `YYYY-MM-DD HH:MM:SS.sss`, booleans as bare literals, numerics unquoted,
/// absent values as `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    pub fn to_sql(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => sql::quote(s),
            Self::Timestamp(t) => format!("'{}'", t.format("%Y-%m-%d %H:%M:%S%.3f")),
        }
    }

    pub fn opt_text(value: Option<&str>) -> Self {
        match value {
            Some(s) => Self::Text(s.to_string()),
            None => Self::Null,
        }
    }

    pub fn opt_bool(value: Option<bool>) -> Self {
        match value {
            Some(b) => Self::Bool(b),
            None => Self::Null,
        }
    }

    pub fn opt_timestamp(value: Option<DateTime<Utc>>) -> Self {
        match value {
            Some(t) => Self::Timestamp(t),
            None => Self::Null,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for SqlValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

// ── Row accessors ──────────────────────────────────────────────────
//
// The engine serializes wide integer types and datetimes as JSON strings,
// so each accessor tolerates both the native JSON type and its string form.

/// String value of a column, empty string when missing or null.
pub fn get_string(row: &Row, key: &str) -> String {
    match row.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(v) if !v.is_null() => v.to_string(),
        _ => String::new(),
    }
}

/// String value of a column; `None` when missing, null, or empty.
pub fn get_opt_string(row: &Row, key: &str) -> Option<String> {
    match row.get(key) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

pub fn get_i32(row: &Row, key: &str) -> i32 {
    match row.get(key) {
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(0) as i32,
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

pub fn get_bool(row: &Row, key: &str) -> bool {
    match row.get(key) {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        Some(serde_json::Value::String(s)) => s == "true" || s == "1",
        _ => false,
    }
}

/// Tri-state boolean for nullable bool columns: `None` when missing or null.
pub fn get_opt_bool(row: &Row, key: &str) -> Option<bool> {
    match row.get(key) {
        Some(serde_json::Value::Bool(b)) => Some(*b),
        Some(serde_json::Value::Number(n)) => Some(n.as_i64().unwrap_or(0) != 0),
        Some(serde_json::Value::String(s)) if s == "true" || s == "1" => Some(true),
        Some(serde_json::Value::String(s)) if s == "false" || s == "0" => Some(false),
        _ => None,
    }
}

pub fn get_datetime(row: &Row, key: &str) -> Option<DateTime<Utc>> {
    match row.get(key) {
        Some(serde_json::Value::String(s)) => parse_datetime(s),
        _ => None,
    }
}

/// Parse the engine's datetime text (`2025-06-01 12:00:00.000`), falling
/// back to RFC3339.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
