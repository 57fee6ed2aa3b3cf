//! Scalar cell values and column types

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a column
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// A single dynamically-typed cell
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// The column type this value belongs to, `None` for NULL
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Self::Null => None,
            Self::Text(_) => Some(ColumnType::Text),
            Self::Integer(_) => Some(ColumnType::Integer),
            Self::Float(_) => Some(ColumnType::Float),
            Self::Boolean(_) => Some(ColumnType::Boolean),
            Self::Date(_) => Some(ColumnType::Date),
            Self::Timestamp(_) => Some(ColumnType::Timestamp),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Render the value as a delimited-text field
    ///
    /// NULL (and NaN) render as an empty field, which the warehouse reads
    /// back as NULL. Whole floats keep their decimal point (`1.0`).
    pub fn to_field(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Text(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => format_float(*f),
            Self::Boolean(b) => b.to_string(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        String::new()
    } else if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            other => f.write_str(&other.to_field()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Self::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_fields_keep_decimal_point() {
        assert_eq!(Value::Float(1.0).to_field(), "1.0");
        assert_eq!(Value::Float(-3.0).to_field(), "-3.0");
        assert_eq!(Value::Float(2.5).to_field(), "2.5");
        assert_eq!(Value::Float(f64::NAN).to_field(), "");
    }

    #[test]
    fn test_temporal_fields() {
        let date = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        assert_eq!(Value::Date(date).to_field(), "2023-01-01");

        let ts = date.and_hms_opt(8, 30, 0).unwrap();
        assert_eq!(Value::Timestamp(ts).to_field(), "2023-01-01 08:30:00");

        let ts = date.and_hms_milli_opt(8, 30, 0, 250).unwrap();
        assert_eq!(Value::Timestamp(ts).to_field(), "2023-01-01 08:30:00.250");
    }

    #[test]
    fn test_null_renders_empty() {
        assert_eq!(Value::Null.to_field(), "");
        assert_eq!(Value::Null.column_type(), None);
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_column_type_of_value() {
        assert_eq!(Value::from("a").column_type(), Some(ColumnType::Text));
        assert_eq!(Value::from(1_i64).column_type(), Some(ColumnType::Integer));
        assert_eq!(Value::from(true).column_type(), Some(ColumnType::Boolean));
    }
}
