use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Timestamp type (nanoseconds since epoch).
pub type Timestamp = u64;

/// Tags type. A `BTreeMap` keeps keys sorted so iteration order is stable,
/// which the series hash relies on.
pub type Tags = BTreeMap<String, String>;

/// Canonical data type of a field, independent of the backend's naming.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FieldDataType {
    #[default]
    Unknown = 0,
    Null = 1,
    Bool = 2,
    Byte = 3,
    Int16 = 4,
    Int64 = 5,
    Uint64 = 6,
    Float64 = 7,
    String = 8,
    DateTimeRfc3339 = 9,
    DateTimeRfc3339Nano = 10,
    DateTimeUnixSecs = 11,
    DateTimeUnixMilli = 12,
    DateTimeUnixNano = 13,
}

/// The role a column plays in a tabular result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FieldRole {
    Timestamp,
    Tag,
    #[default]
    Value,
    Untracked,
}

/// Describes one column of a result: its name, type and where it lives in a row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub data_type: FieldDataType,
    /// Backend-specific type name (e.g. `"Float64"`, `"double"`), resolved to
    /// `data_type` by a type coercer.
    pub provider_type: String,
    pub role: FieldRole,
    /// Column position of the field within a row; `None` when absent.
    pub output_position: Option<usize>,
}

impl FieldDefinition {
    pub fn new(name: &str, data_type: FieldDataType, role: FieldRole, position: usize) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            provider_type: String::new(),
            role,
            output_position: Some(position),
        }
    }

    /// Approximate memory utilization in bytes.
    pub fn size(&self) -> usize {
        self.name.len() + self.provider_type.len() + 17
    }
}

/// Output of a field classifier: every column of a result, grouped by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesFields {
    pub timestamp: FieldDefinition,
    pub tags: Vec<FieldDefinition>,
    pub values: Vec<FieldDefinition>,
    pub untracked: Vec<FieldDefinition>,
    /// Column holding the result (statement) name, if the format has one.
    pub result_name_column: Option<usize>,
}

/// A single typed scalar held by a [`crate::point::Point`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Parses `input` as `data_type`, returning the value and its size in bytes.
    /// Unparseable input yields `(Value::Null, 0)`.
    pub fn parse(input: &str, data_type: FieldDataType) -> (Value, usize) {
        match data_type {
            FieldDataType::Int64 => input
                .parse::<i64>()
                .map(|v| (Value::Int(v), 8))
                .unwrap_or((Value::Null, 0)),
            FieldDataType::Int16 => input
                .parse::<i16>()
                .map(|v| (Value::Int(v as i64), 2))
                .unwrap_or((Value::Null, 0)),
            FieldDataType::Byte => input
                .parse::<i8>()
                .map(|v| (Value::Int(v as i64), 1))
                .unwrap_or((Value::Null, 0)),
            FieldDataType::Uint64 => input
                .parse::<u64>()
                .map(|v| (Value::UInt(v), 8))
                .unwrap_or((Value::Null, 0)),
            FieldDataType::Float64 => input
                .parse::<f64>()
                .map(|v| (Value::Float(v), 8))
                .unwrap_or((Value::Null, 0)),
            FieldDataType::Bool => parse_bool(input)
                .map(|v| (Value::Bool(v), 1))
                .unwrap_or((Value::Null, 0)),
            FieldDataType::String
            | FieldDataType::DateTimeRfc3339
            | FieldDataType::DateTimeRfc3339Nano
            | FieldDataType::DateTimeUnixSecs
            | FieldDataType::DateTimeUnixMilli
            | FieldDataType::DateTimeUnixNano => (Value::Str(input.to_string()), input.len()),
            FieldDataType::Unknown | FieldDataType::Null => (Value::Null, 0),
        }
    }

    /// Approximate memory utilization in bytes.
    pub fn size(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::UInt(_) | Value::Float(_) => 8,
            Value::Str(s) => s.len(),
        }
    }
}

fn parse_bool(input: &str) -> Option<bool> {
    match input {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
