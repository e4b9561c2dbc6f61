// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured log events as they arrive from the logging pipeline.
//!
//! A [`LogEvent`] carries an already-rendered message plus an ordered set of
//! structured properties. Property values form a finite tree of
//! [`PropertyValue`] nodes; the sink never mutates an event, it only reads it
//! while building an outgoing message.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer};

/// Structure tag identifying the two-field key/value shape.
pub const KEY_VALUE_PAIR_TAG: &str = "KeyValuePair";

/// Severity of a log event, ordered from most to least verbose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Level {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl AsRef<str> for Level {
    fn as_ref(&self) -> &str {
        match self {
            Level::Trace => "Trace",
            Level::Debug => "Debug",
            Level::Info => "Info",
            Level::Warn => "Warn",
            Level::Error => "Error",
            Level::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Case-insensitive; accepts the common long spellings as well.
impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" | "verbose" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" | "information" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "fatal" | "critical" => Ok(Level::Fatal),
            _ => Err(format!(
                "Invalid log level: '{s}'. Valid levels are: trace, debug, info, warn, error, fatal",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Level::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// A primitive property value.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    /// A member of a fixed enumeration, captured by name when the value was logged.
    Enum(String),
}

impl Scalar {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::I64(n) => write!(f, "{n}"),
            Scalar::U64(n) => write!(f, "{n}"),
            Scalar::F64(n) => write!(f, "{n}"),
            Scalar::String(s) | Scalar::Enum(s) => f.write_str(s),
            Scalar::Timestamp(ts) => f.write_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

/// A record with named fields, optionally tagged with a type name.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Structure {
    pub type_tag: Option<String>,
    pub fields: Vec<(String, PropertyValue)>,
}

impl Structure {
    #[must_use]
    pub fn new(type_tag: Option<&str>) -> Self {
        Structure {
            type_tag: type_tag.map(str::to_string),
            fields: Vec::new(),
        }
    }

    /// Builds a structure tagged as a key/value pair.
    #[must_use]
    pub fn key_value_pair(key: impl Into<PropertyValue>, value: impl Into<PropertyValue>) -> Self {
        Structure {
            type_tag: Some(KEY_VALUE_PAIR_TAG.to_string()),
            fields: vec![
                ("Key".to_string(), key.into()),
                ("Value".to_string(), value.into()),
            ],
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.fields.push((name.to_string(), value.into()));
        self
    }

    #[must_use]
    pub fn is_key_value_pair(&self) -> bool {
        self.type_tag.as_deref() == Some(KEY_VALUE_PAIR_TAG)
    }
}

/// A structured property value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Scalar(Scalar),
    Sequence(Vec<PropertyValue>),
    Dictionary(Vec<(Scalar, PropertyValue)>),
    Structure(Structure),
}

impl PropertyValue {
    #[must_use]
    pub fn null() -> Self {
        PropertyValue::Scalar(Scalar::Null)
    }

    #[must_use]
    pub fn enumeration(name: &str) -> Self {
        PropertyValue::Scalar(Scalar::Enum(name.to_string()))
    }
}

impl From<Scalar> for PropertyValue {
    fn from(value: Scalar) -> Self {
        PropertyValue::Scalar(value)
    }
}

impl From<Structure> for PropertyValue {
    fn from(value: Structure) -> Self {
        PropertyValue::Structure(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Scalar(Scalar::String(value.to_string()))
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Scalar(Scalar::String(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Scalar(Scalar::Bool(value))
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Scalar(Scalar::I64(i64::from(value)))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Scalar(Scalar::I64(value))
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        PropertyValue::Scalar(Scalar::U64(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Scalar(Scalar::F64(value))
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        PropertyValue::Scalar(Scalar::Timestamp(value))
    }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
    fn from(values: Vec<T>) -> Self {
        PropertyValue::Sequence(values.into_iter().map(Into::into).collect())
    }
}

/// JSON objects become structures; a string `$type` member becomes the type tag.
impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => PropertyValue::null(),
            Value::Bool(b) => b.into(),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PropertyValue::Scalar(Scalar::I64(i))
                } else if let Some(u) = n.as_u64() {
                    PropertyValue::Scalar(Scalar::U64(u))
                } else {
                    PropertyValue::Scalar(Scalar::F64(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            Value::String(s) => s.into(),
            Value::Array(items) => {
                PropertyValue::Sequence(items.into_iter().map(PropertyValue::from).collect())
            }
            Value::Object(map) => {
                let mut structure = Structure::default();
                for (name, field) in map {
                    match field {
                        Value::String(tag) if name == "$type" => structure.type_tag = Some(tag),
                        field => structure.fields.push((name, field.into())),
                    }
                }
                PropertyValue::Structure(structure)
            }
        }
    }
}

/// One structured record produced by application code.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    pub exception: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    /// Insertion-ordered properties; names are unique.
    pub properties: Vec<(String, PropertyValue)>,
}

impl LogEvent {
    #[must_use]
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        LogEvent {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            exception: None,
            trace_id: None,
            span_id: None,
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    #[must_use]
    pub fn with_trace_context(mut self, trace_id: &str, span_id: &str) -> Self {
        self.trace_id = Some(trace_id.to_string());
        self.span_id = Some(span_id.to_string());
        self
    }

    /// Adds a property, replacing any existing one with the same name.
    #[must_use]
    pub fn with_property(mut self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.set_property(name, value.into());
        self
    }

    pub fn set_property(&mut self, name: &str, value: PropertyValue) {
        match self.properties.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = value,
            None => self.properties.push((name.to_string(), value)),
        }
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}
