// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Newline-delimited JSON input records.
//!
//! ```json
//! {"Timestamp":"2024-05-01T12:00:00Z","Level":"Warning","Message":"disk almost full","Properties":{"Disk":{"Mount":"/var"}}}
//! ```
//!
//! Field names are matched in PascalCase or lowercase. Everything except the
//! message is optional; a missing level means `Info` and a missing timestamp
//! means the time the line was read.

use chrono::{DateTime, Utc};
use eventstream_sink::event::{Level, LogEvent, PropertyValue};
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct InputRecord {
    #[serde(rename = "Timestamp", alias = "timestamp", default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "Level", alias = "level", default)]
    pub level: Option<Level>,
    #[serde(rename = "Message", alias = "message")]
    pub message: String,
    #[serde(rename = "Exception", alias = "exception", default)]
    pub exception: Option<String>,
    #[serde(rename = "TraceId", alias = "trace_id", default)]
    pub trace_id: Option<String>,
    #[serde(rename = "SpanId", alias = "span_id", default)]
    pub span_id: Option<String>,
    #[serde(rename = "Properties", alias = "properties", default)]
    pub properties: Map<String, Value>,
}

impl From<InputRecord> for LogEvent {
    fn from(record: InputRecord) -> Self {
        let mut event = LogEvent::new(record.level.unwrap_or_default(), record.message);
        if let Some(timestamp) = record.timestamp {
            event = event.with_timestamp(timestamp);
        }
        if let Some(exception) = record.exception {
            event = event.with_exception(exception);
        }
        event.trace_id = record.trace_id;
        event.span_id = record.span_id;
        for (name, value) in record.properties {
            event.set_property(&name, PropertyValue::from(value));
        }
        event
    }
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<LogEvent>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let record: InputRecord = serde_json::from_str(line)?;
    Ok(Some(record.into()))
}
