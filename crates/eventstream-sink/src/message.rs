// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::event::Scalar;

/// A flat scalar accepted as transport metadata.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageValue {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    String(String),
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for MessageValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageValue::Null => f.write_str("null"),
            MessageValue::Bool(b) => write!(f, "{b}"),
            MessageValue::I64(n) => write!(f, "{n}"),
            MessageValue::U64(n) => write!(f, "{n}"),
            MessageValue::F64(n) => write!(f, "{n}"),
            MessageValue::String(s) => f.write_str(s),
            MessageValue::Timestamp(ts) => {
                f.write_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

impl From<&Scalar> for MessageValue {
    fn from(scalar: &Scalar) -> Self {
        match scalar {
            Scalar::Null => MessageValue::Null,
            Scalar::Bool(b) => MessageValue::Bool(*b),
            Scalar::I64(n) => MessageValue::I64(*n),
            Scalar::U64(n) => MessageValue::U64(*n),
            Scalar::F64(n) => MessageValue::F64(*n),
            Scalar::String(s) | Scalar::Enum(s) => MessageValue::String(s.clone()),
            Scalar::Timestamp(ts) => MessageValue::Timestamp(*ts),
        }
    }
}

impl From<&str> for MessageValue {
    fn from(value: &str) -> Self {
        MessageValue::String(value.to_string())
    }
}

impl From<String> for MessageValue {
    fn from(value: String) -> Self {
        MessageValue::String(value)
    }
}

impl From<i64> for MessageValue {
    fn from(value: i64) -> Self {
        MessageValue::I64(value)
    }
}

/// The transport-level unit built for one log event.
#[derive(Clone, Debug, PartialEq, Default, Serialize)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    pub properties: BTreeMap<String, MessageValue>,
    pub content_type: Option<String>,
    pub partition_key: Option<String>,
}

impl OutgoingMessage {
    #[must_use]
    pub fn new(body: Vec<u8>) -> Self {
        OutgoingMessage {
            body,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&MessageValue> {
        self.properties.get(name)
    }

    /// Lossy view of the body for logging and text-based transports.
    #[must_use]
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
