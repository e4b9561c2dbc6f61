// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Builds an [`OutgoingMessage`] from a [`LogEvent`].
//!
//! The body is the formatter's output encoded as UTF-8. Every message carries
//! the metadata entries below; the optional ones are omitted, not blanked,
//! when the event has no value for them.
//!
//! | key | value |
//! |---|---|
//! | `Timestamp` | event timestamp |
//! | `Type` | [`EVENT_TYPE_MARKER`] |
//! | `Level` | level name |
//! | `TraceId` | only when present |
//! | `SpanId` | only when present |
//! | `Exception` | only when present |
//!
//! Context properties are always added; ordinary properties only when the
//! renderer was built with `include_properties`. Neither may overwrite a
//! metadata key.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::{context_key, ordinary_key};
use crate::diagnostics::SinkDiagnostics;
use crate::error::SinkError;
use crate::event::LogEvent;
use crate::flatten::flatten_properties;
use crate::formatter::TextFormatter;
use crate::message::{MessageValue, OutgoingMessage};

/// Value of the `Type` metadata entry.
pub const EVENT_TYPE_MARKER: &str = "LogEvent";

pub const TIMESTAMP_KEY: &str = "Timestamp";
pub const TYPE_KEY: &str = "Type";
pub const LEVEL_KEY: &str = "Level";
pub const TRACE_ID_KEY: &str = "TraceId";
pub const SPAN_ID_KEY: &str = "SpanId";
pub const EXCEPTION_KEY: &str = "Exception";

const RESERVED_KEYS: [&str; 6] = [
    TIMESTAMP_KEY,
    TYPE_KEY,
    LEVEL_KEY,
    TRACE_ID_KEY,
    SPAN_ID_KEY,
    EXCEPTION_KEY,
];

#[derive(Clone)]
pub struct PayloadRenderer {
    formatter: Arc<dyn TextFormatter>,
    content_type: Option<String>,
    include_properties: bool,
    diagnostics: Arc<SinkDiagnostics>,
}

impl std::fmt::Debug for PayloadRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadRenderer")
            .field("content_type", &self.content_type)
            .field("include_properties", &self.include_properties)
            .finish_non_exhaustive()
    }
}

impl PayloadRenderer {
    /// Blank content types are treated as absent.
    #[must_use]
    pub fn new(
        formatter: Arc<dyn TextFormatter>,
        content_type: Option<String>,
        include_properties: bool,
        diagnostics: Arc<SinkDiagnostics>,
    ) -> Self {
        PayloadRenderer {
            formatter,
            content_type: content_type.filter(|ct| !ct.trim().is_empty()),
            include_properties,
            diagnostics,
        }
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Arc<SinkDiagnostics> {
        &self.diagnostics
    }

    /// Renders `event` into a message. Formatter failures are returned as-is.
    pub fn render(&self, event: &LogEvent) -> Result<OutgoingMessage, SinkError> {
        let mut buffer = String::new();
        self.formatter.format(event, &mut buffer)?;

        let mut message = OutgoingMessage::new(buffer.into_bytes());
        message.content_type.clone_from(&self.content_type);
        message.properties = self.metadata(event);

        let mut flattened = BTreeMap::new();
        flatten_properties(
            &event.properties,
            context_key,
            &self.diagnostics,
            &mut flattened,
        );
        if self.include_properties {
            flatten_properties(
                &event.properties,
                ordinary_key,
                &self.diagnostics,
                &mut flattened,
            );
        }
        for (key, value) in flattened {
            if RESERVED_KEYS.contains(&key.as_str()) {
                self.diagnostics.property_shadowed(&key);
                continue;
            }
            message.properties.insert(key, value);
        }

        Ok(message)
    }

    fn metadata(&self, event: &LogEvent) -> BTreeMap<String, MessageValue> {
        let mut properties = BTreeMap::new();
        properties.insert(
            TIMESTAMP_KEY.to_string(),
            MessageValue::Timestamp(event.timestamp),
        );
        properties.insert(TYPE_KEY.to_string(), MessageValue::from(EVENT_TYPE_MARKER));
        properties.insert(
            LEVEL_KEY.to_string(),
            MessageValue::from(event.level.as_ref()),
        );
        if let Some(trace_id) = &event.trace_id {
            properties.insert(TRACE_ID_KEY.to_string(), MessageValue::from(trace_id.as_str()));
        }
        if let Some(span_id) = &event.span_id {
            properties.insert(SPAN_ID_KEY.to_string(), MessageValue::from(span_id.as_str()));
        }
        if let Some(exception) = &event.exception {
            properties.insert(
                EXCEPTION_KEY.to_string(),
                MessageValue::from(exception.as_str()),
            );
        }
        properties
    }
}
