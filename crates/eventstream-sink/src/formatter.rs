// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Text formatters that turn a [`LogEvent`] into a message body.
//!
//! Two formatters ship with the crate:
//!
//! - [`TemplateFormatter`]: renders an output template such as
//!   `{Timestamp} [{Level}] {Message}{NewLine}{Exception}`
//! - [`JsonFormatter`]: renders one JSON object per event
//!
//! Templates are parsed once, at construction, so a malformed template is a
//! configuration error rather than a failure at emit time.

use std::fmt::Write as _;

use chrono::format::{Item, StrftimeItems};
use chrono::SecondsFormat;
use serde_json::{json, Map, Value};

use crate::context::{context_key, ordinary_key, CONTEXT_PROPERTY_PREFIX};
use crate::error::FormatError;
use crate::event::{LogEvent, PropertyValue, Scalar};

pub const DEFAULT_OUTPUT_TEMPLATE: &str = "{Timestamp} [{Level}] {Message}{NewLine}{Exception}";

/// Renders a log event into a text buffer.
pub trait TextFormatter: Send + Sync {
    /// Appends the rendering of `event` to `out`.
    fn format(&self, event: &LogEvent, out: &mut String) -> Result<(), FormatError>;

    /// Content type describing the rendered text, if the formatter knows it.
    fn content_type(&self) -> Option<&str> {
        None
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Timestamp(Option<String>),
    Level,
    Message,
    Exception,
    TraceId,
    SpanId,
    NewLine,
    Properties,
    Property(String),
}

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Literal(String),
    Token(Token),
}

/// Formatter driven by an output template.
#[derive(Clone, Debug)]
pub struct TemplateFormatter {
    segments: Vec<Segment>,
}

impl Default for TemplateFormatter {
    fn default() -> Self {
        // The default template is known to parse.
        Self {
            segments: parse_template(DEFAULT_OUTPUT_TEMPLATE).unwrap_or_default(),
        }
    }
}

impl TemplateFormatter {
    pub fn new(template: &str) -> Result<Self, FormatError> {
        if template.trim().is_empty() {
            return Err(FormatError::Template(
                "output template cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            segments: parse_template(template)?,
        })
    }
}

impl TextFormatter for TemplateFormatter {
    fn format(&self, event: &LogEvent, out: &mut String) -> Result<(), FormatError> {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Token(token) => write_token(token, event, out)?,
            }
        }
        Ok(())
    }

    fn content_type(&self) -> Option<&str> {
        Some("text/plain")
    }
}

fn parse_template(template: &str) -> Result<Vec<Segment>, FormatError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == '}' {
                        closed = true;
                        break;
                    }
                    name.push(next);
                }
                if !closed {
                    return Err(FormatError::Template(format!(
                        "unterminated token '{{{name}' in '{template}'"
                    )));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Token(parse_token(&name)?));
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn parse_token(raw: &str) -> Result<Token, FormatError> {
    let (name, format) = match raw.split_once(':') {
        Some((name, format)) => (name.trim(), Some(format)),
        None => (raw.trim(), None),
    };
    if name.is_empty() {
        return Err(FormatError::Template("empty token name".to_string()));
    }
    let token = match name {
        "Timestamp" => {
            if let Some(format) = format {
                if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                    return Err(FormatError::Template(format!(
                        "invalid timestamp format '{format}'"
                    )));
                }
            }
            Token::Timestamp(format.map(str::to_string))
        }
        "Level" => Token::Level,
        "Message" => Token::Message,
        "Exception" => Token::Exception,
        "TraceId" => Token::TraceId,
        "SpanId" => Token::SpanId,
        "NewLine" => Token::NewLine,
        "Properties" => Token::Properties,
        other => Token::Property(other.to_string()),
    };
    Ok(token)
}

fn write_token(token: &Token, event: &LogEvent, out: &mut String) -> Result<(), FormatError> {
    match token {
        Token::Timestamp(None) => {
            out.push_str(&event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true));
        }
        Token::Timestamp(Some(format)) => {
            write!(out, "{}", event.timestamp.format(format))
                .map_err(|e| FormatError::Custom(e.to_string()))?;
        }
        Token::Level => out.push_str(event.level.as_ref()),
        Token::Message => out.push_str(&event.message),
        Token::Exception => out.push_str(event.exception.as_deref().unwrap_or_default()),
        Token::TraceId => out.push_str(event.trace_id.as_deref().unwrap_or_default()),
        Token::SpanId => out.push_str(event.span_id.as_deref().unwrap_or_default()),
        Token::NewLine => out.push('\n'),
        Token::Properties => {
            out.push('{');
            for (i, (name, value)) in display_properties(event).enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(name);
                out.push_str(": ");
                write_value(value, out);
            }
            out.push('}');
        }
        Token::Property(name) => match event
            .property(name)
            .or_else(|| event.property(&format!("{CONTEXT_PROPERTY_PREFIX}{name}")))
        {
            Some(value) => write_value(value, out),
            None => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        },
    }
    Ok(())
}

/// Event properties under the names shown to readers, context prefix removed.
fn display_properties(event: &LogEvent) -> impl Iterator<Item = (&str, &PropertyValue)> {
    event.properties.iter().filter_map(|(name, value)| {
        context_key(name)
            .or_else(|| ordinary_key(name))
            .map(|display| (display, value))
    })
}

fn write_value(value: &PropertyValue, out: &mut String) {
    match value {
        PropertyValue::Scalar(scalar) => {
            let _ = write!(out, "{scalar}");
        }
        PropertyValue::Sequence(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(item, out);
            }
            out.push(']');
        }
        PropertyValue::Dictionary(entries) => {
            out.push('{');
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{key}: ");
                write_value(item, out);
            }
            out.push('}');
        }
        PropertyValue::Structure(structure) => {
            if let Some(tag) = &structure.type_tag {
                out.push_str(tag);
                out.push(' ');
            }
            out.push('{');
            for (i, (name, item)) in structure.fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(name);
                out.push_str(": ");
                write_value(item, out);
            }
            out.push('}');
        }
    }
}

/// Renders each event as a single JSON object.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonFormatter;

impl TextFormatter for JsonFormatter {
    fn format(&self, event: &LogEvent, out: &mut String) -> Result<(), FormatError> {
        let mut object = Map::new();
        object.insert(
            "Timestamp".to_string(),
            json!(event.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        );
        object.insert("Level".to_string(), json!(event.level.as_ref()));
        object.insert("Message".to_string(), json!(event.message));
        if let Some(exception) = &event.exception {
            object.insert("Exception".to_string(), json!(exception));
        }
        if let Some(trace_id) = &event.trace_id {
            object.insert("TraceId".to_string(), json!(trace_id));
        }
        if let Some(span_id) = &event.span_id {
            object.insert("SpanId".to_string(), json!(span_id));
        }
        if !event.properties.is_empty() {
            let properties = display_properties(event)
                .map(|(name, value)| (name.to_string(), to_json(value)))
                .collect::<Map<_, _>>();
            object.insert("Properties".to_string(), Value::Object(properties));
        }
        out.push_str(&serde_json::to_string(&Value::Object(object))?);
        Ok(())
    }

    fn content_type(&self) -> Option<&str> {
        Some("application/json")
    }
}

fn scalar_to_json(scalar: &Scalar) -> Value {
    match scalar {
        Scalar::Null => Value::Null,
        Scalar::Bool(b) => json!(b),
        Scalar::I64(n) => json!(n),
        Scalar::U64(n) => json!(n),
        Scalar::F64(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
        Scalar::String(s) | Scalar::Enum(s) => json!(s),
        Scalar::Timestamp(ts) => json!(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
    }
}

fn to_json(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Scalar(scalar) => scalar_to_json(scalar),
        PropertyValue::Sequence(items) => Value::Array(items.iter().map(to_json).collect()),
        PropertyValue::Dictionary(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, item)| (key.to_string(), to_json(item)))
                .collect(),
        ),
        PropertyValue::Structure(structure) => {
            let mut object = Map::new();
            if let Some(tag) = &structure.type_tag {
                object.insert("$type".to_string(), json!(tag));
            }
            for (name, item) in &structure.fields {
                object.insert(name.clone(), to_json(item));
            }
            Value::Object(object)
        }
    }
}
