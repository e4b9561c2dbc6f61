// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Projection of structured property trees onto flat transport metadata.
//!
//! Transport metadata is a flat map of string keys to scalars, so nested
//! values are flattened lossily:
//!
//! - scalars pass through (enumeration members become their name)
//! - dictionaries and structures expand into dotted keys, `A.B.C`
//! - sequences collapse into one string, elements joined with `", "`
//! - a `KeyValuePair` structure becomes a single `key -> value` entry
//!
//! A property that cannot be converted is dropped and reported through
//! [`SinkDiagnostics`]; it never fails the message it belongs to. When two
//! properties flatten to the same key the later one wins and the overwrite is
//! reported the same way.
//!
//! The same walk serves ordinary event properties and context properties;
//! callers choose which top-level names participate, and under which key,
//! with a key transform.

use std::collections::BTreeMap;
use std::fmt;

use crate::diagnostics::SinkDiagnostics;
use crate::error::ConversionError;
use crate::event::{PropertyValue, Scalar};
use crate::message::MessageValue;

/// Intermediate form of a property: either a scalar or a nested map.
#[derive(Clone, Debug, PartialEq)]
enum Resolved {
    Value(MessageValue),
    Map(Vec<(String, Resolved)>),
}

impl fmt::Display for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Value(value) => write!(f, "{value}"),
            Resolved::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Key transform that keeps every property under its own name.
#[must_use]
pub fn keep_key(name: &str) -> Option<&str> {
    Some(name)
}

/// Flattens `entries` into `out`.
///
/// `key_transform` maps each top-level property name to the key used in the
/// output, or `None` to skip the property entirely.
pub fn flatten_properties<'a, I, F>(
    entries: I,
    key_transform: F,
    diagnostics: &SinkDiagnostics,
    out: &mut BTreeMap<String, MessageValue>,
) where
    I: IntoIterator<Item = &'a (String, PropertyValue)>,
    F: Fn(&str) -> Option<&str>,
{
    for (name, value) in entries {
        let Some(key) = key_transform(name) else {
            continue;
        };
        match resolve(value) {
            Ok(resolved) => assign(key.to_string(), resolved, diagnostics, out),
            Err(e) => diagnostics.property_dropped(name, &e),
        }
    }
}

fn resolve(value: &PropertyValue) -> Result<Resolved, ConversionError> {
    match value {
        PropertyValue::Scalar(scalar) => Ok(Resolved::Value(MessageValue::from(scalar))),
        PropertyValue::Sequence(items) => {
            let rendered = items
                .iter()
                .map(|item| resolve(item).map(|r| r.to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Resolved::Value(MessageValue::String(rendered.join(", "))))
        }
        PropertyValue::Dictionary(entries) => entries
            .iter()
            .map(|(key, value)| Ok((render_scalar_key(key)?, resolve(value)?)))
            .collect::<Result<Vec<_>, _>>()
            .map(Resolved::Map),
        PropertyValue::Structure(structure) if structure.is_key_value_pair() => {
            let [(_, key), (_, value)] = structure.fields.as_slice() else {
                return Err(ConversionError::MalformedPair(structure.fields.len()));
            };
            Ok(Resolved::Map(vec![(render_key(key)?, resolve(value)?)]))
        }
        PropertyValue::Structure(structure) => structure
            .fields
            .iter()
            .map(|(name, value)| Ok((name.clone(), resolve(value)?)))
            .collect::<Result<Vec<_>, _>>()
            .map(Resolved::Map),
    }
}

fn render_scalar_key(key: &Scalar) -> Result<String, ConversionError> {
    if key.is_null() {
        return Err(ConversionError::NullKey);
    }
    Ok(key.to_string())
}

fn render_key(key: &PropertyValue) -> Result<String, ConversionError> {
    match key {
        PropertyValue::Scalar(scalar) => render_scalar_key(scalar),
        other => Ok(resolve(other)?.to_string()),
    }
}

fn assign(
    key: String,
    resolved: Resolved,
    diagnostics: &SinkDiagnostics,
    out: &mut BTreeMap<String, MessageValue>,
) {
    match resolved {
        Resolved::Value(value) => {
            if out.contains_key(&key) {
                diagnostics.property_overwritten(&key);
            }
            out.insert(key, value);
        }
        Resolved::Map(entries) => {
            for (child, value) in entries {
                assign(format!("{key}.{child}"), value, diagnostics, out);
            }
        }
    }
}
