// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Explicit carrier for contextual message properties.
//!
//! A [`LogContext`] is an immutable stack of properties. [`LogContext::push`]
//! returns a child context that the caller passes down the call chain; the
//! parent is never modified, so the property is visible only to code holding
//! the child and disappears with it on every exit path. Concurrent flows
//! holding different contexts never see each other's properties.
//!
//! [`LogContext::enrich`] copies the properties into an event under
//! [`CONTEXT_PROPERTY_PREFIX`]; the renderer later strips the prefix and always
//! maps them onto the outgoing message, independent of whether ordinary
//! properties are included.
//!
//! ```rust
//! use eventstream_sink::context::LogContext;
//! use eventstream_sink::event::{Level, LogEvent};
//!
//! let root = LogContext::new();
//! let tenant = root.push("Tenant", "acme");
//! let event = tenant.enriched(LogEvent::new(Level::Info, "order placed"));
//! assert!(event.property("EventStream.Tenant").is_some());
//! assert!(root.is_empty());
//! ```

use std::sync::Arc;

use crate::event::{LogEvent, PropertyValue};

/// Reserved name prefix marking an event property as a context property.
pub const CONTEXT_PROPERTY_PREFIX: &str = "EventStream.";

#[derive(Debug)]
struct Frame {
    name: String,
    value: PropertyValue,
    parent: Option<Arc<Frame>>,
}

/// Persistent stack of context properties.
///
/// Cloning is cheap and shares the immutable frames; pushing onto a clone
/// never affects the original.
#[derive(Clone, Debug, Default)]
pub struct LogContext {
    head: Option<Arc<Frame>>,
}

impl LogContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a child context carrying `name` on top of this one.
    ///
    /// A push with a name already present shadows the outer value for the
    /// child only.
    #[must_use = "the property is only carried by the returned context"]
    pub fn push(&self, name: &str, value: impl Into<PropertyValue>) -> LogContext {
        LogContext {
            head: Some(Arc::new(Frame {
                name: name.to_string(),
                value: value.into(),
                parent: self.head.clone(),
            })),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames().count()
    }

    /// Copies every property into `event` under the reserved prefix.
    pub fn enrich(&self, event: &mut LogEvent) {
        // outermost first so inner pushes overwrite
        let frames: Vec<&Frame> = self.frames().collect();
        for frame in frames.into_iter().rev() {
            event.set_property(
                &format!("{CONTEXT_PROPERTY_PREFIX}{}", frame.name),
                frame.value.clone(),
            );
        }
    }

    #[must_use]
    pub fn enriched(&self, mut event: LogEvent) -> LogEvent {
        self.enrich(&mut event);
        event
    }

    fn frames(&self) -> impl Iterator<Item = &Frame> {
        std::iter::successors(self.head.as_deref(), |frame| frame.parent.as_deref())
    }
}

impl Drop for LogContext {
    // Unlinks the uniquely owned tail iteratively so long chains cannot
    // overflow the stack through recursive drops.
    fn drop(&mut self) {
        let mut next = self.head.take();
        while let Some(frame) = next {
            match Arc::try_unwrap(frame) {
                Ok(mut frame) => next = frame.parent.take(),
                Err(_) => break,
            }
        }
    }
}

/// Key transform selecting context properties, with the prefix removed.
#[must_use]
pub fn context_key(name: &str) -> Option<&str> {
    name.strip_prefix(CONTEXT_PROPERTY_PREFIX)
        .filter(|stripped| !stripped.is_empty())
}

/// Key transform selecting ordinary properties, leaving context ones out.
#[must_use]
pub fn ordinary_key(name: &str) -> Option<&str> {
    if name.starts_with(CONTEXT_PROPERTY_PREFIX) {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::Level;

    #[test]
    fn test_child_carries_property_and_parent_stays_clean() {
        let root = LogContext::new();
        {
            let request = root.push("RequestId", "r-1");
            let event = request.enriched(LogEvent::new(Level::Info, "m"));
            assert_eq!(
                event.property("EventStream.RequestId"),
                Some(&PropertyValue::from("r-1"))
            );
        }
        assert!(root.is_empty());
        let event = root.enriched(LogEvent::new(Level::Info, "m"));
        assert!(event.properties.is_empty());
    }

    #[test]
    fn test_inner_push_shadows_outer() {
        let outer = LogContext::new().push("Stage", "outer");
        let inner = outer.push("Stage", "inner");

        let event = inner.enriched(LogEvent::new(Level::Info, "m"));
        assert_eq!(
            event.property("EventStream.Stage"),
            Some(&PropertyValue::from("inner"))
        );
        assert_eq!(event.properties.len(), 1);

        let event = outer.enriched(LogEvent::new(Level::Info, "m"));
        assert_eq!(
            event.property("EventStream.Stage"),
            Some(&PropertyValue::from("outer"))
        );
    }

    #[test]
    fn test_property_released_on_early_return() {
        fn failing_step(context: &LogContext) -> Result<(), String> {
            let _step = context.push("Step", "parse");
            Err("parse failed".to_string())
        }

        let context = LogContext::new();
        assert!(failing_step(&context).is_err());
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_flows_are_isolated() {
        let root = LogContext::new().push("Service", "checkout");

        let flow_a = root.push("RequestId", "request-A");
        let flow_b = root.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { flow_a.enriched(LogEvent::new(Level::Info, "a")) }),
            tokio::spawn(async move { flow_b.enriched(LogEvent::new(Level::Info, "b")) }),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(
            a.property("EventStream.RequestId"),
            Some(&PropertyValue::from("request-A"))
        );
        assert!(b.property("EventStream.RequestId").is_none());
        assert_eq!(
            b.property("EventStream.Service"),
            Some(&PropertyValue::from("checkout"))
        );
        assert_eq!(root.len(), 1);
    }

    #[test]
    fn test_deep_chain_drops() {
        let mut context = LogContext::new();
        for i in 0..100_000 {
            context = context.push("Depth", i);
        }
        assert_eq!(context.len(), 100_000);
        drop(context);
    }

    #[test]
    fn test_key_transforms() {
        assert_eq!(context_key("EventStream.Tenant"), Some("Tenant"));
        assert_eq!(context_key("EventStream."), None);
        assert_eq!(context_key("Tenant"), None);
        assert_eq!(ordinary_key("Tenant"), Some("Tenant"));
        assert_eq!(ordinary_key("EventStream.Tenant"), None);
    }
}
