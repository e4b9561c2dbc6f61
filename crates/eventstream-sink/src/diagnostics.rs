// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Self-log channel for failures inside the sink itself.
//!
//! Problems that must not reach the application's log call site (a property
//! that cannot be converted, an event dropped because the queue is full) are
//! reported here instead. Reports go to `tracing` under [`SELF_LOG_TARGET`]
//! so they can be routed separately from the application's own output, and
//! are counted so silent data loss stays observable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::error::ConversionError;

/// `tracing` target used for every self-log report.
pub const SELF_LOG_TARGET: &str = "eventstream_sink::selflog";

/// Counters shared between a sink, its renderer and its batcher.
#[derive(Debug, Default)]
pub struct SinkDiagnostics {
    dropped_properties: AtomicU64,
    dropped_events: AtomicU64,
    dropped_batches: AtomicU64,
}

impl SinkDiagnostics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A property was left off a message because it could not be converted.
    pub fn property_dropped(&self, name: &str, error: &ConversionError) {
        self.dropped_properties.fetch_add(1, Ordering::Relaxed);
        warn!(
            target: SELF_LOG_TARGET,
            property = name,
            "Unable to convert property {name} to a message property: {error}"
        );
    }

    /// A property was left off a message because its key is reserved for metadata.
    pub fn property_shadowed(&self, key: &str) {
        self.dropped_properties.fetch_add(1, Ordering::Relaxed);
        warn!(
            target: SELF_LOG_TARGET,
            property = key,
            "Property {key} collides with a reserved metadata key and was dropped"
        );
    }

    /// Two properties flattened to the same key; the earlier value was lost.
    pub fn property_overwritten(&self, key: &str) {
        self.dropped_properties.fetch_add(1, Ordering::Relaxed);
        warn!(
            target: SELF_LOG_TARGET,
            property = key,
            "Property {key} was set more than once, keeping the last value"
        );
    }

    /// An event never reached the sink.
    pub fn event_dropped(&self, reason: &str) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
        warn!(target: SELF_LOG_TARGET, "Dropped log event: {reason}");
    }

    /// A whole batch was abandoned after exhausting its retries.
    pub fn batch_dropped(&self, events: usize, attempts: u32) {
        self.dropped_batches.fetch_add(1, Ordering::Relaxed);
        self.dropped_events
            .fetch_add(events as u64, Ordering::Relaxed);
        warn!(
            target: SELF_LOG_TARGET,
            "Dropping batch of {events} events after {attempts} failed attempts"
        );
    }

    /// A batch was still undelivered when the batcher stopped.
    pub fn batch_abandoned(&self, events: usize) {
        self.dropped_batches.fetch_add(1, Ordering::Relaxed);
        self.dropped_events
            .fetch_add(events as u64, Ordering::Relaxed);
        warn!(
            target: SELF_LOG_TARGET,
            "Dropping batch of {events} undelivered events at shutdown"
        );
    }

    #[must_use]
    pub fn dropped_properties(&self) -> u64 {
        self.dropped_properties.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped_batches(&self) -> u64 {
        self.dropped_batches.load(Ordering::Relaxed)
    }
}
