//! # EventStream Sink
//!
//! Renders structured log events and ships them to an event-streaming
//! ingestion endpoint, either one request per event or in periodic batches.
//!
//! ## Architecture
//!
//! - [`event`]: log events and their structured property values
//! - [`formatter`]: text and JSON body formatters
//! - [`render`]: event to outgoing message, with metadata and flattened properties
//! - [`flatten`]: projection of structured properties onto flat metadata keys
//! - [`context`]: scoped context properties carried alongside events
//! - [`transport`]: the ingestion client seam and its HTTP implementation
//! - [`sink`]: single-event delivery
//! - [`batching`]: batch delivery under one shared batch key
//! - [`batcher`]: periodic scheduler that feeds a batched sink
//! - [`config`]: environment-driven configuration
//! - [`logger`]: self-log line format

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod batcher;
pub mod batching;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod flatten;
pub mod formatter;
pub mod logger;
pub mod message;
pub mod render;
pub mod sink;
pub mod transport;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test_support;

pub use batcher::{BatcherHandle, BatcherOptions, PeriodicBatcher};
pub use batching::{BatchedSink, BatchingEventStreamSink, BatchingSinkOptions};
pub use config::SinkConfig;
pub use context::LogContext;
pub use diagnostics::SinkDiagnostics;
pub use error::{SinkError, TransportError};
pub use event::{Level, LogEvent, PropertyValue, Scalar, Structure};
pub use message::{MessageValue, OutgoingMessage};
pub use sink::{BlockingEventStreamSink, EventStreamSink, SinkOptions};
pub use transport::{HttpIngestionClient, IngestionClient};
