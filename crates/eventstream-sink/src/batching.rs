// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batched delivery.
//!
//! A [`BatchedSink`] receives whole batches from a scheduler such as
//! [`crate::batcher::PeriodicBatcher`]. [`BatchingEventStreamSink`] renders
//! every event of a batch, tags all messages with one freshly generated batch
//! key and hands them to the transport in a single call. A batch is delivered
//! or fails as a unit; the scheduler owns retries.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::diagnostics::SinkDiagnostics;
use crate::error::SinkError;
use crate::event::LogEvent;
use crate::formatter::TextFormatter;
use crate::render::PayloadRenderer;
use crate::sink::SinkOptions;
use crate::transport::IngestionClient;

pub const DEFAULT_BATCH_SIZE_LIMIT: usize = 50;
pub const MAX_BATCH_SIZE_LIMIT: usize = 100;

/// Sink side of a batching scheduler.
///
/// The scheduler calls at most one method at a time per sink.
#[async_trait]
pub trait BatchedSink: Send + Sync {
    /// Delivers `events` in order as one unit.
    async fn emit_batch(&self, events: &[LogEvent]) -> Result<(), SinkError>;

    /// Called when a flush found nothing to send.
    async fn on_empty_batch(&self) -> Result<(), SinkError>;
}

#[derive(Clone, Debug)]
pub struct BatchingSinkOptions {
    pub sink: SinkOptions,
    pub batch_size_limit: usize,
}

impl Default for BatchingSinkOptions {
    fn default() -> Self {
        BatchingSinkOptions {
            sink: SinkOptions::default(),
            batch_size_limit: DEFAULT_BATCH_SIZE_LIMIT,
        }
    }
}

impl BatchingSinkOptions {
    pub fn validate(&self) -> Result<(), SinkError> {
        validate_batch_size(self.batch_size_limit)
    }
}

pub(crate) fn validate_batch_size(limit: usize) -> Result<(), SinkError> {
    if (1..=MAX_BATCH_SIZE_LIMIT).contains(&limit) {
        Ok(())
    } else {
        Err(SinkError::Config(format!(
            "batch size limit must be between 1 and {MAX_BATCH_SIZE_LIMIT}, got {limit}"
        )))
    }
}

#[derive(Clone)]
pub struct BatchingEventStreamSink {
    client: Arc<dyn IngestionClient>,
    renderer: PayloadRenderer,
    batch_size_limit: usize,
}

impl BatchingEventStreamSink {
    pub fn new(
        client: Arc<dyn IngestionClient>,
        formatter: Arc<dyn TextFormatter>,
        options: BatchingSinkOptions,
    ) -> Result<Self, SinkError> {
        Self::with_diagnostics(client, formatter, options, SinkDiagnostics::new())
    }

    pub fn with_diagnostics(
        client: Arc<dyn IngestionClient>,
        formatter: Arc<dyn TextFormatter>,
        options: BatchingSinkOptions,
        diagnostics: Arc<SinkDiagnostics>,
    ) -> Result<Self, SinkError> {
        options.validate()?;
        Ok(BatchingEventStreamSink {
            client,
            renderer: PayloadRenderer::new(
                formatter,
                options.sink.content_type,
                options.sink.include_properties,
                diagnostics,
            ),
            batch_size_limit: options.batch_size_limit,
        })
    }

    /// Largest batch a scheduler should hand to this sink.
    #[must_use]
    pub fn batch_size_limit(&self) -> usize {
        self.batch_size_limit
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Arc<SinkDiagnostics> {
        self.renderer.diagnostics()
    }
}

#[async_trait]
impl BatchedSink for BatchingEventStreamSink {
    async fn emit_batch(&self, events: &[LogEvent]) -> Result<(), SinkError> {
        if events.is_empty() {
            return Ok(());
        }

        let batch_key = Uuid::new_v4().to_string();
        let mut messages = Vec::with_capacity(events.len());
        for event in events {
            let mut message = self.renderer.render(event)?;
            message.partition_key = Some(batch_key.clone());
            messages.push(message);
        }

        let count = messages.len();
        self.client.send_batch(messages, &batch_key).await?;
        debug!("Sent batch {batch_key} with {count} log events");
        Ok(())
    }

    async fn on_empty_batch(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
