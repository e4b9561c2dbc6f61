// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sinks that deliver one event per call.
//!
//! [`EventStreamSink`] is the native form: `emit` is async and resolves once
//! the transport acknowledged the message or failed. There is no retry and no
//! buffering; a transport failure is returned to the caller.
//!
//! [`BlockingEventStreamSink`] is a compatibility shim for synchronous call
//! sites. It owns a current-thread runtime and blocks the calling thread for
//! the duration of the send. It must not be used from inside an async
//! runtime.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::diagnostics::SinkDiagnostics;
use crate::error::SinkError;
use crate::event::LogEvent;
use crate::formatter::TextFormatter;
use crate::render::PayloadRenderer;
use crate::transport::IngestionClient;

/// Rendering options shared by every sink flavour.
#[derive(Clone, Debug, Default)]
pub struct SinkOptions {
    /// Applied to each message when not blank.
    pub content_type: Option<String>,
    /// Map ordinary event properties onto message metadata. Leave off when
    /// the formatter already writes properties into the body.
    pub include_properties: bool,
}

#[derive(Clone)]
pub struct EventStreamSink {
    client: Arc<dyn IngestionClient>,
    renderer: PayloadRenderer,
}

impl EventStreamSink {
    #[must_use]
    pub fn new(
        client: Arc<dyn IngestionClient>,
        formatter: Arc<dyn TextFormatter>,
        options: SinkOptions,
    ) -> Self {
        Self::with_diagnostics(client, formatter, options, SinkDiagnostics::new())
    }

    #[must_use]
    pub fn with_diagnostics(
        client: Arc<dyn IngestionClient>,
        formatter: Arc<dyn TextFormatter>,
        options: SinkOptions,
        diagnostics: Arc<SinkDiagnostics>,
    ) -> Self {
        EventStreamSink {
            client,
            renderer: PayloadRenderer::new(
                formatter,
                options.content_type,
                options.include_properties,
                diagnostics,
            ),
        }
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Arc<SinkDiagnostics> {
        self.renderer.diagnostics()
    }

    /// Renders `event` and sends it under a fresh partition key.
    pub async fn emit(&self, event: &LogEvent) -> Result<(), SinkError> {
        let mut message = self.renderer.render(event)?;
        let partition_key = Uuid::new_v4().to_string();
        message.partition_key = Some(partition_key.clone());

        self.client.send(message, &partition_key).await?;
        debug!("Sent log event with partition key {partition_key}");
        Ok(())
    }
}

pub struct BlockingEventStreamSink {
    inner: EventStreamSink,
    runtime: tokio::runtime::Runtime,
}

impl BlockingEventStreamSink {
    pub fn new(inner: EventStreamSink) -> Result<Self, SinkError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SinkError::Config(format!("unable to build runtime: {e}")))?;
        Ok(Self { inner, runtime })
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Arc<SinkDiagnostics> {
        self.inner.diagnostics()
    }

    /// Blocks until the send completed or failed.
    ///
    /// # Panics
    ///
    /// When called from within an async runtime.
    pub fn emit(&self, event: &LogEvent) -> Result<(), SinkError> {
        self.runtime.block_on(self.inner.emit(event))
    }
}
