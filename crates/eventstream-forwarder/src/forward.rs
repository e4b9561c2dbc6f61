// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use anyhow::Context as _;
use eventstream_sink::batcher::{BatcherHandle, PeriodicBatcher};
use eventstream_sink::batching::BatchingEventStreamSink;
use eventstream_sink::config::{DeliveryMode, SinkConfig};
use eventstream_sink::context::LogContext;
use eventstream_sink::event::LogEvent;
use eventstream_sink::sink::EventStreamSink;
use eventstream_sink::transport::IngestionClient;
use eventstream_sink::SinkDiagnostics;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::input::parse_line;

/// Where accepted events go.
pub enum Delivery {
    Single(EventStreamSink),
    Batched {
        handle: BatcherHandle,
        task: JoinHandle<()>,
    },
}

impl Delivery {
    /// Builds the sink selected by `config.mode` on top of `client`.
    pub fn from_config(
        config: &SinkConfig,
        client: Arc<dyn IngestionClient>,
        diagnostics: Arc<SinkDiagnostics>,
    ) -> anyhow::Result<Self> {
        let formatter = config.formatter().context("invalid output template")?;
        match config.mode {
            DeliveryMode::Single => Ok(Delivery::Single(EventStreamSink::with_diagnostics(
                client,
                Arc::clone(&formatter),
                config.sink_options(formatter.as_ref()),
                diagnostics,
            ))),
            DeliveryMode::Batched => {
                let sink = BatchingEventStreamSink::with_diagnostics(
                    client,
                    Arc::clone(&formatter),
                    config.batching_sink_options(formatter.as_ref()),
                    Arc::clone(&diagnostics),
                )?;
                let (batcher, handle) =
                    PeriodicBatcher::new(Arc::new(sink), config.batcher_options(), diagnostics)?;
                let task = tokio::spawn(batcher.run());
                Ok(Delivery::Batched { handle, task })
            }
        }
    }

    /// Returns `false` when a single-event send failed. Batched events are
    /// queued here; losses past this point show up in the sink diagnostics.
    async fn deliver(&self, event: LogEvent) -> bool {
        match self {
            Delivery::Single(sink) => match sink.emit(&event).await {
                Ok(()) => true,
                Err(e) => {
                    error!("Failed to send log event: {e}");
                    false
                }
            },
            Delivery::Batched { handle, .. } => {
                handle.emit(event);
                true
            }
        }
    }

    /// Flushes whatever is still buffered and waits for the batcher to stop.
    pub async fn finish(self) -> anyhow::Result<()> {
        if let Delivery::Batched { handle, task } = self {
            let flushed = handle.shutdown().await;
            task.await.context("batcher task failed")?;
            flushed.context("final flush failed")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ForwardStats {
    pub forwarded: u64,
    pub failed: u64,
    pub filtered: u64,
    pub invalid: u64,
}

/// Reads events line by line from `reader` until EOF or cancellation.
pub async fn forward<R>(
    reader: R,
    config: &SinkConfig,
    delivery: &Delivery,
    cancel: CancellationToken,
) -> anyhow::Result<ForwardStats>
where
    R: AsyncBufRead + Unpin,
{
    let context = config
        .context
        .iter()
        .fold(LogContext::new(), |context, (name, value)| {
            context.push(name, value.as_str())
        });

    let mut stats = ForwardStats::default();
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => {
                debug!("Forwarding cancelled");
                break;
            }
            line = lines.next_line() => line.context("failed to read input")?,
        };
        let Some(line) = line else {
            break;
        };

        let event = match parse_line(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                stats.invalid += 1;
                warn!("Skipping invalid input line: {e}");
                continue;
            }
        };
        if event.level < config.min_level {
            stats.filtered += 1;
            continue;
        }

        if delivery.deliver(context.enriched(event)).await {
            stats.forwarded += 1;
        } else {
            stats.failed += 1;
        }
    }
    Ok(stats)
}
