// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic batching scheduler.
//!
//! [`PeriodicBatcher`] is an actor: it owns the buffer and the retry state and
//! is driven by commands sent through cloneable [`BatcherHandle`]s. Producers
//! never block; when the bounded queue is full the event is dropped and
//! counted.
//!
//! ```text
//!   BatcherHandle (clone) ──emit/flush/shutdown──> PeriodicBatcher::run
//!                                                     │ buffer, timer, retries
//!                                                     v
//!                                                dyn BatchedSink
//! ```
//!
//! A flush drains the buffer in chunks of at most `batch_size_limit` events.
//! A chunk that fails stays at the head of the buffer and is retried on the
//! next tick; the tick delay doubles with every consecutive failure up to
//! [`MAX_BACKOFF`]. After `retry_limit` consecutive failures the chunk is
//! dropped. On shutdown every remaining chunk gets one last attempt and
//! whatever still fails is dropped and counted.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error};

use crate::batching::{validate_batch_size, BatchedSink, DEFAULT_BATCH_SIZE_LIMIT};
use crate::diagnostics::SinkDiagnostics;
use crate::error::SinkError;
use crate::event::LogEvent;

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_QUEUE_LIMIT: usize = 10_000;
pub const DEFAULT_RETRY_LIMIT: u32 = 5;
pub const MAX_BACKOFF: Duration = Duration::from_secs(10 * 60);

#[derive(Clone, Debug)]
pub struct BatcherOptions {
    pub batch_size_limit: usize,
    pub period: Duration,
    /// Capacity of the command queue and of the pending buffer.
    pub queue_limit: usize,
    /// Flush as soon as the first event arrives instead of waiting a period.
    pub eagerly_emit_first_event: bool,
    /// Consecutive failures after which a chunk is dropped.
    pub retry_limit: u32,
}

impl Default for BatcherOptions {
    fn default() -> Self {
        BatcherOptions {
            batch_size_limit: DEFAULT_BATCH_SIZE_LIMIT,
            period: DEFAULT_PERIOD,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            eagerly_emit_first_event: true,
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }
}

impl BatcherOptions {
    pub fn validate(&self) -> Result<(), SinkError> {
        validate_batch_size(self.batch_size_limit)?;
        if self.period.is_zero() {
            return Err(SinkError::Config("period must be greater than zero".to_string()));
        }
        if self.queue_limit == 0 {
            return Err(SinkError::Config(
                "queue limit must be greater than zero".to_string(),
            ));
        }
        if self.retry_limit == 0 {
            return Err(SinkError::Config(
                "retry limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum BatcherCommand {
    Emit(LogEvent),
    Flush(oneshot::Sender<Result<(), SinkError>>),
    Shutdown(oneshot::Sender<Result<(), SinkError>>),
}

/// Cloneable producer side of a [`PeriodicBatcher`].
#[derive(Clone, Debug)]
pub struct BatcherHandle {
    tx: mpsc::Sender<BatcherCommand>,
    diagnostics: Arc<SinkDiagnostics>,
}

impl BatcherHandle {
    /// Enqueues `event` without waiting. Drops it when the queue is full or
    /// the batcher has stopped.
    pub fn emit(&self, event: LogEvent) {
        match self.tx.try_send(BatcherCommand::Emit(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.diagnostics.event_dropped("queue is full"),
            Err(TrySendError::Closed(_)) => self.diagnostics.event_dropped("batcher has stopped"),
        }
    }

    /// Flushes everything buffered so far and reports the outcome.
    pub async fn flush(&self) -> Result<(), SinkError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(BatcherCommand::Flush(response_tx))
            .await
            .map_err(|_| SinkError::BatcherStopped)?;
        response_rx.await.map_err(|_| SinkError::BatcherStopped)?
    }

    /// Drains the queue, flushes once and stops the batcher.
    pub async fn shutdown(&self) -> Result<(), SinkError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(BatcherCommand::Shutdown(response_tx))
            .await
            .map_err(|_| SinkError::BatcherStopped)?;
        response_rx.await.map_err(|_| SinkError::BatcherStopped)?
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Arc<SinkDiagnostics> {
        &self.diagnostics
    }
}

pub struct PeriodicBatcher {
    sink: Arc<dyn BatchedSink>,
    options: BatcherOptions,
    rx: mpsc::Receiver<BatcherCommand>,
    buffer: VecDeque<LogEvent>,
    diagnostics: Arc<SinkDiagnostics>,
    failures: u32,
    seen_first_event: bool,
}

impl PeriodicBatcher {
    pub fn new(
        sink: Arc<dyn BatchedSink>,
        options: BatcherOptions,
        diagnostics: Arc<SinkDiagnostics>,
    ) -> Result<(Self, BatcherHandle), SinkError> {
        options.validate()?;
        let (tx, rx) = mpsc::channel(options.queue_limit);
        let handle = BatcherHandle {
            tx,
            diagnostics: Arc::clone(&diagnostics),
        };
        let batcher = PeriodicBatcher {
            sink,
            options,
            rx,
            buffer: VecDeque::new(),
            diagnostics,
            failures: 0,
            seen_first_event: false,
        };
        Ok((batcher, handle))
    }

    /// Runs until a shutdown command arrives or every handle is dropped.
    pub async fn run(mut self) {
        debug!("Periodic batcher started");
        let mut deadline = Instant::now() + self.next_delay();

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(BatcherCommand::Emit(event)) => {
                        if self.buffer_event(event) {
                            let _ = self.flush().await;
                            deadline = Instant::now() + self.next_delay();
                        }
                    }
                    Some(BatcherCommand::Flush(response_tx)) => {
                        let result = self.flush().await;
                        deadline = Instant::now() + self.next_delay();
                        let _ = response_tx.send(result);
                    }
                    Some(BatcherCommand::Shutdown(response_tx)) => {
                        let result = self.drain_and_flush().await;
                        let _ = response_tx.send(result);
                        break;
                    }
                    None => {
                        let _ = self.drain_and_flush().await;
                        break;
                    }
                },
                () = sleep_until(deadline) => {
                    let _ = self.flush().await;
                    deadline = Instant::now() + self.next_delay();
                }
            }
        }
        debug!("Periodic batcher stopped");
    }

    /// Buffers `event` and returns whether a flush is due right away.
    fn buffer_event(&mut self, event: LogEvent) -> bool {
        if self.buffer.len() >= self.options.queue_limit {
            self.diagnostics
                .event_dropped("buffer is full while delivery is failing");
            return false;
        }
        self.buffer.push_back(event);

        if !self.seen_first_event {
            self.seen_first_event = true;
            if self.options.eagerly_emit_first_event {
                return true;
            }
        }
        // While backing off, only the timer or an explicit flush retries.
        self.failures == 0 && self.buffer.len() >= self.options.batch_size_limit
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        if self.buffer.is_empty() {
            return self.sink.on_empty_batch().await;
        }

        while !self.buffer.is_empty() {
            let count = self.buffer.len().min(self.options.batch_size_limit);
            let chunk = &self.buffer.make_contiguous()[..count];

            let result = self.sink.emit_batch(chunk).await;
            match result {
                Ok(()) => {
                    self.buffer.drain(..count);
                    self.failures = 0;
                }
                Err(e) => {
                    self.failures += 1;
                    error!(
                        "Failed to emit batch of {count} log events (attempt {}): {e}",
                        self.failures
                    );
                    if self.failures >= self.options.retry_limit {
                        self.buffer.drain(..count);
                        self.diagnostics.batch_dropped(count, self.failures);
                        self.failures = 0;
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn drain_and_flush(&mut self) -> Result<(), SinkError> {
        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            match command {
                BatcherCommand::Emit(event) => {
                    self.buffer_event(event);
                }
                BatcherCommand::Flush(response_tx) | BatcherCommand::Shutdown(response_tx) => {
                    let _ = response_tx.send(Ok(()));
                }
            }
        }

        if self.buffer.is_empty() {
            return self.sink.on_empty_batch().await;
        }

        // Last pass: every chunk gets one attempt, failures are dropped.
        let mut outcome = Ok(());
        while !self.buffer.is_empty() {
            let count = self.buffer.len().min(self.options.batch_size_limit);
            let chunk = &self.buffer.make_contiguous()[..count];

            let result = self.sink.emit_batch(chunk).await;
            self.buffer.drain(..count);
            if let Err(e) = result {
                error!("Failed to emit batch of {count} log events during shutdown: {e}");
                self.diagnostics.batch_abandoned(count);
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        self.failures = 0;
        outcome
    }

    fn next_delay(&self) -> Duration {
        if self.failures == 0 {
            return self.options.period;
        }
        let factor = 1u32.checked_shl(self.failures).unwrap_or(u32::MAX);
        self.options
            .period
            .saturating_mul(factor)
            .min(MAX_BACKOFF)
            .max(self.options.period)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::Level;
    use crate::test_support::RecordingBatchedSink;
    use std::sync::atomic::Ordering;
    use tracing_test::traced_test;

    fn options() -> BatcherOptions {
        BatcherOptions {
            batch_size_limit: 3,
            period: Duration::from_secs(2),
            queue_limit: 100,
            eagerly_emit_first_event: false,
            retry_limit: 3,
        }
    }

    fn start(
        sink: &Arc<RecordingBatchedSink>,
        options: BatcherOptions,
    ) -> (BatcherHandle, tokio::task::JoinHandle<()>) {
        let (batcher, handle) = PeriodicBatcher::new(
            Arc::clone(sink) as Arc<dyn BatchedSink>,
            options,
            SinkDiagnostics::new(),
        )
        .unwrap();
        (handle, tokio::spawn(batcher.run()))
    }

    fn event(message: &str) -> LogEvent {
        LogEvent::new(Level::Info, message)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn test_options_validation() {
        assert!(BatcherOptions::default().validate().is_ok());
        for limit in [0, 101] {
            let options = BatcherOptions {
                batch_size_limit: limit,
                ..BatcherOptions::default()
            };
            assert!(matches!(options.validate(), Err(SinkError::Config(_))));
        }
        for limit in [1, 100] {
            let options = BatcherOptions {
                batch_size_limit: limit,
                ..BatcherOptions::default()
            };
            assert!(options.validate().is_ok());
        }
        let zero_period = BatcherOptions {
            period: Duration::ZERO,
            ..BatcherOptions::default()
        };
        assert!(zero_period.validate().is_err());
        let zero_queue = BatcherOptions {
            queue_limit: 0,
            ..BatcherOptions::default()
        };
        assert!(zero_queue.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_limit_triggers_flush() {
        let sink = Arc::new(RecordingBatchedSink::default());
        let (handle, _task) = start(&sink, options());

        for m in ["a", "b", "c"] {
            handle.emit(event(m));
        }
        settle().await;

        assert_eq!(sink.delivered(), vec![vec!["a", "b", "c"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_triggers_flush() {
        let sink = Arc::new(RecordingBatchedSink::default());
        let (handle, _task) = start(&sink, options());

        handle.emit(event("a"));
        handle.emit(event("b"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(sink.delivered().is_empty());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(sink.delivered(), vec![vec!["a", "b"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_tick_calls_on_empty_batch() {
        let sink = Arc::new(RecordingBatchedSink::default());
        let (_handle, _task) = start(&sink, options());

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(sink.empty_calls.load(Ordering::SeqCst), 1);
        assert!(sink.delivered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eager_first_event() {
        let sink = Arc::new(RecordingBatchedSink::default());
        let (handle, _task) = start(
            &sink,
            BatcherOptions {
                eagerly_emit_first_event: true,
                ..options()
            },
        );

        handle.emit(event("first"));
        settle().await;
        assert_eq!(sink.delivered(), vec![vec!["first"]]);

        handle.emit(event("second"));
        settle().await;
        assert_eq!(sink.delivered().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_drains_in_chunks() {
        let sink = Arc::new(RecordingBatchedSink::failing(1));
        let (handle, _task) = start(
            &sink,
            BatcherOptions {
                batch_size_limit: 2,
                ..options()
            },
        );

        // The first size-triggered flush fails, which holds further size
        // triggers back until the next explicit flush.
        for m in ["a", "b", "c", "d", "e"] {
            handle.emit(event(m));
        }
        handle.flush().await.unwrap();

        assert_eq!(sink.batch_sizes(), vec![2, 2, 1]);
        let flattened: Vec<String> = sink.delivered().into_iter().flatten().collect();
        assert_eq!(flattened, ["a", "b", "c", "d", "e"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_chunk_is_retried() {
        let sink = Arc::new(RecordingBatchedSink::failing(1));
        let (handle, _task) = start(&sink, options());

        handle.emit(event("a"));
        assert!(handle.flush().await.is_err());
        assert!(sink.delivered().is_empty());

        handle.flush().await.unwrap();
        assert_eq!(sink.delivered(), vec![vec!["a"]]);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_backoff() {
        let sink = Arc::new(RecordingBatchedSink::failing(1));
        let (handle, _task) = start(&sink, options());

        handle.emit(event("a"));
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);

        // Next attempt is scheduled 2s * 2^1 after the failure.
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(sink.delivered(), vec![vec!["a"]]);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_chunk_dropped_after_retry_limit() {
        let sink = Arc::new(RecordingBatchedSink::failing(u32::MAX));
        let (handle, _task) = start(
            &sink,
            BatcherOptions {
                retry_limit: 2,
                ..options()
            },
        );

        handle.emit(event("doomed"));
        assert!(handle.flush().await.is_err());
        assert!(handle.flush().await.is_err());
        assert_eq!(handle.diagnostics().dropped_batches(), 1);
        assert!(logs_contain("Dropping batch of 1 events after 2 failed attempts"));

        handle.flush().await.unwrap();
        assert_eq!(sink.empty_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_full_queue_drops_events() {
        let sink = Arc::new(RecordingBatchedSink::default());
        let (_batcher, handle) = PeriodicBatcher::new(
            sink,
            BatcherOptions {
                queue_limit: 2,
                ..options()
            },
            SinkDiagnostics::new(),
        )
        .unwrap();

        for m in ["a", "b", "c"] {
            handle.emit(event(m));
        }
        assert_eq!(handle.diagnostics().dropped_events(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_and_stops() {
        let sink = Arc::new(RecordingBatchedSink::default());
        let (handle, task) = start(&sink, options());

        handle.emit(event("a"));
        handle.emit(event("b"));
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(sink.delivered(), vec![vec!["a", "b"]]);
        handle.emit(event("late"));
        assert_eq!(handle.diagnostics().dropped_events(), 1);
        assert!(matches!(
            handle.flush().await,
            Err(SinkError::BatcherStopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_shutdown_counts_undelivered_events() {
        let sink = Arc::new(RecordingBatchedSink::failing(u32::MAX));
        let (handle, task) = start(
            &sink,
            BatcherOptions {
                batch_size_limit: 2,
                ..options()
            },
        );

        for m in ["a", "b", "c", "d", "e"] {
            handle.emit(event(m));
        }
        assert!(handle.shutdown().await.is_err());
        task.await.unwrap();

        assert!(sink.delivered().is_empty());
        assert_eq!(handle.diagnostics().dropped_events(), 5);
        assert_eq!(handle.diagnostics().dropped_batches(), 3);
        assert!(logs_contain("undelivered events at shutdown"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_attempts_every_chunk() {
        // fails the size-triggered flush of [a, b] and its shutdown attempt
        let sink = Arc::new(RecordingBatchedSink::failing(2));
        let (handle, task) = start(
            &sink,
            BatcherOptions {
                batch_size_limit: 2,
                ..options()
            },
        );

        for m in ["a", "b", "c", "d", "e"] {
            handle.emit(event(m));
        }
        assert!(handle.shutdown().await.is_err());
        task.await.unwrap();

        assert_eq!(sink.delivered(), vec![vec!["c", "d"], vec!["e"]]);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(handle.diagnostics().dropped_events(), 2);
        assert_eq!(handle.diagnostics().dropped_batches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_every_handle_flushes() {
        let sink = Arc::new(RecordingBatchedSink::default());
        let (handle, task) = start(&sink, options());

        handle.emit(event("a"));
        drop(handle);
        task.await.unwrap();

        assert_eq!(sink.delivered(), vec![vec!["a"]]);
    }
}
