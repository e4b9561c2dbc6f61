// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory collaborators shared by the unit tests.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::batching::BatchedSink;
use crate::error::{SinkError, TransportError};
use crate::event::LogEvent;
use crate::message::OutgoingMessage;
use crate::transport::IngestionClient;

#[derive(Debug, Clone)]
pub(crate) struct SentBatch {
    pub partition_key: String,
    pub messages: Vec<OutgoingMessage>,
}

/// Records every call; optionally fails the first `fail_next` of them.
#[derive(Debug, Default)]
pub(crate) struct RecordingClient {
    pub single: Mutex<Vec<(String, OutgoingMessage)>>,
    pub batches: Mutex<Vec<SentBatch>>,
    pub fail_next: AtomicU32,
    pub delay: Option<Duration>,
}

impl RecordingClient {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn failing(times: u32) -> Self {
        Self {
            fail_next: AtomicU32::new(times),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.single.lock().unwrap().len() + self.batches.lock().unwrap().len()
    }

    async fn attempt(&self) -> Result<(), TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(TransportError::Other("endpoint unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IngestionClient for RecordingClient {
    async fn send(
        &self,
        message: OutgoingMessage,
        partition_key: &str,
    ) -> Result<(), TransportError> {
        self.attempt().await?;
        self.single
            .lock()
            .unwrap()
            .push((partition_key.to_string(), message));
        Ok(())
    }

    async fn send_batch(
        &self,
        messages: Vec<OutgoingMessage>,
        partition_key: &str,
    ) -> Result<(), TransportError> {
        self.attempt().await?;
        self.batches.lock().unwrap().push(SentBatch {
            partition_key: partition_key.to_string(),
            messages,
        });
        Ok(())
    }
}

/// Batched sink that records the messages of each delivered batch.
#[derive(Debug, Default)]
pub(crate) struct RecordingBatchedSink {
    pub delivered: Mutex<Vec<Vec<String>>>,
    pub attempts: AtomicUsize,
    pub empty_calls: AtomicUsize,
    pub fail_next: AtomicU32,
}

impl RecordingBatchedSink {
    pub fn failing(times: u32) -> Self {
        Self {
            fail_next: AtomicU32::new(times),
            ..Self::default()
        }
    }

    pub fn delivered(&self) -> Vec<Vec<String>> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.delivered().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl BatchedSink for RecordingBatchedSink {
    async fn emit_batch(&self, events: &[LogEvent]) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(TransportError::Other("endpoint unavailable".to_string()).into());
        }
        self.delivered
            .lock()
            .unwrap()
            .push(events.iter().map(|e| e.message.clone()).collect());
        Ok(())
    }

    async fn on_empty_batch(&self) -> Result<(), SinkError> {
        self.empty_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
