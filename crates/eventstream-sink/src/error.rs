// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Errors surfaced by the sinks, the batcher and their configuration.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to render log event: {0}")]
    Render(#[from] FormatError),

    #[error("Failed to deliver messages: {0}")]
    Transport(#[from] TransportError),

    #[error("Batcher is not running")]
    BatcherStopped,
}

/// Raised by a [`crate::formatter::TextFormatter`] while rendering an event.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Invalid output template: {0}")]
    Template(String),

    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Custom(String),
}

/// Failures reported by an [`crate::transport::IngestionClient`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request to ingestion endpoint failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Ingestion endpoint responded with {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Failed to build payload: {0}")]
    Serialize(String),

    #[error("Failed to sign request: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

/// Why a single structured property could not be projected onto message metadata.
///
/// Never leaves the flattener: the property is dropped and the error goes to the self-log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("key resolved to null")]
    NullKey,

    #[error("key-value pair structure has {0} fields, expected 2")]
    MalformedPair(usize),
}
