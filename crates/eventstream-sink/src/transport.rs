// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of rendered messages to the ingestion endpoint.
//!
//! Sinks only depend on the [`IngestionClient`] trait. The crate ships
//! [`HttpIngestionClient`], which publishes through the endpoint's REST
//! interface:
//!
//! ```text
//! POST {endpoint}/{entity}/messages
//! Content-Type: application/vnd.microsoft.servicebus.json
//! Authorization: SharedAccessSignature sr=..&sig=..&se=..&skn=..
//!
//! [{"Body": "...", "BrokerProperties": {"PartitionKey": "..."}, "UserProperties": {...}}]
//! ```
//!
//! The client performs no retries and keeps no state besides the shared
//! `reqwest::Client`; retry policy belongs to whoever drives the sink.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, error};

use crate::error::{SinkError, TransportError};
use crate::message::{MessageValue, OutgoingMessage};

pub const BATCH_CONTENT_TYPE: &str = "application/vnd.microsoft.servicebus.json";
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The destination of rendered messages.
#[async_trait]
pub trait IngestionClient: Send + Sync {
    /// Publishes one message. Resolves once the endpoint acknowledged it.
    async fn send(&self, message: OutgoingMessage, partition_key: &str)
        -> Result<(), TransportError>;

    /// Publishes `messages` in a single operation, in order.
    async fn send_batch(
        &self,
        messages: Vec<OutgoingMessage>,
        partition_key: &str,
    ) -> Result<(), TransportError>;
}

/// Parsed `Endpoint=..;SharedAccessKeyName=..;SharedAccessKey=..[;EntityPath=..]`.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub endpoint: String,
    pub key_name: String,
    pub key: String,
    pub entity_path: Option<String>,
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint)
            .field("key_name", &self.key_name)
            .field("entity_path", &self.entity_path)
            .finish_non_exhaustive()
    }
}

impl FromStr for ConnectionString {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut entity_path = None;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((name, value)) = part.split_once('=') else {
                return Err(SinkError::Config(format!(
                    "malformed connection string segment '{part}'"
                )));
            };
            let value = value.trim().to_string();
            match name.trim().to_lowercase().as_str() {
                "endpoint" => endpoint = Some(normalize_endpoint(&value)?),
                "sharedaccesskeyname" => key_name = Some(value),
                "sharedaccesskey" => key = Some(value),
                "entitypath" => entity_path = Some(value).filter(|v| !v.is_empty()),
                other => debug!("Ignoring connection string segment '{other}'"),
            }
        }

        let missing =
            |what: &str| SinkError::Config(format!("connection string is missing {what}"));
        Ok(ConnectionString {
            endpoint: endpoint.ok_or_else(|| missing("Endpoint"))?,
            key_name: key_name
                .filter(|v| !v.is_empty())
                .ok_or_else(|| missing("SharedAccessKeyName"))?,
            key: key
                .filter(|v| !v.is_empty())
                .ok_or_else(|| missing("SharedAccessKey"))?,
            entity_path,
        })
    }
}

fn normalize_endpoint(raw: &str) -> Result<String, SinkError> {
    let (scheme, rest) = if let Some(rest) = raw.strip_prefix("sb://") {
        ("https", rest)
    } else if let Some(rest) = raw.strip_prefix("https://") {
        ("https", rest)
    } else if let Some(rest) = raw.strip_prefix("http://") {
        ("http", rest)
    } else {
        return Err(SinkError::Config(format!(
            "unsupported endpoint '{raw}', expected sb://, https:// or http://"
        )));
    };
    let host = rest.trim_end_matches('/');
    if host.is_empty() {
        return Err(SinkError::Config(format!("endpoint '{raw}' has no host")));
    }
    Ok(format!("{scheme}://{host}"))
}

/// Where and as whom messages are published.
#[derive(Clone)]
pub struct IngestionEndpoint {
    base_url: String,
    entity: String,
    key_name: String,
    key: String,
    token_ttl: Duration,
}

impl std::fmt::Debug for IngestionEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionEndpoint")
            .field("base_url", &self.base_url)
            .field("entity", &self.entity)
            .field("key_name", &self.key_name)
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

impl IngestionEndpoint {
    /// Resolves the entity from the connection string's `EntityPath` and/or `entity`.
    ///
    /// Both may be given only when they agree.
    pub fn from_connection_string(
        connection_string: &str,
        entity: Option<&str>,
    ) -> Result<Self, SinkError> {
        let parsed = ConnectionString::from_str(connection_string)?;
        let entity = entity.map(str::trim).filter(|e| !e.is_empty());
        let entity = match (parsed.entity_path.as_deref(), entity) {
            (Some(path), Some(requested)) if path != requested => {
                return Err(SinkError::Config(format!(
                    "connection string targets entity '{path}' but '{requested}' was requested"
                )));
            }
            (Some(path), _) => path.to_string(),
            (None, Some(requested)) => requested.to_string(),
            (None, None) => {
                return Err(SinkError::Config(
                    "no entity name given and connection string has no EntityPath".to_string(),
                ));
            }
        };
        Ok(IngestionEndpoint {
            base_url: parsed.endpoint,
            entity,
            key_name: parsed.key_name,
            key: parsed.key,
            token_ttl: DEFAULT_TOKEN_TTL,
        })
    }

    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    #[must_use]
    pub fn resource_uri(&self) -> String {
        format!("{}/{}", self.base_url, self.entity)
    }

    #[must_use]
    pub fn messages_url(&self) -> String {
        format!("{}/messages", self.resource_uri())
    }

    /// Signs a fresh token valid for the configured TTL.
    pub fn authorization(&self) -> Result<String, TransportError> {
        let ttl = i64::try_from(self.token_ttl.as_secs()).unwrap_or(i64::from(u32::MAX));
        let expiry = Utc::now().timestamp().saturating_add(ttl);
        shared_access_signature(&self.resource_uri(), &self.key_name, &self.key, expiry)
    }
}

/// Builds `SharedAccessSignature sr=..&sig=..&se=..&skn=..` for `resource_uri`.
///
/// The signature is HMAC-SHA256, keyed with the raw key text, over the
/// url-encoded resource and the expiry separated by a newline.
pub fn shared_access_signature(
    resource_uri: &str,
    key_name: &str,
    key: &str,
    expiry_unix_secs: i64,
) -> Result<String, TransportError> {
    let encoded_resource = urlencoding::encode(&resource_uri.to_lowercase()).into_owned();
    let string_to_sign = format!("{encoded_resource}\n{expiry_unix_secs}");

    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .map_err(|e| TransportError::Auth(format!("Failed to create HMAC: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    Ok(format!(
        "SharedAccessSignature sr={encoded_resource}&sig={}&se={expiry_unix_secs}&skn={}",
        urlencoding::encode(&signature),
        urlencoding::encode(key_name)
    ))
}

#[derive(Serialize)]
struct BrokerProperties<'a> {
    #[serde(rename = "PartitionKey")]
    partition_key: &'a str,
    #[serde(rename = "ContentType", skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    #[serde(rename = "Body")]
    body: String,
    #[serde(rename = "BrokerProperties")]
    broker_properties: BrokerProperties<'a>,
    #[serde(rename = "UserProperties")]
    user_properties: &'a BTreeMap<String, MessageValue>,
}

/// Encodes `messages` as the JSON array accepted by the batch publish API.
pub fn encode_batch(
    messages: &[OutgoingMessage],
    default_partition_key: &str,
) -> Result<Vec<u8>, TransportError> {
    let wire = messages
        .iter()
        .map(|message| WireMessage {
            body: message.body_text().into_owned(),
            broker_properties: BrokerProperties {
                partition_key: message
                    .partition_key
                    .as_deref()
                    .unwrap_or(default_partition_key),
                content_type: message.content_type.as_deref(),
            },
            user_properties: &message.properties,
        })
        .collect::<Vec<_>>();
    serde_json::to_vec(&wire).map_err(|e| TransportError::Serialize(e.to_string()))
}

/// [`IngestionClient`] over HTTP.
#[derive(Clone, Debug)]
pub struct HttpIngestionClient {
    client: reqwest::Client,
    endpoint: IngestionEndpoint,
}

impl HttpIngestionClient {
    /// Wraps an existing client handle.
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: IngestionEndpoint) -> Self {
        HttpIngestionClient { client, endpoint }
    }

    pub fn from_connection_string(
        connection_string: &str,
        entity: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let endpoint = IngestionEndpoint::from_connection_string(connection_string, entity)?;
        Ok(Self::new(build_client(timeout)?, endpoint))
    }

    #[must_use]
    pub fn endpoint(&self) -> &IngestionEndpoint {
        &self.endpoint
    }

    async fn publish(
        &self,
        messages: &[OutgoingMessage],
        partition_key: &str,
    ) -> Result<(), TransportError> {
        let body = encode_batch(messages, partition_key)?;
        let authorization = self.endpoint.authorization()?;

        let response = self
            .client
            .post(self.endpoint.messages_url())
            .header(reqwest::header::CONTENT_TYPE, BATCH_CONTENT_TYPE)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(
                "Published {} messages to {}",
                messages.len(),
                self.endpoint.entity()
            );
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        error!("{status}: Failed to publish to {}: {body}", self.endpoint.entity());
        Err(TransportError::Status { status, body })
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, SinkError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)))
        .build()
        .map_err(|e| SinkError::Config(format!("unable to build HTTP client: {e}")))
}

#[async_trait]
impl IngestionClient for HttpIngestionClient {
    async fn send(
        &self,
        message: OutgoingMessage,
        partition_key: &str,
    ) -> Result<(), TransportError> {
        self.publish(std::slice::from_ref(&message), partition_key)
            .await
    }

    async fn send_batch(
        &self,
        messages: Vec<OutgoingMessage>,
        partition_key: &str,
    ) -> Result<(), TransportError> {
        self.publish(&messages, partition_key).await
    }
}
