// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::batcher::{BatcherOptions, DEFAULT_PERIOD, DEFAULT_QUEUE_LIMIT, DEFAULT_RETRY_LIMIT};
use crate::batching::{BatchingSinkOptions, DEFAULT_BATCH_SIZE_LIMIT};
use crate::error::SinkError;
use crate::event::Level;
use crate::formatter::{JsonFormatter, TemplateFormatter, TextFormatter, DEFAULT_OUTPUT_TEMPLATE};
use crate::sink::SinkOptions;
use crate::transport::{HttpIngestionClient, DEFAULT_REQUEST_TIMEOUT};

/// How the message body is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(SinkError::Config(format!(
                "Invalid format '{other}'. Must be one of: text, json"
            ))),
        }
    }
}

/// Whether events go through the periodic batcher or one request each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Batched,
    Single,
}

impl FromStr for DeliveryMode {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "batched" => Ok(DeliveryMode::Batched),
            "single" => Ok(DeliveryMode::Single),
            other => Err(SinkError::Config(format!(
                "Invalid mode '{other}'. Must be one of: batched, single"
            ))),
        }
    }
}

/// Configuration for the sinks and the forwarder
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// `Endpoint=..;SharedAccessKeyName=..;SharedAccessKey=..[;EntityPath=..]`
    pub connection_string: Option<String>,
    /// Entity name, when the connection string has no `EntityPath`
    pub entity_path: Option<String>,
    pub output_template: String,
    pub format: OutputFormat,
    /// Overrides the formatter's content type
    pub content_type: Option<String>,
    pub include_properties: bool,
    /// Events below this level are filtered out before reaching a sink
    pub min_level: Level,
    pub mode: DeliveryMode,
    pub batch_size_limit: usize,
    pub period: Duration,
    pub queue_limit: usize,
    pub eagerly_emit_first_event: bool,
    pub retry_limit: u32,
    pub request_timeout: Duration,
    /// Self-log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Context properties attached to every forwarded event
    pub context: Vec<(String, String)>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            entity_path: None,
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            format: OutputFormat::Text,
            content_type: None,
            include_properties: false,
            min_level: Level::Trace,
            mode: DeliveryMode::Batched,
            batch_size_limit: DEFAULT_BATCH_SIZE_LIMIT,
            period: DEFAULT_PERIOD,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            eagerly_emit_first_event: true,
            retry_limit: DEFAULT_RETRY_LIMIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            log_level: "info".to_string(),
            context: Vec::new(),
        }
    }
}

impl SinkConfig {
    /// Create configuration from `EVENTSTREAM_*` environment variables
    pub fn from_env() -> Result<Self, SinkError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SinkError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|val| !val.trim().is_empty());

        let connection_string = var("EVENTSTREAM_CONNECTION_STRING");
        let entity_path = var("EVENTSTREAM_ENTITY_PATH");
        let output_template =
            var("EVENTSTREAM_OUTPUT_TEMPLATE").unwrap_or(defaults.output_template);
        let format = var("EVENTSTREAM_FORMAT")
            .map(|val| val.parse())
            .transpose()?
            .unwrap_or(defaults.format);
        let content_type = var("EVENTSTREAM_CONTENT_TYPE");
        let include_properties = var("EVENTSTREAM_INCLUDE_PROPERTIES")
            .map(|val| parse_bool("EVENTSTREAM_INCLUDE_PROPERTIES", &val))
            .transpose()?
            .unwrap_or(defaults.include_properties);
        let min_level = var("EVENTSTREAM_MIN_LEVEL")
            .map(|val| {
                val.parse::<Level>()
                    .map_err(|e| SinkError::Config(format!("EVENTSTREAM_MIN_LEVEL: {e}")))
            })
            .transpose()?
            .unwrap_or(defaults.min_level);
        let mode = var("EVENTSTREAM_MODE")
            .map(|val| val.parse())
            .transpose()?
            .unwrap_or(defaults.mode);
        let batch_size_limit = var("EVENTSTREAM_BATCH_SIZE")
            .map(|val| parse_number("EVENTSTREAM_BATCH_SIZE", &val))
            .transpose()?
            .unwrap_or(defaults.batch_size_limit);
        let period = var("EVENTSTREAM_PERIOD_MS")
            .map(|val| parse_number("EVENTSTREAM_PERIOD_MS", &val).map(Duration::from_millis))
            .transpose()?
            .unwrap_or(defaults.period);
        let queue_limit = var("EVENTSTREAM_QUEUE_LIMIT")
            .map(|val| parse_number("EVENTSTREAM_QUEUE_LIMIT", &val))
            .transpose()?
            .unwrap_or(defaults.queue_limit);
        let eagerly_emit_first_event = var("EVENTSTREAM_EAGER_FIRST_EVENT")
            .map(|val| parse_bool("EVENTSTREAM_EAGER_FIRST_EVENT", &val))
            .transpose()?
            .unwrap_or(defaults.eagerly_emit_first_event);
        let retry_limit = var("EVENTSTREAM_RETRY_LIMIT")
            .map(|val| parse_number("EVENTSTREAM_RETRY_LIMIT", &val))
            .transpose()?
            .unwrap_or(defaults.retry_limit);
        let request_timeout = var("EVENTSTREAM_TIMEOUT_SECS")
            .map(|val| parse_number("EVENTSTREAM_TIMEOUT_SECS", &val).map(Duration::from_secs))
            .transpose()?
            .unwrap_or(defaults.request_timeout);
        let log_level = var("EVENTSTREAM_LOG_LEVEL")
            .map(|val| val.trim().to_lowercase())
            .unwrap_or(defaults.log_level);
        let context = var("EVENTSTREAM_CONTEXT")
            .map(|val| parse_context(&val))
            .transpose()?
            .unwrap_or_default();

        let config = Self {
            connection_string,
            entity_path,
            output_template,
            format,
            content_type,
            include_properties,
            min_level,
            mode,
            batch_size_limit,
            period,
            queue_limit,
            eagerly_emit_first_event,
            retry_limit,
            request_timeout,
            log_level,
            context,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SinkError> {
        if self
            .connection_string
            .as_deref()
            .map_or(true, |cs| cs.trim().is_empty())
        {
            return Err(SinkError::Config(
                "EVENTSTREAM_CONNECTION_STRING is required".to_string(),
            ));
        }

        self.batcher_options().validate()?;

        if self.request_timeout.is_zero() {
            return Err(SinkError::Config(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(SinkError::Config(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Builds the configured formatter. Template errors surface here.
    pub fn formatter(&self) -> Result<Arc<dyn TextFormatter>, SinkError> {
        Ok(match self.format {
            OutputFormat::Text => Arc::new(TemplateFormatter::new(&self.output_template)?),
            OutputFormat::Json => Arc::new(JsonFormatter),
        })
    }

    /// Explicit content type, or the formatter's own when none is set.
    #[must_use]
    pub fn sink_options(&self, formatter: &dyn TextFormatter) -> SinkOptions {
        SinkOptions {
            content_type: self
                .content_type
                .clone()
                .or_else(|| formatter.content_type().map(str::to_string)),
            include_properties: self.include_properties,
        }
    }

    #[must_use]
    pub fn batching_sink_options(&self, formatter: &dyn TextFormatter) -> BatchingSinkOptions {
        BatchingSinkOptions {
            sink: self.sink_options(formatter),
            batch_size_limit: self.batch_size_limit,
        }
    }

    #[must_use]
    pub fn batcher_options(&self) -> BatcherOptions {
        BatcherOptions {
            batch_size_limit: self.batch_size_limit,
            period: self.period,
            queue_limit: self.queue_limit,
            eagerly_emit_first_event: self.eagerly_emit_first_event,
            retry_limit: self.retry_limit,
        }
    }

    pub fn ingestion_client(&self) -> Result<HttpIngestionClient, SinkError> {
        let connection_string = self.connection_string.as_deref().ok_or_else(|| {
            SinkError::Config("EVENTSTREAM_CONNECTION_STRING is required".to_string())
        })?;
        HttpIngestionClient::from_connection_string(
            connection_string,
            self.entity_path.as_deref(),
            self.request_timeout,
        )
    }
}

fn parse_bool(key: &str, val: &str) -> Result<bool, SinkError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(SinkError::Config(format!(
            "{key} must be true or false, got '{val}'"
        ))),
    }
}

fn parse_number<T: FromStr>(key: &str, val: &str) -> Result<T, SinkError> {
    val.trim()
        .parse::<T>()
        .map_err(|_| SinkError::Config(format!("{key} must be a non-negative integer, got '{val}'")))
}

/// Parses `name=value,name=value`.
fn parse_context(val: &str) -> Result<Vec<(String, String)>, SinkError> {
    val.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                .filter(|(name, _)| !name.is_empty())
                .ok_or_else(|| {
                    SinkError::Config(format!(
                        "EVENTSTREAM_CONTEXT entries must look like name=value, got '{pair}'"
                    ))
                })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const CONNECTION_STRING: &str =
        "Endpoint=sb://logs.example.net/;SharedAccessKeyName=send;SharedAccessKey=c2VjcmV0;EntityPath=app-logs";

    fn load(vars: &[(&str, &str)]) -> Result<SinkConfig, SinkError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        SinkConfig::from_lookup(|key| vars.get(key).cloned())
    }

    fn valid() -> SinkConfig {
        SinkConfig {
            connection_string: Some(CONNECTION_STRING.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("EVENTSTREAM_CONNECTION_STRING", CONNECTION_STRING)]).unwrap();
        assert_eq!(config.format, OutputFormat::Text);
        assert_eq!(config.mode, DeliveryMode::Batched);
        assert_eq!(config.batch_size_limit, 50);
        assert_eq!(config.period, Duration::from_secs(2));
        assert_eq!(config.queue_limit, 10_000);
        assert!(config.eagerly_emit_first_event);
        assert!(!config.include_properties);
        assert_eq!(config.min_level, Level::Trace);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.log_level, "info");
        assert!(config.context.is_empty());
    }

    #[test]
    fn test_connection_string_required() {
        assert!(SinkConfig::default().validate().is_err());
        assert!(matches!(load(&[]), Err(SinkError::Config(_))));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("EVENTSTREAM_CONNECTION_STRING", CONNECTION_STRING),
            ("EVENTSTREAM_FORMAT", "JSON"),
            ("EVENTSTREAM_MODE", "single"),
            ("EVENTSTREAM_BATCH_SIZE", "100"),
            ("EVENTSTREAM_PERIOD_MS", "500"),
            ("EVENTSTREAM_INCLUDE_PROPERTIES", "true"),
            ("EVENTSTREAM_EAGER_FIRST_EVENT", "false"),
            ("EVENTSTREAM_MIN_LEVEL", "warning"),
            ("EVENTSTREAM_LOG_LEVEL", "DEBUG"),
            ("EVENTSTREAM_CONTEXT", "Service=checkout, Region=eu-west"),
        ])
        .unwrap();
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.mode, DeliveryMode::Single);
        assert_eq!(config.batch_size_limit, 100);
        assert_eq!(config.period, Duration::from_millis(500));
        assert!(config.include_properties);
        assert!(!config.eagerly_emit_first_event);
        assert_eq!(config.min_level, Level::Warn);
        assert_eq!(config.log_level, "debug");
        assert_eq!(
            config.context,
            vec![
                ("Service".to_string(), "checkout".to_string()),
                ("Region".to_string(), "eu-west".to_string()),
            ]
        );
    }

    #[test]
    fn test_batch_size_bounds() {
        for rejected in ["0", "101"] {
            let result = load(&[
                ("EVENTSTREAM_CONNECTION_STRING", CONNECTION_STRING),
                ("EVENTSTREAM_BATCH_SIZE", rejected),
            ]);
            assert!(result.is_err(), "batch size {rejected} should be rejected");
        }
        for accepted in ["1", "100"] {
            let result = load(&[
                ("EVENTSTREAM_CONNECTION_STRING", CONNECTION_STRING),
                ("EVENTSTREAM_BATCH_SIZE", accepted),
            ]);
            assert!(result.is_ok(), "batch size {accepted} should be accepted");
        }
    }

    #[test]
    fn test_unparseable_values_rejected() {
        for (key, val) in [
            ("EVENTSTREAM_BATCH_SIZE", "fifty"),
            ("EVENTSTREAM_FORMAT", "xml"),
            ("EVENTSTREAM_MODE", "sometimes"),
            ("EVENTSTREAM_INCLUDE_PROPERTIES", "maybe"),
            ("EVENTSTREAM_MIN_LEVEL", "loud"),
            ("EVENTSTREAM_CONTEXT", "novalue"),
        ] {
            let result = load(&[("EVENTSTREAM_CONNECTION_STRING", CONNECTION_STRING), (key, val)]);
            assert!(result.is_err(), "{key}={val} should be rejected");
        }
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = SinkConfig {
            log_level: "verbose".to_string(),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_period() {
        let config = SinkConfig {
            period: Duration::ZERO,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = load(&[
            ("EVENTSTREAM_CONNECTION_STRING", CONNECTION_STRING),
            ("EVENTSTREAM_CONTENT_TYPE", "  "),
            ("EVENTSTREAM_BATCH_SIZE", ""),
        ])
        .unwrap();
        assert!(config.content_type.is_none());
        assert_eq!(config.batch_size_limit, 50);
    }

    #[test]
    fn test_content_type_defaults_to_formatter_hint() {
        let config = SinkConfig {
            format: OutputFormat::Json,
            ..valid()
        };
        let formatter = config.formatter().unwrap();
        assert_eq!(
            config.sink_options(formatter.as_ref()).content_type.as_deref(),
            Some("application/json")
        );

        let config = SinkConfig {
            content_type: Some("application/x-ndjson".to_string()),
            ..config
        };
        assert_eq!(
            config.sink_options(formatter.as_ref()).content_type.as_deref(),
            Some("application/x-ndjson")
        );
    }

    #[test]
    fn test_invalid_template_surfaces_from_formatter() {
        let config = SinkConfig {
            output_template: "{Message".to_string(),
            ..valid()
        };
        assert!(matches!(config.formatter(), Err(SinkError::Render(_))));
    }

    #[test]
    fn test_ingestion_client_resolves_entity() {
        let client = valid().ingestion_client().unwrap();
        assert_eq!(client.endpoint().entity(), "app-logs");

        let mismatched = SinkConfig {
            entity_path: Some("other".to_string()),
            ..valid()
        };
        assert!(mismatched.ingestion_client().is_err());
    }
}
