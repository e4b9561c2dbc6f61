// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod forward;
mod input;

use std::{env, process::ExitCode, sync::Arc};

use anyhow::Context as _;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use eventstream_sink::{config::SinkConfig, logger, SinkDiagnostics};

use crate::forward::{forward, Delivery};

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("EVENTSTREAM_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");
    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("could not parse log level in configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .event_format(logger::Formatter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = SinkConfig::from_env().context("invalid configuration")?;
    let client = config
        .ingestion_client()
        .context("unable to create ingestion client")?;
    info!(
        "Forwarding log events to {} in {:?} mode",
        client.endpoint().entity(),
        config.mode
    );

    let diagnostics = SinkDiagnostics::new();
    let delivery = Delivery::from_config(&config, Arc::new(client), Arc::clone(&diagnostics))?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, flushing and shutting down");
            signal_cancel.cancel();
        }
    });

    let stats = forward(BufReader::new(tokio::io::stdin()), &config, &delivery, cancel).await;
    let finished = delivery.finish().await;

    let stats = stats?;
    info!(
        forwarded = stats.forwarded,
        failed = stats.failed,
        filtered = stats.filtered,
        invalid = stats.invalid,
        dropped_events = diagnostics.dropped_events(),
        dropped_properties = diagnostics.dropped_properties(),
        "Forwarder stopped"
    );
    finished
}
