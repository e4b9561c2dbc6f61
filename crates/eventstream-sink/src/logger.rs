// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line format for the crate's own diagnostics.
//!
//! ```text
//! EVENTSTREAM | LEVEL | origin | [span{fields} > ...: ]message fields
//! ```
//!
//! `origin` is `selflog` for reports on
//! [`SELF_LOG_TARGET`](crate::diagnostics::SELF_LOG_TARGET), so dropped
//! properties and events can be told apart from routine progress lines, and
//! the top-level module of the event's target otherwise.
//!
//! ```rust,ignore
//! let subscriber = tracing_subscriber::FmtSubscriber::builder()
//!     .event_format(eventstream_sink::logger::Formatter)
//!     .with_writer(std::io::stderr)
//!     .finish();
//! tracing::subscriber::set_global_default(subscriber)?;
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

use crate::diagnostics::SELF_LOG_TARGET;

const SELF_LOG_ORIGIN: &str = "selflog";

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

/// Short origin column for `target`.
fn origin(target: &str) -> &str {
    if target == SELF_LOG_TARGET {
        SELF_LOG_ORIGIN
    } else {
        target.split("::").next().unwrap_or(target)
    }
}

fn write_spans<S, N>(ctx: &FmtContext<'_, S, N>, writer: &mut format::Writer<'_>) -> fmt::Result
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    let Some(scope) = ctx.event_scope() else {
        return Ok(());
    };
    for (i, span) in scope.from_root().enumerate() {
        if i > 0 {
            write!(writer, " > ")?;
        }
        write!(writer, "{}", span.name())?;
        let extensions = span.extensions();
        match extensions.get::<FormattedFields<N>>() {
            Some(fields) if !fields.is_empty() => write!(writer, "{{{fields}}}")?,
            _ => {}
        }
    }
    write!(writer, ": ")
}

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(
            writer,
            "EVENTSTREAM | {} | {} | ",
            metadata.level(),
            origin(metadata.target())
        )?;
        write_spans(ctx, &mut writer)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
