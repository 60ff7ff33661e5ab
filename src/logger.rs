use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{
    FmtContext, FormattedFields,
    format::{self, FormatEvent, FormatFields},
};
use tracing_subscriber::registry::LookupSpan;

use crate::config::log_level::LogLevel;

const LOG_FILTER_ENV: &str = "NEW_RELIC_LOG_FILTER";

/// Prefixes every line with `NR_TRACING` so agent output can be told apart
/// from the application's own logs.
///
/// ```text
/// NR_TRACING | DEBUG | accept{transport=HTTP}: Rejected traceparent header=abc
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

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
        write!(&mut writer, "NR_TRACING | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

#[derive(Debug, thiserror::Error)]
#[allow(clippy::module_name_repetitions)]
pub enum LoggerError {
    #[error("could not parse log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::FromEnvError),
    #[error("setting default subscriber failed: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs the global subscriber at `level`. Directives in
/// `NEW_RELIC_LOG_FILTER` refine it per target.
pub fn init(level: LogLevel) -> Result<(), LoggerError> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.as_level_filter().into())
        .with_env_var(LOG_FILTER_ENV)
        .from_env()?;
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(false)
        .without_time()
        .event_format(Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::debug!("Logging subsystem enabled");
    Ok(())
}
