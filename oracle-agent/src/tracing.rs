//! Provide tracing, tailored to this program.
//!
//! At startup the program calls [`init_journald_or_stdout`] to install a
//! tracing subscriber. The rest of the program can `use
//! crate::tracing::prelude::*` for the `trace!()`, `debug!()`, `info!()`,
//! `warn!()`, and `error!()` macros.
//!
//! Filtering comes from `RUST_LOG` when it is set. Otherwise the configured
//! default level applies, refined by per-component levels (mining, dispute
//! tracker) taken from the config file.

use std::env;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{Directive, EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

use crate::config::Config;

/// Log filtering derived from the configuration.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Level for targets without a more specific directive
    pub default_level: String,

    /// Extra `target=level` directives
    pub directives: Vec<String>,
}

impl From<&Config> for LogSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_level: config.log_level.clone(),
            directives: config.log_directives(),
        }
    }
}

impl LogSettings {
    fn env_filter(&self) -> EnvFilter {
        if env::var("RUST_LOG").is_ok() {
            return EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy();
        }

        let default = self
            .default_level
            .parse::<LevelFilter>()
            .unwrap_or(LevelFilter::INFO);
        let mut filter = EnvFilter::builder()
            .with_default_directive(default.into())
            .parse_lossy("");
        for directive in &self.directives {
            match directive.parse::<Directive>() {
                Ok(d) => filter = filter.add_directive(d),
                Err(e) => eprintln!("Ignoring invalid log directive {directive:?}: {e}"),
            }
        }
        filter
    }
}

/// Initialize logging.
///
/// If running under systemd, use journald; otherwise fall back to stdout.
pub fn init_journald_or_stdout(settings: &LogSettings) {
    if env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(settings.env_filter())
                .with(layer)
                .init();
        } else {
            use_stdout(settings);
            error!("Failed to initialize journald logging, using stdout.");
        }
    } else {
        use_stdout(settings);
    }
}

fn use_stdout(settings: &LogSettings) {
    tracing_subscriber::registry()
        .with(settings.env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(LocalTimer)
                .with_target(true)
                .event_format(CompactFormatter),
        )
        .init();
}

/// Event formatter that strips the crate prefix from targets and prints
/// structured fields after the message.
struct CompactFormatter;

/// Visitor that collects the message and fields of an event.
#[derive(Default)]
struct FieldCollector {
    fields: Vec<(String, String)>,
    message: Option<String>,
}

impl tracing::field::Visit for FieldCollector {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let formatted = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(formatted);
        } else {
            self.fields.push((field.name().to_string(), formatted));
        }
    }
}

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for CompactFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        LocalTimer.format_time(&mut writer)?;

        let level = match *event.metadata().level() {
            tracing::Level::ERROR => "\x1b[31mERROR\x1b[0m",
            tracing::Level::WARN => "\x1b[33mWARN \x1b[0m",
            tracing::Level::INFO => "\x1b[32mINFO \x1b[0m",
            tracing::Level::DEBUG => "\x1b[34mDEBUG\x1b[0m",
            tracing::Level::TRACE => "\x1b[35mTRACE\x1b[0m",
        };
        write!(writer, " {} {}: ", level, short_target(event.metadata().target()))?;

        if let Some(msg) = &visitor.message {
            write!(writer, "{}", msg)?;
        }

        for (key, value) in visitor.fields.iter().filter(|(k, _)| !k.starts_with("log.")) {
            write!(writer, " \x1b[90m{}={}\x1b[0m", key, value)?;
        }

        writeln!(writer)
    }
}

/// Strip our own crate prefix; keep dependency targets as they are.
fn short_target(target: &str) -> &str {
    target.strip_prefix("oracle_agent::").unwrap_or(target)
}

// Timestamps in local time, to the nearest second.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or(OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{}", formatted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_target() {
        assert_eq!(short_target("oracle_agent::tracker::dispute"), "tracker::dispute");
        assert_eq!(short_target("tokio::runtime"), "tokio::runtime");
    }
}
