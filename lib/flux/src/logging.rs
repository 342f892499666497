use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

pub use slog::{crit, debug, error, info, o, trace, warn, Logger};

use crate::config::LoggingConfig;

/// Builds the root logger for the process from a parsed `LoggingConfig`.
///
/// `reflectord` calls this once at startup and threads the returned logger
/// down into every module as a child logger scoped with `o!("module" => ..)`.
pub fn init(config: &LoggingConfig) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(parse_severity(&config.level));
    builder.destination(parse_destination(&config.destination));

    builder
        .build()
        .expect("logging configuration must build a usable root logger")
}

/// A logger that discards everything; used in tests and anywhere a `Logger`
/// is required but output is not under test.
pub fn discard() -> Logger {
    Logger::root(slog::Discard, o!())
}

fn parse_severity(level: &str) -> Severity {
    match level {
        "critical" => Severity::Critical,
        "error" => Severity::Error,
        "warning" | "warn" => Severity::Warning,
        "info" => Severity::Info,
        "debug" => Severity::Debug,
        "trace" => Severity::Trace,
        _ => Severity::Info,
    }
}

fn parse_destination(destination: &str) -> Destination {
    match destination {
        "stdout" => Destination::Stdout,
        _ => Destination::Stderr,
    }
}
