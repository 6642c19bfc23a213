use std::{fmt, str::FromStr};

use log::LevelFilter;

use crate::error::Error;

/// Verbosity accepted on the command line and in `RUST_LOG`-less runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the stderr logger. `RUST_LOG` overrides `level` when set.
pub fn init_logging(level: LogLevel) {
    let result = env_logger::Builder::new()
        .filter_level(level.filter())
        .parse_default_env()
        .format_target(false)
        .try_init();

    if result.is_err() {
        eprintln!("Warning: Logging system already initialized");
    }
}

/// Log a crate error at error level, prefixed with `context` when given.
pub fn log_export_error(error: &Error, context: Option<&str>) {
    match context {
        Some(ctx) => log::error!("{ctx}: {error}"),
        None => log::error!("{error}"),
    }
}

/// Result extension for convenient error logging
pub trait ResultExt<T, E> {
    fn log_error(self, context: Option<&str>) -> Self;
}

impl<T> ResultExt<T, Error> for Result<T, Error> {
    fn log_error(self, context: Option<&str>) -> Self {
        if let Err(ref error) = self {
            log_export_error(error, context);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_level_names_when_parsing_then_filters_match() {
        assert_eq!("DEBUG".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!(LogLevel::Error.filter(), LevelFilter::Error);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn given_error_result_when_logging_then_result_is_returned_unchanged() {
        let result: Result<(), Error> = Err(Error::Cancelled);

        let result = result.log_error(Some("export"));

        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
