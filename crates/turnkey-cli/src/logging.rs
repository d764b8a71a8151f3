//! Tracing subscriber setup: stdout plus a daily rolling file.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use turnkey_core::config::LoggingSection;

const LOG_FILE_PREFIX: &str = "turnkeyd.log";

/// Build the filter: `RUST_LOG` wins over the configured level.
pub fn filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid log level {level:?}")),
    }
}

/// Install the global subscriber. Keep the guard alive until exit so
/// buffered file output is flushed.
pub fn init(config: &LoggingSection) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.dir)
        .with_context(|| format!("cannot create log directory {}", config.dir.display()))?;

    let appender = tracing_appender::rolling::daily(&config.dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter(&config.level)?)
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .context("tracing subscriber already installed")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("info")]
    #[case("debug")]
    #[case("turnkey_turnstile=debug,warn")]
    fn test_filter_accepts_directives(#[case] level: &str) {
        assert!(EnvFilter::try_new(level).is_ok());
    }

    #[test]
    fn test_init_creates_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingSection {
            level: "info".to_string(),
            dir: dir.path().join("logs"),
        };
        let _guard = init(&config).unwrap();
        assert!(config.dir.is_dir());
    }
}
