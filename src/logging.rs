//! Tracing subscriber setup for the binary.
//!
//! Human-readable (or JSON) output goes to stderr so stdout stays free for
//! command output. When a log directory is given, a daily-rotated JSON log is
//! written there as well. `RUST_LOG` overrides the default filter.

use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::Layer;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

pub const LOG_FILE_PREFIX: &str = "reviewflow.log";

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub verbose: bool,
    /// JSON lines on stderr instead of text.
    pub json: bool,
    pub log_dir: Option<PathBuf>,
}

pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "reviewflow=debug"
    } else {
        "reviewflow=warn"
    }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer.
pub fn init(opts: &LogOptions) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(opts.verbose)));

    let stderr_layer: Box<dyn Layer<Registry> + Send + Sync> = if opts.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match &opts.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialise logging: {}", e))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(true), "reviewflow=debug");
        assert_eq!(default_directive(false), "reviewflow=warn");
    }

    #[test]
    fn test_directives_parse() {
        for verbose in [true, false] {
            assert!(EnvFilter::try_new(default_directive(verbose)).is_ok());
        }
    }
}
