//! Subscriber bootstrap for the binary.

use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_PREFIX: &str = "sni-camo.log";

/// Install the global subscriber: `RUST_LOG` filter (default `info`),
/// compact format, target hidden. With `log_dir` events go to a daily
/// rotating file instead of stderr; keep the returned guard alive until
/// exit so buffered lines are flushed.
pub fn init(log_dir: Option<&Path>) -> io::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(writer)
                .compact()
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(io::stderr)
                .compact()
                .init();
            Ok(None)
        }
    }
}
