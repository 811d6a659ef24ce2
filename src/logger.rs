use anyhow::{anyhow, Context};
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::SubscriberBuilder;

/*
    @@@
    @logs_tracing();
    . Creates a daily-rotating log file (<dir>/<file>) and wraps it in a non-blocking writer.
    . Configures a tracing subscriber to log `level` and above (with timestamps and targets) to that writer.
    . keeps the appender alive by returning the guard.
*/
pub fn logs_tracing(dir: impl AsRef<Path>, file: &str, level: &str) -> anyhow::Result<WorkerGuard> {
    let level: Level = level
        .parse()
        .map_err(|_| anyhow!("unknown log level `{}`", level))?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, dir.as_ref(), file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = SubscriberBuilder::default()
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_writer(non_blocking)
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("failed to set global subscriber")?;
    Ok(guard)
}
