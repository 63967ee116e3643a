// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::{Arc, Mutex, OnceLock},
};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, FormatFields, format::Writer},
    prelude::*,
};

struct BootFormatter;

impl<S, N> fmt::FormatEvent<S, N> for BootFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        write!(
            writer,
            "[{}] [{}] [{}] ",
            chrono::Local::now().format("%m-%d %H:%M:%S%.3f"),
            metadata.level(),
            metadata.target()
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Shared handle to the active log file. Boot logging starts on `/cache`;
/// once `/data` is mounted the sink is repointed to the daemon log without
/// tearing down the subscriber.
#[derive(Clone)]
struct LogSink(Arc<Mutex<File>>);

static LOG_SINK: OnceLock<LogSink> = OnceLock::new();

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

impl io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self
            .0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut file = self
            .0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        file.flush()
    }
}

/// Bring up the tracing stack. With a log path, events append to that file
/// through a non-blocking writer; the returned guard must outlive the
/// process's useful life so buffered lines are flushed.
pub fn init_logging(verbose: bool, log_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // On Android the log facade goes straight to logcat; LogTracer below
    // then becomes a no-op since a logger is already installed.
    #[cfg(target_os = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(if verbose {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Info
            })
            .with_tag("modmount"),
    );

    let guard = if let Some(path) = log_path {
        let sink = LogSink(Arc::new(Mutex::new(open_append(path)?)));
        let _ = LOG_SINK.set(sink.clone());
        let (writer, guard) = tracing_appender::non_blocking(sink);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .event_format(BootFormatter);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();
        Some(guard)
    } else {
        let stdout_layer = fmt::layer().with_ansi(true).event_format(BootFormatter);
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .init();
        None
    };

    let _ = tracing_log::LogTracer::init();

    Ok(guard)
}

/// Repoint the file sink, keeping the subscriber and its worker intact.
/// A no-op when logging goes to stdout.
pub fn redirect_log_file(path: &Path) -> Result<()> {
    let Some(sink) = LOG_SINK.get() else {
        return Ok(());
    };
    let file = open_append(path)?;
    {
        let mut slot = sink
            .0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = file;
    }
    log::info!("log continues at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_repoints_between_files() {
        let dir = std::env::temp_dir().join(format!("modmount-log-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let first = dir.join("boot.log");
        let second = dir.join("daemon.log");

        let mut sink = LogSink(Arc::new(Mutex::new(open_append(&first).unwrap())));
        sink.write_all(b"early\n").unwrap();
        {
            let mut slot = sink.0.lock().unwrap();
            *slot = open_append(&second).unwrap();
        }
        sink.write_all(b"late\n").unwrap();

        assert_eq!(std::fs::read(&first).unwrap(), b"early\n");
        assert_eq!(std::fs::read(&second).unwrap(), b"late\n");

        std::fs::remove_dir_all(dir).unwrap();
    }
}
