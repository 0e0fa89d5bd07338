/*
 *     Copyright 2025 The Switchyard Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use rolling_file::*;
use std::fs;
use std::path::Path;
use switchyard_core::{
    error::{ErrorType, OrErr},
    Result,
};
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{time::ChronoLocal, Layer},
    prelude::*,
    EnvFilter, Registry,
};

/// init_tracing initializes the global subscriber, writing to an hourly rolling log file and,
/// when verbose, to stdout. The returned guards flush the writers when dropped.
pub fn init_tracing(
    name: &str,
    log_dir: &Path,
    log_level: Level,
    log_max_files: usize,
    verbose: bool,
) -> Result<Vec<WorkerGuard>> {
    let mut guards = vec![];

    // Setup stdout layer.
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    // Initialize stdout layer.
    let stdout_filter = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::OFF
    };
    let stdout_logging_layer = Layer::new()
        .with_writer(stdout_writer)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_timer(ChronoLocal::rfc_3339())
        .pretty()
        .with_filter(stdout_filter);
    guards.push(stdout_guard);

    // Setup file layer.
    fs::create_dir_all(log_dir)?;
    let rolling_appender = BasicRollingFileAppender::new(
        log_dir.join(name).with_extension("log"),
        RollingConditionBasic::new().hourly(),
        log_max_files,
    )?;

    let (rolling_writer, rolling_writer_guard) = tracing_appender::non_blocking(rolling_appender);
    let file_logging_layer = Layer::new()
        .with_writer(rolling_writer)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_timer(ChronoLocal::rfc_3339())
        .compact();
    guards.push(rolling_writer_guard);

    // Setup env filter for log level.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(log_level.into()));

    let subscriber = Registry::default()
        .with(env_filter)
        .with(file_logging_layer)
        .with(stdout_logging_layer);

    tracing::subscriber::set_global_default(subscriber)
        .or_context(ErrorType::TracingError, "set global subscriber")?;
    LogTracer::init().or_context(ErrorType::TracingError, "init log tracer")?;

    info!(
        "tracing initialized directory: {}, level: {}",
        log_dir.display(),
        log_level
    );

    Ok(guards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_tracing_creates_log_dir() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("logs");

        let guards = init_tracing("switchyard", &log_dir, Level::DEBUG, 2, false).unwrap();
        assert_eq!(guards.len(), 2);
        assert!(log_dir.is_dir());

        // The global subscriber is set once per process.
        assert!(init_tracing("switchyard", &log_dir, Level::DEBUG, 2, false).is_err());

        // Dropping the guards flushes the pending lines to the log file.
        tracing::error!("request failed: connection refused");
        drop(guards);

        let log = fs::read_to_string(log_dir.join("switchyard.log")).unwrap();
        assert!(log.contains("tracing initialized directory"));
        assert!(log.contains("request failed: connection refused"));
    }
}
