// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Logging initialization
//!
//! Console output is always installed. With the `file-logging` feature and
//! `logging.file_logging = true`, every run additionally writes a JSON log
//! into its own timestamped folder:
//!
//! ```text
//! ./logs/
//!   └── run_20250101_120000/
//!       └── neurokernel.log
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use neurokernel_config::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;

const RUN_PREFIX: &str = "run_";
const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Keeps file writers alive; logs are flushed when it is dropped
pub struct LoggingGuard {
    #[cfg(feature = "file-logging")]
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    run_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// Folder of the current run, if file logging is active
    pub fn run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }
}

/// Filter combining the configured level with per-crate debug flags
pub fn build_filter(debug_flags: &CrateDebugFlags, logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::new(debug_flags.to_filter_string(&logging.level))
}

/// Install the global subscriber
///
/// # Errors
///
/// Fails if the run folder cannot be created, if file logging is requested
/// without the `file-logging` feature, or if a global subscriber is already
/// installed
pub fn init_logging(
    debug_flags: &CrateDebugFlags,
    logging: &LoggingConfig,
) -> Result<LoggingGuard> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(build_filter(debug_flags, logging))
        .boxed();
    let mut layers = vec![console_layer];

    #[cfg(feature = "file-logging")]
    let mut file_guards = Vec::new();
    let mut run_dir = None;

    if logging.file_logging {
        #[cfg(feature = "file-logging")]
        {
            let run_folder = create_run_folder(&logging.log_dir)?;
            cleanup_old_logs(&logging.log_dir, logging.retention_days, logging.retention_runs)?;

            let appender = tracing_appender::rolling::never(&run_folder, "neurokernel.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            file_guards.push(guard);

            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .with_filter(build_filter(debug_flags, logging))
                .boxed();
            layers.push(file_layer);
            run_dir = Some(run_folder);
        }
        #[cfg(not(feature = "file-logging"))]
        anyhow::bail!("logging.file_logging requires the 'file-logging' feature");
    }

    Registry::default()
        .with(layers)
        .try_init()
        .context("Failed to install the global tracing subscriber")?;

    Ok(LoggingGuard {
        #[cfg(feature = "file-logging")]
        _file_guards: file_guards,
        run_dir,
    })
}

/// Console-only logging at the default level
pub fn init_logging_default(debug_flags: &CrateDebugFlags) -> Result<LoggingGuard> {
    init_logging(debug_flags, &LoggingConfig::default())
}

/// Create `base/run_<timestamp>`
pub fn create_run_folder(base_log_dir: &Path) -> Result<PathBuf> {
    let run_folder = base_log_dir.join(format!(
        "{}{}",
        RUN_PREFIX,
        Utc::now().format(RUN_TIMESTAMP_FORMAT)
    ));
    std::fs::create_dir_all(&run_folder)
        .with_context(|| format!("Failed to create log directory: {}", run_folder.display()))?;
    Ok(run_folder)
}

fn run_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let name = path.file_name()?.to_str()?;
    let stamp = name.strip_prefix(RUN_PREFIX)?;
    let naive = NaiveDateTime::parse_from_str(stamp, RUN_TIMESTAMP_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Remove run folders older than `retention_days`, then all but the newest
/// `retention_runs`. Returns the number of folders removed.
pub fn cleanup_old_logs(
    base_log_dir: &Path,
    retention_days: u64,
    retention_runs: usize,
) -> Result<usize> {
    if !base_log_dir.exists() {
        return Ok(0);
    }

    let mut runs: Vec<(PathBuf, DateTime<Utc>)> = Vec::new();
    for entry in std::fs::read_dir(base_log_dir)
        .with_context(|| format!("Failed to read log directory: {}", base_log_dir.display()))?
    {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(stamp) = run_timestamp(&path) {
            runs.push((path, stamp));
        }
    }

    // Newest first
    runs.sort_by(|a, b| b.1.cmp(&a.1));
    let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);

    let mut removed = 0;
    for (index, (path, stamp)) in runs.iter().enumerate() {
        if index < retention_runs && *stamp >= cutoff {
            continue;
        }
        match std::fs::remove_dir_all(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!(
                "Warning: Failed to remove old log directory {}: {}",
                path.display(),
                e
            ),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_run(base: &Path, stamp: DateTime<Utc>) -> PathBuf {
        let dir = base.join(format!("{}{}", RUN_PREFIX, stamp.format(RUN_TIMESTAMP_FORMAT)));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_run_timestamp_parses_folder_names() {
        let stamp = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(run_timestamp(Path::new("logs/run_20250101_120000")), Some(stamp));
        assert_eq!(run_timestamp(Path::new("logs/archive")), None);
        assert_eq!(run_timestamp(Path::new("logs/run_latest")), None);
    }

    #[test]
    fn test_cleanup_keeps_newest_runs() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let runs: Vec<_> = (0..4)
            .map(|i| make_run(dir.path(), now - chrono::Duration::hours(i)))
            .collect();
        std::fs::create_dir_all(dir.path().join("unrelated")).unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), 30, 2).unwrap(), 2);
        assert!(runs[0].exists() && runs[1].exists());
        assert!(!runs[2].exists() && !runs[3].exists());
        assert!(dir.path().join("unrelated").exists());
    }

    #[test]
    fn test_cleanup_drops_expired_runs() {
        let dir = tempdir().unwrap();
        let fresh = make_run(dir.path(), Utc::now());
        let stale = make_run(dir.path(), Utc::now() - chrono::Duration::days(10));

        assert_eq!(cleanup_old_logs(dir.path(), 7, 10).unwrap(), 1);
        assert!(fresh.exists());
        assert!(!stale.exists());
    }

    #[test]
    fn test_cleanup_missing_dir_is_noop() {
        let dir = tempdir().unwrap();
        assert_eq!(cleanup_old_logs(&dir.path().join("absent"), 7, 1).unwrap(), 0);
    }

    #[test]
    fn test_filter_uses_configured_level() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-neurokernel".to_string()]);
        let logging = LoggingConfig {
            level: "warn".to_string(),
            ..LoggingConfig::default()
        };
        let filter = build_filter(&flags, &logging).to_string();
        assert!(filter.contains("neurokernel=debug"));
        assert!(filter.contains("warn"));
    }
}
