// SPDX-License-Identifier: GPL-3.0-only

//! Tracing setup for the engine binaries
//!
//! `RUST_LOG` wins when set. Otherwise the engine crates log at the
//! configured level and everything else at `warn`. With `log_to_disk`
//! the same events also go to a daily rolling file, kept for a week.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{EngineConfig, LoggingLevel};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_PREFIX: &str = "storage-engine.log";
const LOG_DIR_ENV: &str = "STORAGE_ENGINE_LOG_DIR";
const KEEP_DAYS: u64 = 7;

/// Crates whose output follows the configured level
const ENGINE_TARGETS: [&str; 4] = [
    "storage_engine",
    "storage_sys",
    "storage_contracts",
    "storagectl",
];

/// Install the global subscriber. Call once, before the manager is built.
pub fn init(config: &EngineConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| engine_filter(config.log_level));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let file_layer = if config.log_to_disk {
        match file_writer(&log_dir()) {
            Ok((writer, guard)) => {
                let _ = LOG_GUARD.set(guard);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_target(true)
                        .with_ansi(false),
                )
            }
            Err(e) => {
                eprintln!("storage-engine: file logging disabled: {e:#}");
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}

fn engine_filter(level: LoggingLevel) -> EnvFilter {
    ENGINE_TARGETS
        .iter()
        .fold(EnvFilter::new("warn"), |filter, target| {
            match format!("{target}={}", level.as_directive()).parse() {
                Ok(directive) => filter.add_directive(directive),
                Err(_) => filter,
            }
        })
}

fn log_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(LOG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    let state = std::env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/state")))
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    state.join("storage-engine").join("logs")
}

fn file_writer(dir: &Path) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(dir)
        .with_context(|| format!("create log directory {}", dir.display()))?;
    cleanup_old_logs(dir, SystemTime::now());
    let appender = tracing_appender::rolling::daily(dir, LOG_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// Remove rolled files of ours not touched for `KEEP_DAYS` before `now`.
fn cleanup_old_logs(dir: &Path, now: SystemTime) -> usize {
    let Some(cutoff) = now.checked_sub(Duration::from_secs(KEEP_DAYS * 24 * 60 * 60)) else {
        return 0;
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(LOG_PREFIX))
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter(|entry| {
            entry
                .metadata()
                .and_then(|m| m.modified())
                .is_ok_and(|modified| modified < cutoff)
        })
        .filter(|entry| fs::remove_file(entry.path()).is_ok())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_crates_follow_the_configured_level() {
        let filter = engine_filter(LoggingLevel::Debug).to_string();
        assert!(filter.contains("storage_engine=debug"));
        assert!(filter.contains("storage_sys=debug"));
        assert!(filter.contains("warn"));
    }

    #[test]
    fn cleanup_removes_only_stale_engine_logs() {
        let dir = tempfile::tempdir().expect("temp dir");
        let ours = dir.path().join("storage-engine.log.2026-01-01");
        let foreign = dir.path().join("other.log");
        fs::write(&ours, "x").expect("write log");
        fs::write(&foreign, "x").expect("write log");

        assert_eq!(cleanup_old_logs(dir.path(), SystemTime::now()), 0);
        assert!(ours.exists());

        let later = SystemTime::now() + Duration::from_secs((KEEP_DAYS + 1) * 24 * 60 * 60);
        assert_eq!(cleanup_old_logs(dir.path(), later), 1);
        assert!(!ours.exists());
        assert!(foreign.exists());
    }
}
