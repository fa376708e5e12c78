//! Structured logging and attempt accounting.
//!
//! `init` installs a `tracing` subscriber with:
//! - `RUST_LOG` environment filter support
//! - JSON output when `RUST_LOG_FORMAT=json`
//! - Human-readable output on stderr otherwise
//!
//! The `AttemptLogger` implementations record how many guesses succeeded or
//! failed per round.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "rs_guess_core=info,rs_guess=info";

/// Initialize the global tracing subscriber.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(default_filter: &str) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

	let is_json = std::env::var("RUST_LOG_FORMAT")
		.map(|v| v.eq_ignore_ascii_case("json"))
		.unwrap_or(false);

	let subscriber = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(true)
		.with_thread_ids(false)
		.with_file(false)
		.with_line_number(false);

	if is_json {
		let _ = subscriber.json().try_init();
	} else {
		let _ = subscriber.try_init();
	}
}

/// Receives attempt counts from the generator and the engine adapter.
///
/// Calls are fire-and-forget: implementations must not fail the caller and
/// must only do a bounded amount of local work.
pub trait AttemptLogger: Send + Sync {
	fn log_successful_attempts(&self, count: usize);

	fn log_failed_attempts(&self, count: usize);
}

/// Emits attempt counts as tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAttemptLogger;

impl AttemptLogger for TracingAttemptLogger {
	fn log_successful_attempts(&self, count: usize) {
		tracing::info!(successful_attempts = count, "Successful attempts");
	}

	fn log_failed_attempts(&self, count: usize) {
		tracing::warn!(failed_attempts = count, "Failed attempts");
	}
}

#[derive(Serialize)]
struct SessionEntry {
	timestamp: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	successful_attempts: Option<usize>,
	#[serde(skip_serializing_if = "Option::is_none")]
	failed_attempts: Option<usize>,
}

/// Appends one JSON object per line to a session file.
///
/// Example line: `{"timestamp":"2026-01-01T00:00:00Z","successful_attempts":3}`
#[derive(Debug)]
pub struct SessionLog {
	path: PathBuf,
	file: Mutex<File>,
}

impl SessionLog {
	/// Opens (or creates) the session file in append mode.
	pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
		let file = OpenOptions::new().create(true).append(true).open(&path)?;
		Ok(Self {
			path: path.as_ref().to_path_buf(),
			file: Mutex::new(file),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn append(&self, entry: &SessionEntry) {
		let mut line = match serde_json::to_string(entry) {
			Ok(line) => line,
			Err(e) => {
				tracing::warn!(error = %e, "Failed to encode session log entry");
				return;
			}
		};
		line.push('\n');

		let result = match self.file.lock() {
			Ok(mut file) => file.write_all(line.as_bytes()),
			Err(_) => Err(std::io::Error::other("session log lock poisoned")),
		};
		if let Err(e) = result {
			tracing::warn!(path = %self.path.display(), error = %e, "Failed to write session log");
		}
	}
}

impl AttemptLogger for SessionLog {
	fn log_successful_attempts(&self, count: usize) {
		self.append(&SessionEntry {
			timestamp: Utc::now().to_rfc3339(),
			successful_attempts: Some(count),
			failed_attempts: None,
		});
	}

	fn log_failed_attempts(&self, count: usize) {
		self.append(&SessionEntry {
			timestamp: Utc::now().to_rfc3339(),
			successful_attempts: None,
			failed_attempts: Some(count),
		});
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	/// Counts calls instead of writing anywhere.
	#[derive(Debug, Default)]
	pub(crate) struct CountingLogger {
		pub(crate) successes: Mutex<Vec<usize>>,
		pub(crate) failures: AtomicUsize,
	}

	impl AttemptLogger for CountingLogger {
		fn log_successful_attempts(&self, count: usize) {
			self.successes.lock().unwrap().push(count);
		}

		fn log_failed_attempts(&self, count: usize) {
			self.failures.fetch_add(count, Ordering::SeqCst);
		}
	}

	#[test]
	fn init_does_not_panic() {
		init(DEFAULT_FILTER);
		init(DEFAULT_FILTER);
	}

	#[test]
	fn session_log_appends_json_lines() {
		let dir = tempfile::tempdir().unwrap();
		let log = SessionLog::open(dir.path().join("session.jsonl")).unwrap();
		log.log_successful_attempts(3);
		log.log_failed_attempts(1);

		let content = std::fs::read_to_string(log.path()).unwrap();
		let entries: Vec<serde_json::Value> = content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
		assert_eq!(entries.len(), 2);
		assert_eq!(entries[0]["successful_attempts"], 3);
		assert!(entries[0].get("failed_attempts").is_none());
		assert_eq!(entries[1]["failed_attempts"], 1);
		assert!(entries[1]["timestamp"].is_string());
	}

	#[test]
	fn session_log_keeps_previous_sessions() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("session.jsonl");
		SessionLog::open(&path).unwrap().log_successful_attempts(1);
		SessionLog::open(&path).unwrap().log_successful_attempts(2);
		assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
	}
}
