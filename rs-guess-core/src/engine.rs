use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use crate::config::EngineSettings;
use crate::error::{ConfigError, GuessResult};
use crate::logging::AttemptLogger;

/// Substring marking a recovered credential in the engine output.
pub const SUCCESS_MARKER: &str = "Recovered";

/// Receives every trimmed output line of the engine, from either stream.
pub type ProgressCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Result of one engine invocation within [`CrackEngineAdapter::run_with_masks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskOutcome {
	pub mask: String,
	pub recovered: usize,
}

/// Drives the external cracking engine as a subprocess.
///
/// The command line is
/// `<program> <mode args> <hash file> <candidate file> <options...>`.
/// Both output streams are read concurrently and every line containing
/// [`SUCCESS_MARKER`] counts as one recovered credential.
///
/// There is no timeout: `run` blocks until the engine exits.
pub struct CrackEngineAdapter {
	program: String,
	mode_args: Vec<String>,
	progress: ProgressCallback,
	logger: Arc<dyn AttemptLogger>,
}

impl CrackEngineAdapter {
	pub fn new(settings: &EngineSettings, progress: ProgressCallback, logger: Arc<dyn AttemptLogger>) -> Self {
		Self {
			program: settings.program.clone(),
			mode_args: settings.mode_args.clone(),
			progress,
			logger,
		}
	}

	pub fn program(&self) -> &str {
		&self.program
	}

	/// Arguments passed after the program name.
	pub fn command_args(&self, hash_file: &Path, options: &str, candidate_file: &Path) -> Vec<OsString> {
		self.mode_args
			.iter()
			.map(OsString::from)
			.chain([hash_file.as_os_str().to_owned(), candidate_file.as_os_str().to_owned()])
			.chain(options.split_whitespace().map(OsString::from))
			.collect()
	}

	/// Runs the engine once and returns the number of recovered credentials.
	///
	/// The exit status is logged but does not fail the call: engines commonly
	/// exit non-zero once the candidate list is exhausted.
	///
	/// # Errors
	/// - `ConfigError::EngineNotFound` if the program cannot be located
	/// - `ConfigError::Spawn` if the process cannot be started, including an
	///   explicit path to a file without the exec bit
	/// - `Io` if waiting for the process fails
	pub fn run(&self, hash_file: &Path, options: &str, candidate_file: &Path) -> GuessResult<usize> {
		let executable = which::which(&self.program).map_err(|_| self.lookup_error())?;
		let args = self.command_args(hash_file, options, candidate_file);
		tracing::info!(program = %executable.display(), ?args, "Starting cracking engine");

		let mut child = Command::new(&executable)
			.args(&args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()
			.map_err(|source| ConfigError::Spawn {
				program: self.program.clone(),
				source,
			})?;

		let stdout = child.stdout.take();
		let stderr = child.stderr.take();

		let recovered = thread::scope(|scope| {
			let out = scope.spawn(move || stdout.map_or(0, |pipe| self.drain("stdout", pipe)));
			let err = scope.spawn(move || stderr.map_or(0, |pipe| self.drain("stderr", pipe)));

			[("stdout", out), ("stderr", err)]
				.into_iter()
				.map(|(stream, handle)| {
					handle.join().unwrap_or_else(|_| {
						tracing::error!(stream, "Engine output reader panicked");
						0
					})
				})
				.sum::<usize>()
		});

		let status = child.wait()?;
		tracing::info!(status = ?status.code(), recovered, "Cracking engine finished");
		self.logger.log_successful_attempts(recovered);
		Ok(recovered)
	}

	/// A bare name that is not on `PATH` was not found. An explicit path to
	/// an existing file was found but cannot be started.
	fn lookup_error(&self) -> ConfigError {
		let path = Path::new(&self.program);
		if path.components().count() > 1 && path.is_file() {
			ConfigError::Spawn {
				program: self.program.clone(),
				source: io::Error::new(ErrorKind::PermissionDenied, "file is not executable"),
			}
		} else {
			ConfigError::EngineNotFound {
				program: self.program.clone(),
			}
		}
	}

	/// Runs the engine once per mask, one after the other.
	///
	/// The mask value is not passed to the engine: every invocation uses the
	/// same command line. Each run's count is reported next to its mask. The
	/// first error stops the sequence.
	pub fn run_with_masks(
		&self,
		hash_file: &Path,
		options: &str,
		candidate_file: &Path,
		masks: &[String],
	) -> GuessResult<Vec<MaskOutcome>> {
		let mut outcomes = Vec::with_capacity(masks.len());
		for mask in masks {
			tracing::debug!(mask = %mask, "Running engine for mask");
			let recovered = self.run(hash_file, options, candidate_file)?;
			outcomes.push(MaskOutcome {
				mask: mask.clone(),
				recovered,
			});
		}
		Ok(outcomes)
	}

	/// Reads `pipe` to the end, forwarding lines and counting markers.
	///
	/// Invalid UTF-8 is replaced rather than treated as an error.
	fn drain<R: Read>(&self, stream: &'static str, pipe: R) -> usize {
		let mut reader = BufReader::new(pipe);
		let mut buffer = Vec::new();
		let mut recovered = 0;

		loop {
			buffer.clear();
			match reader.read_until(b'\n', &mut buffer) {
				Ok(0) => break,
				Ok(_) => {
					let line = String::from_utf8_lossy(&buffer);
					if line.contains(SUCCESS_MARKER) {
						recovered += 1;
					}
					(self.progress)(line.trim());
				}
				Err(e) if e.kind() == ErrorKind::Interrupted => continue,
				Err(e) => {
					tracing::warn!(stream, error = %e, "Stopped reading engine output");
					break;
				}
			}
		}

		recovered
	}
}
