//! Run configuration.
//!
//! Loaded from a TOML file whose sections are all optional:
//!
//! ```toml
//! [model]
//! order = 3
//! version = "1.0"
//!
//! [generator]
//! batch_size = 1000
//! length = 8
//! workers = 4
//! success_threshold = 5
//! candidate_file = "generated_passwords.txt"
//!
//! [engine]
//! program = "hashcat"
//! mode_args = ["-m", "0"]
//! options = "--potfile-disable"
//!
//! [logging]
//! filter = "rs_guess_core=debug"
//! session_log = "session_log.jsonl"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{GuessError, GuessResult};
use crate::model::generator::DEFAULT_SUCCESS_THRESHOLD;
use crate::model::ngram_model::{DEFAULT_ORDER, DEFAULT_VERSION, MAX_ORDER, MIN_ORDER};

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
	pub model: ModelSettings,
	pub generator: GeneratorSettings,
	pub engine: EngineSettings,
	pub logging: LoggingSettings,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSettings {
	/// N-gram order used when training a new model.
	order: usize,
	/// Version tag stamped on saved models.
	pub version: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorSettings {
	/// Candidates per worker batch.
	batch_size: usize,
	/// Requested candidate length.
	pub length: usize,
	/// Parallel generation workers.
	workers: usize,
	/// Success count at or above which the order stops growing.
	pub success_threshold: usize,
	/// File candidates are appended to.
	pub candidate_file: PathBuf,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
	/// Executable name (looked up on PATH) or path.
	pub program: String,
	/// Fixed arguments placed before the hash and candidate files.
	pub mode_args: Vec<String>,
	/// Extra options, split on whitespace.
	pub options: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
	/// Tracing filter used when `RUST_LOG` is unset.
	pub filter: Option<String>,
	/// JSON-lines file receiving attempt counts.
	pub session_log: Option<PathBuf>,
}

impl Default for ModelSettings {
	fn default() -> Self {
		Self {
			order: DEFAULT_ORDER,
			version: DEFAULT_VERSION.to_owned(),
		}
	}
}

impl Default for GeneratorSettings {
	fn default() -> Self {
		Self {
			batch_size: 1000,
			length: 8,
			workers: 4,
			success_threshold: DEFAULT_SUCCESS_THRESHOLD,
			candidate_file: PathBuf::from("generated_passwords.txt"),
		}
	}
}

impl Default for EngineSettings {
	fn default() -> Self {
		Self {
			program: "hashcat".to_owned(),
			mode_args: vec!["-m".to_owned(), "0".to_owned()],
			options: String::new(),
		}
	}
}

impl RunConfig {
	/// Reads and validates a TOML configuration file.
	///
	/// # Errors
	/// Returns `Config(Invalid)` if the file cannot be read, is not valid
	/// TOML, contains unknown keys or out-of-range values.
	pub fn load<P: AsRef<Path>>(path: P) -> GuessResult<Self> {
		let path = path.as_ref();
		let text = std::fs::read_to_string(path)
			.map_err(|e| GuessError::invalid_config(format!("cannot read {}: {e}", path.display())))?;
		Self::parse(&text)
	}

	/// Parses and validates TOML text.
	pub fn parse(text: &str) -> GuessResult<Self> {
		let config: Self = toml::from_str(text).map_err(|e| GuessError::invalid_config(e.to_string()))?;
		config.validate()?;
		Ok(config)
	}

	/// Checks values the setters would have rejected.
	pub fn validate(&self) -> GuessResult<()> {
		let mut model = ModelSettings::default();
		model.set_order(self.model.order)?;

		let mut generator = GeneratorSettings::default();
		generator.set_batch_size(self.generator.batch_size)?;
		generator.set_workers(self.generator.workers)?;

		if self.engine.program.trim().is_empty() {
			return Err(GuessError::invalid_config("engine program cannot be empty"));
		}
		Ok(())
	}
}

impl ModelSettings {
	pub fn order(&self) -> usize {
		self.order
	}

	/// Sets the training order.
	///
	/// # Errors
	/// Returns an error if the value is outside `1..=10`.
	pub fn set_order(&mut self, order: usize) -> GuessResult<()> {
		if !(MIN_ORDER..=MAX_ORDER).contains(&order) {
			return Err(GuessError::invalid_config(format!(
				"order must be between {MIN_ORDER} and {MAX_ORDER}, got {order}"
			)));
		}
		self.order = order;
		Ok(())
	}
}

impl GeneratorSettings {
	pub fn batch_size(&self) -> usize {
		self.batch_size
	}

	pub fn workers(&self) -> usize {
		self.workers
	}

	/// # Errors
	/// Returns an error if `batch_size` is zero.
	pub fn set_batch_size(&mut self, batch_size: usize) -> GuessResult<()> {
		if batch_size == 0 {
			return Err(GuessError::invalid_config("batch size must be at least 1"));
		}
		self.batch_size = batch_size;
		Ok(())
	}

	/// # Errors
	/// Returns an error if `workers` is zero.
	pub fn set_workers(&mut self, workers: usize) -> GuessResult<()> {
		if workers == 0 {
			return Err(GuessError::invalid_config("worker count must be at least 1"));
		}
		self.workers = workers;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::ConfigError;

	#[test]
	fn empty_file_gives_defaults() {
		let config = RunConfig::parse("").unwrap();
		assert_eq!(config, RunConfig::default());
		assert_eq!(config.model.order(), 3);
		assert_eq!(config.generator.success_threshold, 5);
		assert_eq!(config.engine.program, "hashcat");
		assert_eq!(config.engine.mode_args, vec!["-m", "0"]);
	}

	#[test]
	fn sections_override_defaults() {
		let config = RunConfig::parse(
			r#"
			[model]
			order = 5

			[generator]
			batch_size = 50
			workers = 2

			[engine]
			program = "/opt/hashcat/hashcat"
			options = "--force -O"

			[logging]
			session_log = "session.jsonl"
			"#,
		)
		.unwrap();

		assert_eq!(config.model.order(), 5);
		assert_eq!(config.generator.batch_size(), 50);
		assert_eq!(config.generator.workers(), 2);
		assert_eq!(config.generator.length, 8);
		assert_eq!(config.engine.options, "--force -O");
		assert_eq!(config.logging.session_log, Some(PathBuf::from("session.jsonl")));
	}

	#[test]
	fn rejects_out_of_range_order() {
		let err = RunConfig::parse("[model]\norder = 12\n").unwrap_err();
		assert!(matches!(err, GuessError::Config(ConfigError::Invalid(_))));
	}

	#[test]
	fn rejects_zero_workers() {
		assert!(RunConfig::parse("[generator]\nworkers = 0\n").is_err());
	}

	#[test]
	fn rejects_unknown_keys() {
		assert!(RunConfig::parse("[generator]\nthreads = 4\n").is_err());
	}

	#[test]
	fn missing_file_is_a_config_error() {
		let dir = tempfile::tempdir().unwrap();
		let err = RunConfig::load(dir.path().join("absent.toml")).unwrap_err();
		assert_eq!(err.error_code(), "GUESS-CONFIG");
	}

	#[test]
	fn setters_validate() {
		let mut generator = GeneratorSettings::default();
		assert!(generator.set_batch_size(0).is_err());
		generator.set_batch_size(10).unwrap();
		assert_eq!(generator.batch_size(), 10);

		let mut model = ModelSettings::default();
		assert!(model.set_order(0).is_err());
		model.set_order(10).unwrap();
		assert_eq!(model.order(), 10);
	}
}
