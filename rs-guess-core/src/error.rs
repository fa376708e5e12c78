use thiserror::Error;

/// Result alias used across the crate.
pub type GuessResult<T> = Result<T, GuessError>;

/// Every failure the guessing loop can surface to its caller.
///
/// Nothing in the crate retries on its own: each variant is handed back as-is
/// and the caller decides what to do with it.
#[derive(Debug, Error)]
pub enum GuessError {
	/// The cracking engine or the run configuration is unusable.
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	/// A sink, rules file, model file or corpus could not be read or written.
	#[error("i/o failure: {0}")]
	Io(#[from] std::io::Error),

	/// Sampling or rule export was attempted on a model with no transitions.
	#[error("model state error: {0}")]
	ModelState(String),

	/// Context order outside of the supported `1..=10` range.
	#[error("invalid model order {0}, expected a value between 1 and 10")]
	InvalidOrder(usize),

	/// Persisted model state is missing a field or cannot be decoded.
	#[error("data error: {0}")]
	Data(#[from] DataError),

	/// A shared lock was poisoned by a panicking thread.
	#[error("lock poisoned: {0}")]
	LockPoisoned(&'static str),
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("cracking engine `{program}` not found on PATH")]
	EngineNotFound { program: String },

	#[error("failed to spawn cracking engine `{program}`: {source}")]
	Spawn {
		program: String,
		#[source]
		source: std::io::Error,
	},

	#[error("{0}")]
	Invalid(String),
}

#[derive(Debug, Error)]
pub enum DataError {
	#[error("missing required field `{0}` in model data")]
	MissingField(&'static str),

	#[error("invalid field `{field}` in model data: {reason}")]
	InvalidField { field: &'static str, reason: String },

	#[error("model data is unreadable or corrupt: {0}")]
	Corrupt(String),
}

impl GuessError {
	/// Stable, machine-readable code for every variant.
	#[must_use]
	pub const fn error_code(&self) -> &'static str {
		match self {
			Self::Config(ConfigError::EngineNotFound { .. }) => "GUESS-ENGINE-MISSING",
			Self::Config(ConfigError::Spawn { .. }) => "GUESS-ENGINE-SPAWN",
			Self::Config(ConfigError::Invalid(_)) => "GUESS-CONFIG",
			Self::Io(_) => "GUESS-IO",
			Self::ModelState(_) => "GUESS-MODEL-STATE",
			Self::InvalidOrder(_) => "GUESS-ORDER",
			Self::Data(DataError::MissingField(_)) => "GUESS-DATA-MISSING",
			Self::Data(DataError::InvalidField { .. }) => "GUESS-DATA-INVALID",
			Self::Data(DataError::Corrupt(_)) => "GUESS-DATA-CORRUPT",
			Self::LockPoisoned(_) => "GUESS-LOCK",
		}
	}

	pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
		Self::Config(ConfigError::Invalid(message.into()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_field_names_the_field() {
		let err = GuessError::from(DataError::MissingField("corpus"));
		assert!(err.to_string().contains("`corpus`"));
		assert_eq!(err.error_code(), "GUESS-DATA-MISSING");
	}

	#[test]
	fn corrupt_and_missing_have_distinct_codes() {
		let missing = GuessError::from(DataError::MissingField("order"));
		let corrupt = GuessError::from(DataError::Corrupt("eof".to_owned()));
		assert_ne!(missing.error_code(), corrupt.error_code());
	}

	#[test]
	fn spawn_error_keeps_source() {
		use std::error::Error as _;

		let err = ConfigError::Spawn {
			program: "hashcat".to_owned(),
			source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
		};
		assert!(err.source().is_some());
		assert_eq!(GuessError::from(err).error_code(), "GUESS-ENGINE-SPAWN");
	}

	#[test]
	fn io_errors_convert() {
		let err: GuessError = std::io::Error::other("disk full").into();
		assert_eq!(err.error_code(), "GUESS-IO");
		assert!(err.to_string().contains("disk full"));
	}
}
