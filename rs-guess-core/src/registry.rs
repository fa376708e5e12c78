//! Registry of saved models.
//!
//! A single JSON file holding `(id, model_type, file_path, version,
//! saved_at)` entries. The file is rewritten whole on every insert; there is
//! no locking across processes.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DataError, GuessError, GuessResult};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RegistryEntry {
	pub id: u64,
	pub model_type: String,
	pub file_path: PathBuf,
	pub version: String,
	pub saved_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ModelRegistry {
	path: PathBuf,
	entries: Mutex<Vec<RegistryEntry>>,
}

impl ModelRegistry {
	/// Opens the registry at `path`, starting empty if the file is absent.
	///
	/// # Errors
	/// - `Io` if the file exists but cannot be read
	/// - `DataError::Corrupt` if it is not a valid registry
	pub fn open<P: AsRef<Path>>(path: P) -> GuessResult<Self> {
		let path = path.as_ref().to_path_buf();
		let entries = if path.exists() {
			let bytes = std::fs::read(&path)?;
			serde_json::from_slice(&bytes).map_err(|e| DataError::Corrupt(e.to_string()))?
		} else {
			Vec::new()
		};
		Ok(Self {
			path,
			entries: Mutex::new(entries),
		})
	}

	/// Records a saved model and persists the registry.
	pub fn add_model(&self, model_type: &str, file_path: &Path, version: &str) -> GuessResult<RegistryEntry> {
		let mut entries = self.entries.lock().map_err(|_| GuessError::LockPoisoned("registry"))?;
		let entry = RegistryEntry {
			id: entries.iter().map(|e| e.id).max().unwrap_or(0) + 1,
			model_type: model_type.to_owned(),
			file_path: file_path.to_path_buf(),
			version: version.to_owned(),
			saved_at: Utc::now(),
		};
		entries.push(entry.clone());

		let bytes = serde_json::to_vec_pretty(&*entries).map_err(|e| DataError::Corrupt(e.to_string()))?;
		if let Err(e) = std::fs::write(&self.path, bytes) {
			entries.pop();
			return Err(e.into());
		}

		tracing::info!(id = entry.id, model_type, path = %file_path.display(), version, "Registered model");
		Ok(entry)
	}

	pub fn list_models(&self) -> GuessResult<Vec<RegistryEntry>> {
		let entries = self.entries.lock().map_err(|_| GuessError::LockPoisoned("registry"))?;
		Ok(entries.clone())
	}

	pub fn get_model(&self, id: u64) -> GuessResult<Option<RegistryEntry>> {
		let entries = self.entries.lock().map_err(|_| GuessError::LockPoisoned("registry"))?;
		Ok(entries.iter().find(|e| e.id == id).cloned())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn entries_survive_reopening() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("registry.json");

		let registry = ModelRegistry::open(&path).unwrap();
		let first = registry.add_model("NGramModel", Path::new("a.json"), "1.0").unwrap();
		let second = registry.add_model("NGramModel", Path::new("b.bin"), "1.1").unwrap();
		assert_eq!((first.id, second.id), (1, 2));

		let reopened = ModelRegistry::open(&path).unwrap();
		assert_eq!(reopened.list_models().unwrap(), vec![first, second.clone()]);
		assert_eq!(reopened.get_model(2).unwrap(), Some(second));
		assert_eq!(reopened.get_model(7).unwrap(), None);
	}

	#[test]
	fn corrupt_registry_is_reported() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("registry.json");
		std::fs::write(&path, "{not json").unwrap();
		assert!(matches!(ModelRegistry::open(&path), Err(GuessError::Data(DataError::Corrupt(_)))));
	}

	#[test]
	fn failed_write_does_not_keep_the_entry() {
		let dir = tempfile::tempdir().unwrap();
		let registry = ModelRegistry::open(dir.path().join("missing").join("registry.json")).unwrap();
		assert!(registry.add_model("NGramModel", Path::new("a.json"), "1.0").is_err());
		assert!(registry.list_models().unwrap().is_empty());
	}
}
