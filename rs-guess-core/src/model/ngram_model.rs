use super::state::{State, TransitionCounts};
use super::{AdjustableOrder, PasswordModel};
use crate::error::{DataError, GuessError, GuessResult};
use rand::Rng;
use rand::prelude::IteratorRandom;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::mpsc;
use std::thread;

/// Smallest supported n-gram order (empty context).
pub const MIN_ORDER: usize = 1;

/// Largest supported n-gram order.
pub const MAX_ORDER: usize = 10;

/// Order used by `NGramModel::default()`.
pub const DEFAULT_ORDER: usize = 3;

/// Version tag stamped on models that were never saved.
pub const DEFAULT_VERSION: &str = "1.0";

/// Below this many corpus entries, counting stays on the calling thread.
const PARALLEL_TRAINING_THRESHOLD: usize = 4096;

/// Encoding used to persist a model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelFormat {
	/// Self-describing JSON object, field names `version`, `corpus`,
	/// `order` and `transitionTable`.
	Json,
	/// Compact postcard snapshot of the same record.
	Postcard,
}

impl ModelFormat {
	/// Picks the format from a file extension: `.bin` is postcard,
	/// everything else is JSON.
	pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
		match path.as_ref().extension().and_then(|ext| ext.to_str()) {
			Some("bin") => Self::Postcard,
			_ => Self::Json,
		}
	}
}

/// Character-level n-gram model of a password corpus.
///
/// The model owns its corpus and a transition table mapping every context
/// (the `order - 1` characters preceding a position) to a normalized
/// distribution over the character that follows it.
///
/// # Responsibilities
/// - Build the transition table from the corpus
/// - Generate weighted-random passwords
/// - Grow the corpus and rebuild the table
/// - Export hashcat-style rules and persist itself
///
/// # Invariants
/// - `MIN_ORDER <= order <= MAX_ORDER`
/// - Every key of `states` is exactly `order - 1` characters long
/// - Every state's weights sum to 1
/// - `states` is always derived from `corpus` in full, never patched
#[derive(Clone, Debug)]
pub struct NGramModel {
	version: String,
	corpus: Vec<String>,
	order: usize,
	states: BTreeMap<String, State>,
}

/// On-disk shape of a model.
///
/// Every field is optional so that a missing one can be reported by name
/// instead of as a generic decoding failure.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelRecord {
	version: Option<String>,
	corpus: Option<Vec<String>>,
	order: Option<usize>,
	transition_table: Option<BTreeMap<String, State>>,
}

impl Default for NGramModel {
	fn default() -> Self {
		Self {
			version: DEFAULT_VERSION.to_owned(),
			corpus: Vec::new(),
			order: DEFAULT_ORDER,
			states: BTreeMap::new(),
		}
	}
}

impl NGramModel {
	/// Creates an empty, untrained model of the given order.
	///
	/// # Errors
	/// Returns `InvalidOrder` if `order` is outside `1..=10`.
	pub fn new(order: usize) -> GuessResult<Self> {
		check_order(order)?;
		Ok(Self { order, ..Self::default() })
	}

	/// Creates a model and trains it on `corpus`.
	pub fn from_corpus(corpus: Vec<String>, order: usize) -> GuessResult<Self> {
		let mut model = Self::new(order)?;
		model.train(corpus, order)?;
		Ok(model)
	}

	pub fn order(&self) -> usize {
		self.order
	}

	pub fn version(&self) -> &str {
		&self.version
	}

	pub fn corpus(&self) -> &[String] {
		&self.corpus
	}

	/// Known contexts, in sorted order.
	pub fn contexts(&self) -> impl Iterator<Item = &str> {
		self.states.keys().map(String::as_str)
	}

	/// Next-character distribution of a context, if it was observed.
	pub fn distribution(&self, context: &str) -> Option<&State> {
		self.states.get(context)
	}

	pub fn is_trained(&self) -> bool {
		!self.states.is_empty()
	}

	/// Replaces the corpus and rebuilds the transition table.
	///
	/// Every window of `order` characters in every entry is split into a
	/// context (`order - 1` characters) and the character that follows it.
	/// Entries shorter than `order` contribute nothing.
	///
	/// Training on an empty corpus is allowed and leaves the table empty;
	/// sampling such a model fails later with `ModelState`.
	///
	/// # Errors
	/// Returns `InvalidOrder` if `order` is outside `1..=10`.
	pub fn train(&mut self, corpus: Vec<String>, order: usize) -> GuessResult<()> {
		check_order(order)?;
		self.corpus = corpus;
		self.order = order;
		self.rebuild();
		Ok(())
	}

	/// Appends `new_corpus` and retrains over the combined corpus.
	///
	/// The table is rebuilt from scratch at the current order.
	pub fn merge(&mut self, new_corpus: Vec<String>) {
		let added = new_corpus.len();
		self.corpus.extend(new_corpus);
		self.rebuild();
		tracing::info!(added, corpus = self.corpus.len(), contexts = self.states.len(), "Merged corpus into model");
	}

	fn rebuild(&mut self) {
		let counts = count_transitions(&self.corpus, self.order);
		self.states = counts
			.into_iter()
			.map(|(context, counts)| (context, counts.normalize()))
			.collect();
		tracing::debug!(order = self.order, corpus = self.corpus.len(), contexts = self.states.len(), "Rebuilt transition table");
	}

	/// Generates a password of at most `length` characters using the
	/// thread-local random generator.
	pub fn generate(&self, length: usize) -> GuessResult<String> {
		self.generate_with(length, &mut rand::rng())
	}

	/// Generates a password from a uniformly chosen known context.
	///
	/// The seed context forms the first characters of the result. If
	/// `length` does not exceed the seed length, the seed is returned as-is.
	///
	/// # Errors
	/// Returns `ModelState` if the model has no transitions.
	pub fn generate_with<R: Rng + ?Sized>(&self, length: usize, rng: &mut R) -> GuessResult<String> {
		let seed = self
			.states
			.keys()
			.choose(rng)
			.ok_or_else(|| GuessError::ModelState("model has not been trained on any n-gram".to_owned()))?;
		Ok(self.generate_from(seed, length, rng))
	}

	/// Extends `seed` one character at a time until it reaches `length`
	/// characters.
	///
	/// At each step the last `order - 1` characters select the distribution
	/// to sample from. Generation stops early, returning a shorter string,
	/// as soon as that context was never observed.
	pub fn generate_from<R: Rng + ?Sized>(&self, seed: &str, length: usize, rng: &mut R) -> String {
		let context_len = self.order - 1;
		let mut password: Vec<char> = seed.chars().collect();

		for _ in 0..length.saturating_sub(password.len()) {
			let start = password.len().saturating_sub(context_len);
			let context: String = password[start..].iter().collect();
			match self.states.get(&context).and_then(|state| state.predict(rng)) {
				Some(next_char) => password.push(next_char),
				None => break,
			}
		}

		password.into_iter().collect()
	}

	/// Writes one rule per transition:
	/// `[context]character # weight: <weight>`.
	///
	/// # Errors
	/// - `ModelState` if the model has no transitions
	/// - `Io` if the sink fails
	pub fn export_rules<W: Write + ?Sized>(&self, sink: &mut W) -> GuessResult<()> {
		if self.states.is_empty() {
			return Err(GuessError::ModelState("cannot export rules from an untrained model".to_owned()));
		}
		for (context, state) in &self.states {
			for (next_char, weight) in state.transitions() {
				writeln!(sink, "[{context}]{next_char} # weight: {weight:?}")?;
			}
		}
		sink.flush()?;
		Ok(())
	}

	/// Encodes version, corpus, order and transition table.
	pub fn serialize(&self, format: ModelFormat) -> GuessResult<Vec<u8>> {
		let record = ModelRecord {
			version: Some(self.version.clone()),
			corpus: Some(self.corpus.clone()),
			order: Some(self.order),
			transition_table: Some(self.states.clone()),
		};
		match format {
			ModelFormat::Json => serde_json::to_vec_pretty(&record).map_err(|e| DataError::Corrupt(e.to_string()).into()),
			ModelFormat::Postcard => postcard::to_stdvec(&record).map_err(|e| DataError::Corrupt(e.to_string()).into()),
		}
	}

	/// Decodes a model produced by [`NGramModel::serialize`].
	///
	/// The transition table is taken as stored, not retrained. A missing
	/// `version` falls back to the default tag.
	///
	/// # Errors
	/// - `DataError::Corrupt` if the bytes cannot be decoded
	/// - `DataError::MissingField` naming the absent field
	/// - `DataError::InvalidField` if a field has the wrong type, the order or
	///   a context length is off, or a context's weights are not a
	///   distribution
	pub fn deserialize(bytes: &[u8], format: ModelFormat) -> GuessResult<Self> {
		let record: ModelRecord = match format {
			ModelFormat::Json => record_from_json(bytes)?,
			ModelFormat::Postcard => postcard::from_bytes(bytes).map_err(|e| DataError::Corrupt(e.to_string()))?,
		};

		let corpus = record.corpus.ok_or(DataError::MissingField("corpus"))?;
		let order = record.order.ok_or(DataError::MissingField("order"))?;
		let states = record.transition_table.ok_or(DataError::MissingField("transitionTable"))?;

		if check_order(order).is_err() {
			return Err(DataError::InvalidField {
				field: "order",
				reason: format!("{order} is outside {MIN_ORDER}..={MAX_ORDER}"),
			}
			.into());
		}
		if let Some(context) = states.keys().find(|context| context.chars().count() != order - 1) {
			return Err(DataError::InvalidField {
				field: "transitionTable",
				reason: format!("context {context:?} is not {} characters long", order - 1),
			}
			.into());
		}
		for (context, state) in &states {
			check_distribution(context, state)?;
		}

		Ok(Self {
			version: record.version.unwrap_or_else(|| DEFAULT_VERSION.to_owned()),
			corpus,
			order,
			states,
		})
	}

	/// Stamps `version` and writes the model to `path`.
	///
	/// The encoding follows the extension, see [`ModelFormat::from_path`].
	pub fn save<P: AsRef<Path>>(&mut self, path: P, version: &str) -> GuessResult<()> {
		self.version = version.to_owned();
		let bytes = self.serialize(ModelFormat::from_path(&path))?;
		std::fs::write(&path, bytes)?;
		tracing::info!(path = %path.as_ref().display(), version, "Saved model");
		Ok(())
	}

	/// Reads a model written by [`NGramModel::save`].
	pub fn load<P: AsRef<Path>>(path: P) -> GuessResult<Self> {
		let bytes = std::fs::read(&path)?;
		let model = Self::deserialize(&bytes, ModelFormat::from_path(&path))?;
		tracing::info!(path = %path.as_ref().display(), version = %model.version, order = model.order, "Loaded model");
		Ok(model)
	}
}

impl AdjustableOrder for NGramModel {
	fn order(&self) -> usize {
		self.order
	}

	/// Changes the order and rebuilds the table from the current corpus.
	fn set_order(&mut self, order: usize) -> GuessResult<()> {
		check_order(order)?;
		self.order = order;
		self.rebuild();
		Ok(())
	}
}

impl PasswordModel for NGramModel {
	fn model_type(&self) -> &'static str {
		"NGramModel"
	}

	fn version(&self) -> &str {
		&self.version
	}

	fn generate(&self, length: usize) -> GuessResult<String> {
		NGramModel::generate(self, length)
	}

	fn export_rules(&self, sink: &mut dyn Write) -> GuessResult<()> {
		NGramModel::export_rules(self, sink)
	}

	fn update(&mut self, corpus: Vec<String>) -> GuessResult<()> {
		self.merge(corpus);
		Ok(())
	}

	fn order_control(&mut self) -> Option<&mut dyn AdjustableOrder> {
		Some(self)
	}
}

fn check_order(order: usize) -> GuessResult<()> {
	if (MIN_ORDER..=MAX_ORDER).contains(&order) {
		Ok(())
	} else {
		Err(GuessError::InvalidOrder(order))
	}
}

/// Tolerance on the sum of a stored context's weights.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Decodes a JSON model field by field, so a value of the wrong type is
/// reported against its field name.
fn record_from_json(bytes: &[u8]) -> Result<ModelRecord, DataError> {
	let mut object: serde_json::Map<String, serde_json::Value> =
		serde_json::from_slice(bytes).map_err(|e| DataError::Corrupt(e.to_string()))?;
	Ok(ModelRecord {
		version: take_json_field(&mut object, "version")?,
		corpus: take_json_field(&mut object, "corpus")?,
		order: take_json_field(&mut object, "order")?,
		transition_table: take_json_field(&mut object, "transitionTable")?,
	})
}

fn take_json_field<T: DeserializeOwned>(
	object: &mut serde_json::Map<String, serde_json::Value>,
	field: &'static str,
) -> Result<Option<T>, DataError> {
	match object.remove(field) {
		None | Some(serde_json::Value::Null) => Ok(None),
		Some(value) => serde_json::from_value(value)
			.map(Some)
			.map_err(|e| DataError::InvalidField {
				field,
				reason: e.to_string(),
			}),
	}
}

/// Stored weights must be finite, positive and sum to 1.
fn check_distribution(context: &str, state: &State) -> Result<(), DataError> {
	let invalid = |reason: String| DataError::InvalidField {
		field: "transitionTable",
		reason,
	};
	if state.is_empty() {
		return Err(invalid(format!("context {context:?} has no outcomes")));
	}
	if let Some((next_char, weight)) = state.transitions().find(|(_, w)| !w.is_finite() || *w <= 0.0) {
		return Err(invalid(format!("context {context:?} gives {next_char:?} weight {weight}")));
	}
	let total = state.total_weight();
	if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
		return Err(invalid(format!("weights of context {context:?} sum to {total}")));
	}
	Ok(())
}

/// Counts (context, next character) pairs over the whole corpus.
///
/// Large corpora are split into chunks counted on scoped threads; partial
/// counts are then merged, which gives the same totals as a single pass.
fn count_transitions(corpus: &[String], order: usize) -> BTreeMap<String, TransitionCounts> {
	if corpus.len() < PARALLEL_TRAINING_THRESHOLD {
		return count_chunk(corpus, order);
	}

	let chunks = num_cpus::get() * 8;
	let chunk_size = corpus.len().div_ceil(chunks);

	let (tx, rx) = mpsc::channel();
	thread::scope(|scope| {
		for chunk in corpus.chunks(chunk_size) {
			let tx = tx.clone();
			scope.spawn(move || {
				// The receiver outlives the scope, send cannot fail
				let _ = tx.send(count_chunk(chunk, order));
			});
		}
	});
	drop(tx);

	let mut merged: BTreeMap<String, TransitionCounts> = BTreeMap::new();
	for partial in rx.iter() {
		for (context, counts) in partial {
			merged.entry(context).or_default().merge(&counts);
		}
	}
	merged
}

fn count_chunk(chunk: &[String], order: usize) -> BTreeMap<String, TransitionCounts> {
	let mut counts: BTreeMap<String, TransitionCounts> = BTreeMap::new();
	for entry in chunk {
		let chars: Vec<char> = entry.chars().collect();
		if chars.len() < order {
			continue;
		}
		for window in chars.windows(order) {
			let (context, next) = window.split_at(order - 1);
			counts
				.entry(context.iter().collect())
				.or_default()
				.add_transition(next[0]);
		}
	}
	counts
}
