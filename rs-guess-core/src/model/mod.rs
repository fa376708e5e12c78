//! Password models and the adaptive generator that drives them.
//!
//! This module provides:
//! - Fixed-order character n-gram models (`NGramModel`)
//! - Per-context transition distributions (`State`)
//! - The `PasswordModel` interface every generatable model implements
//! - The `AdjustableOrder` capability for models whose context order can be
//!   tuned at runtime
//! - A concurrent, feedback-driven batch generator (`AdaptiveGenerator`)

use std::io::Write;

use crate::error::GuessResult;

/// Concurrent batch generation with success-driven order adaptation.
pub mod generator;

/// Fixed-order n-gram model (`1 <= n <= 10`).
///
/// Handles corpus ingestion, transition normalization, weighted sampling,
/// corpus merging, rule export and persistence.
pub mod ngram_model;

/// Next-character distribution of a single context.
pub mod state;

/// A model the generator can sample passwords from.
///
/// Implementations must be shareable across generation workers: sampling
/// takes `&self` and may run on many threads at once.
pub trait PasswordModel: Send + Sync {
	/// Short type name recorded alongside saved models.
	fn model_type(&self) -> &'static str;

	/// Version tag of the model's current state.
	fn version(&self) -> &str;

	/// Produces one candidate of at most `length` characters.
	fn generate(&self, length: usize) -> GuessResult<String>;

	/// Writes the model as engine transformation rules.
	fn export_rules(&self, sink: &mut dyn Write) -> GuessResult<()>;

	/// Adds training data and rebuilds whatever the model derives from it.
	fn update(&mut self, corpus: Vec<String>) -> GuessResult<()>;

	/// Exposes the context order for adjustment, if the model has one.
	///
	/// Returns `None` by default; the generator then leaves the model alone
	/// when adapting.
	fn order_control(&mut self) -> Option<&mut dyn AdjustableOrder> {
		None
	}
}

/// Capability of models whose context order can be changed in place.
pub trait AdjustableOrder {
	fn order(&self) -> usize;

	/// Sets a new order. Implementations rebuild any order-dependent state.
	fn set_order(&mut self, order: usize) -> GuessResult<()>;
}
