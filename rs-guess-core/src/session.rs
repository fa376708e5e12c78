use std::path::PathBuf;

use crate::engine::CrackEngineAdapter;
use crate::error::GuessResult;
use crate::model::PasswordModel;
use crate::model::generator::{Adaptation, AdaptiveGenerator, ParallelReport};

/// What the engine attacks and where candidates are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackTarget {
	pub hash_file: PathBuf,
	/// Extra engine options, split on whitespace.
	pub options: String,
	/// File the generator's sink appends to.
	pub candidate_file: PathBuf,
}

/// Everything one generate / crack / adapt cycle produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundReport {
	pub generation: ParallelReport,
	pub recovered: usize,
	pub adaptation: Adaptation,
}

/// Runs one cycle of the guessing loop.
///
/// 1. `workers` batches are generated in parallel into the candidate file
/// 2. the engine is run against the target
/// 3. its recovered count is fed back to the generator
///
/// Worker failures are only reported; engine and adaptation errors abort the
/// round. Whether to run another round is up to the caller.
pub fn run_round<M: PasswordModel>(
	generator: &AdaptiveGenerator<M>,
	engine: &CrackEngineAdapter,
	target: &AttackTarget,
	length: usize,
	workers: usize,
) -> GuessResult<RoundReport> {
	let generation = generator.generate_batch_parallel(length, workers);
	if generation.failed > 0 {
		tracing::warn!(failed = generation.failed, workers, "Some generation workers failed");
	}

	let recovered = engine.run(&target.hash_file, &target.options, &target.candidate_file)?;
	let adaptation = generator.register_success(recovered)?;

	Ok(RoundReport {
		generation,
		recovered,
		adaptation,
	})
}
