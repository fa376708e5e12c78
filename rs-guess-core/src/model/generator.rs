use crate::error::{GuessError, GuessResult};
use crate::logging::AttemptLogger;
use crate::model::PasswordModel;
use crate::model::ngram_model::MAX_ORDER;
use crate::sink::CandidateSink;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread;

/// Success threshold used unless the caller picks another one.
pub const DEFAULT_SUCCESS_THRESHOLD: usize = 5;

/// Result of one adaptation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adaptation {
	/// The model order was raised.
	Increased { from: usize, to: usize },
	/// The model was left as it was. `order` is `None` for models that do
	/// not expose an adjustable order.
	Unchanged { order: Option<usize> },
}

/// Outcome of a parallel generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParallelReport {
	/// Number of workers launched.
	pub workers: usize,
	/// Workers whose batch failed or panicked.
	pub failed: usize,
	/// Candidates written by the successful workers.
	pub written: usize,
}

#[derive(Debug)]
struct AdaptationState {
	success_count: usize,
	success_threshold: usize,
}

/// Generates candidate batches from a shared model and adapts the model's
/// order from cracking feedback.
///
/// # Responsibilities
/// - Write batches of `batch_size` candidates to the sink, optionally from
///   several workers at once
/// - Record the last observed success count
/// - Raise the model order by one (up to 10) while success stays below the
///   threshold
///
/// # Concurrency
/// - Generation only takes a read lock on the model
/// - Registration and adaptation are serialized by one mutex and take the
///   model write lock to change its order
pub struct AdaptiveGenerator<M: PasswordModel> {
	model: Arc<RwLock<M>>,
	sink: Arc<dyn CandidateSink>,
	batch_size: usize,
	logger: Arc<dyn AttemptLogger>,
	adaptation: Mutex<AdaptationState>,
}

impl<M: PasswordModel> AdaptiveGenerator<M> {
	/// Creates a generator with the default success threshold.
	pub fn new(
		model: Arc<RwLock<M>>,
		sink: Arc<dyn CandidateSink>,
		batch_size: usize,
		logger: Arc<dyn AttemptLogger>,
	) -> Self {
		Self {
			model,
			sink,
			batch_size,
			logger,
			adaptation: Mutex::new(AdaptationState {
				success_count: 0,
				success_threshold: DEFAULT_SUCCESS_THRESHOLD,
			}),
		}
	}

	/// Replaces the success threshold. Only available before the generator
	/// is shared.
	pub fn with_success_threshold(self, success_threshold: usize) -> Self {
		let mut state = self.adaptation.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
		state.success_threshold = success_threshold;
		Self {
			adaptation: Mutex::new(state),
			..self
		}
	}

	pub fn model(&self) -> &Arc<RwLock<M>> {
		&self.model
	}

	pub fn batch_size(&self) -> usize {
		self.batch_size
	}

	/// Last count passed to [`AdaptiveGenerator::register_success`].
	pub fn success_count(&self) -> usize {
		self.lock_state_or_recover().success_count
	}

	pub fn success_threshold(&self) -> usize {
		self.lock_state_or_recover().success_threshold
	}

	/// Generates `batch_size` candidates of at most `length` characters and
	/// appends them to the sink.
	///
	/// On failure, one failed attempt is logged and the error is returned.
	/// Nothing is retried.
	///
	/// # Returns
	/// The number of candidates written.
	pub fn generate_batch(&self, length: usize) -> GuessResult<usize> {
		let result = self.produce_batch(length);
		if let Err(e) = &result {
			self.logger.log_failed_attempts(1);
			tracing::warn!(error = %e, length, "Batch generation failed");
		}
		result
	}

	fn produce_batch(&self, length: usize) -> GuessResult<usize> {
		let batch = {
			let model = self.model.read().map_err(|_| GuessError::LockPoisoned("model"))?;
			(0..self.batch_size)
				.map(|_| model.generate(length))
				.collect::<GuessResult<Vec<String>>>()?
		};
		self.sink.append_batch(&batch)?;
		Ok(batch.len())
	}

	/// Runs `workers` full batches concurrently.
	///
	/// Every worker writes a complete `batch_size` batch, so up to
	/// `workers * batch_size` candidates are produced. A failing or
	/// panicking worker is counted and logged; its siblings keep going.
	/// Returns once every worker has finished.
	pub fn generate_batch_parallel(&self, length: usize, workers: usize) -> ParallelReport {
		let mut report = ParallelReport {
			workers,
			..ParallelReport::default()
		};

		thread::scope(|scope| {
			let handles: Vec<_> = (0..workers)
				.map(|_| scope.spawn(move || self.generate_batch(length)))
				.collect();

			for (worker, handle) in handles.into_iter().enumerate() {
				match handle.join() {
					Ok(Ok(written)) => report.written += written,
					Ok(Err(_)) => report.failed += 1,
					Err(_) => {
						self.logger.log_failed_attempts(1);
						tracing::error!(worker, "Generation worker panicked");
						report.failed += 1;
					}
				}
			}
		});

		tracing::info!(
			workers = report.workers,
			failed = report.failed,
			written = report.written,
			"Parallel generation finished"
		);
		report
	}

	/// Records the success count of the last cracking run and adapts.
	pub fn register_success(&self, success_count: usize) -> GuessResult<Adaptation> {
		let mut state = self.lock_state()?;
		state.success_count = success_count;
		self.logger.log_successful_attempts(success_count);
		self.adapt(&state)
	}

	/// Adapts the model order from the currently recorded success count.
	///
	/// Below the threshold, a model exposing `AdjustableOrder` gets its order
	/// raised by one, capped at 10. At or above the threshold nothing
	/// changes.
	pub fn adapt_strategy(&self) -> GuessResult<Adaptation> {
		let state = self.lock_state()?;
		self.adapt(&state)
	}

	fn adapt(&self, state: &AdaptationState) -> GuessResult<Adaptation> {
		let mut model = self.model.write().map_err(|_| GuessError::LockPoisoned("model"))?;
		let Some(control) = model.order_control() else {
			tracing::debug!("Model has no adjustable order, nothing to adapt");
			return Ok(Adaptation::Unchanged { order: None });
		};

		let order = control.order();
		if state.success_count >= state.success_threshold || order >= MAX_ORDER {
			tracing::debug!(
				order,
				success_count = state.success_count,
				success_threshold = state.success_threshold,
				"Model order unchanged"
			);
			return Ok(Adaptation::Unchanged { order: Some(order) });
		}

		let next = order + 1;
		control.set_order(next)?;
		tracing::info!(
			from = order,
			to = next,
			success_count = state.success_count,
			success_threshold = state.success_threshold,
			"Raised model order"
		);
		Ok(Adaptation::Increased { from: order, to: next })
	}

	/// Writes the model's rules to a new file at `path`.
	///
	/// On failure, one failed attempt is logged and the error is returned.
	pub fn export_rules<P: AsRef<Path>>(&self, path: P) -> GuessResult<()> {
		let result = self.write_rules(path.as_ref());
		if let Err(e) = &result {
			self.logger.log_failed_attempts(1);
			tracing::warn!(path = %path.as_ref().display(), error = %e, "Rule export failed");
		}
		result
	}

	fn write_rules(&self, path: &Path) -> GuessResult<()> {
		let mut writer = BufWriter::new(File::create(path)?);
		let model = self.model.read().map_err(|_| GuessError::LockPoisoned("model"))?;
		model.export_rules(&mut writer)?;
		writer.flush()?;
		tracing::info!(path = %path.display(), model_type = model.model_type(), version = model.version(), "Exported rules");
		Ok(())
	}

	fn lock_state(&self) -> GuessResult<MutexGuard<'_, AdaptationState>> {
		self.adaptation.lock().map_err(|_| GuessError::LockPoisoned("adaptation state"))
	}

	fn lock_state_or_recover(&self) -> MutexGuard<'_, AdaptationState> {
		self.adaptation.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}
