//! Adaptive n-gram password guessing.
//!
//! This crate closes the loop between a statistical password model and an
//! external cracking engine:
//! - Character-level n-gram models trained from a password corpus
//! - Concurrent candidate batch generation
//! - A subprocess adapter that runs the engine and counts recovered hashes
//! - Feedback that raises the model order while cracking success stays low
//!
//! Presentation layers (GUI, HTTP) are left to callers.

/// Run configuration (TOML) and validated settings.
pub mod config;

/// Cracking engine subprocess adapter.
pub mod engine;

/// Error taxonomy shared by every module.
pub mod error;

/// Corpus file helpers.
pub mod io;

/// Tracing setup and attempt loggers.
pub mod logging;

/// Password models and the adaptive generator.
pub mod model;

/// JSON-file registry of saved models.
pub mod registry;

/// One round of the generate / crack / adapt loop.
pub mod session;

/// Candidate sinks shared by generation workers.
pub mod sink;

pub use error::{ConfigError, DataError, GuessError, GuessResult};
pub use model::generator::{Adaptation, AdaptiveGenerator, ParallelReport};
pub use model::ngram_model::{ModelFormat, NGramModel};
pub use model::{AdjustableOrder, PasswordModel};
