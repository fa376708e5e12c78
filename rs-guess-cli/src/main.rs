use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};

use rs_guess_core::config::RunConfig;
use rs_guess_core::engine::{CrackEngineAdapter, ProgressCallback};
use rs_guess_core::io::{build_output_path, read_corpus};
use rs_guess_core::logging::{self, AttemptLogger, SessionLog, TracingAttemptLogger};
use rs_guess_core::registry::ModelRegistry;
use rs_guess_core::session::{self, AttackTarget};
use rs_guess_core::sink::WriterSink;
use rs_guess_core::{AdaptiveGenerator, GuessError, NGramModel, PasswordModel};

/// Adaptive n-gram password generation driven by cracking feedback.
#[derive(Parser)]
#[command(name = "rs-guess", version)]
struct Cli {
    /// TOML run configuration
    #[arg(long, global = true, env = "RS_GUESS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a model from a password list and save it
    Train {
        /// Password list, one entry per line
        #[arg(long)]
        corpus: PathBuf,
        /// Model file to write (`.bin` for postcard, JSON otherwise)
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        order: Option<usize>,
        #[command(flatten)]
        persist: PersistArgs,
    },
    /// Add passwords to a saved model and retrain it
    Merge {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        corpus: PathBuf,
        #[command(flatten)]
        persist: PersistArgs,
    },
    /// Export a saved model as engine rules
    Rules {
        #[arg(long)]
        model: PathBuf,
        /// Defaults to the model path with a `.rule` extension
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Generate candidates without running the engine
    Generate {
        #[arg(long)]
        model: PathBuf,
        #[command(flatten)]
        generation: GenerationArgs,
    },
    /// Run generate / crack / adapt rounds
    Attack {
        #[arg(long)]
        model: PathBuf,
        /// Hash list handed to the engine
        #[arg(long)]
        hash_file: PathBuf,
        /// Number of rounds to run
        #[arg(long, default_value_t = 1)]
        rounds: usize,
        /// Run the engine once per mask instead of once per round
        #[arg(long = "mask")]
        masks: Vec<String>,
        /// Engine executable
        #[arg(long)]
        engine: Option<String>,
        /// Extra engine options, space separated
        #[arg(long, allow_hyphen_values = true)]
        options: Option<String>,
        #[arg(long)]
        threshold: Option<usize>,
        /// Export the adapted model's rules here after the last round
        #[arg(long)]
        rules: Option<PathBuf>,
        /// Save the adapted model back to its file after the last round
        #[arg(long)]
        save: bool,
        #[command(flatten)]
        generation: GenerationArgs,
        #[command(flatten)]
        persist: PersistArgs,
    },
    /// List models recorded in the registry
    Models {
        #[arg(long, default_value = "models.json")]
        registry: PathBuf,
        /// Show only the entry with this id
        #[arg(long)]
        id: Option<u64>,
    },
}

#[derive(Args)]
struct GenerationArgs {
    /// Requested candidate length
    #[arg(long)]
    length: Option<usize>,
    /// Candidates per worker batch
    #[arg(long)]
    batch_size: Option<usize>,
    /// Parallel generation workers
    #[arg(long)]
    workers: Option<usize>,
    /// File candidates are appended to
    #[arg(long)]
    candidates: Option<PathBuf>,
}

#[derive(Args)]
struct PersistArgs {
    /// Version tag stamped on the saved model
    #[arg(long = "model-version")]
    version: Option<String>,
    /// Registry file recording saved models
    #[arg(long)]
    registry: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(cli).map_err(|err| {
        let code = err.downcast_ref::<GuessError>().map(GuessError::error_code);
        match code {
            Some(code) => err.context(format!("failed with {code}")),
            None => err,
        }
    })
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };

    let filter = config
        .logging
        .filter
        .clone()
        .unwrap_or_else(|| logging::DEFAULT_FILTER.to_owned());
    logging::init(&filter);

    let logger: Arc<dyn AttemptLogger> = match &config.logging.session_log {
        Some(path) => Arc::new(
            SessionLog::open(path)
                .with_context(|| format!("cannot open session log {}", path.display()))?,
        ),
        None => Arc::new(TracingAttemptLogger),
    };

    match cli.command {
        Command::Train {
            corpus,
            output,
            order,
            persist,
        } => {
            if let Some(order) = order {
                config.model.set_order(order)?;
            }
            let passwords = read_corpus(&corpus)
                .with_context(|| format!("cannot read corpus {}", corpus.display()))?;
            let mut model = NGramModel::from_corpus(passwords, config.model.order())?;
            if !model.is_trained() {
                tracing::warn!(corpus = %corpus.display(), "Corpus produced no n-grams");
            }
            save_model(&mut model, &output, &config, &persist)?;
        }
        Command::Merge {
            model: path,
            corpus,
            persist,
        } => {
            let passwords = read_corpus(&corpus)
                .with_context(|| format!("cannot read corpus {}", corpus.display()))?;
            let mut model = NGramModel::load(&path)?;
            model.merge(passwords);
            save_model(&mut model, &path, &config, &persist)?;
        }
        Command::Rules { model: path, output } => {
            let output = match output {
                Some(output) => output,
                None => build_output_path(&path, "rule")?,
            };
            let model = NGramModel::load(&path)?;
            let mut writer = BufWriter::new(
                File::create(&output)
                    .with_context(|| format!("cannot create {}", output.display()))?,
            );
            model.export_rules(&mut writer)?;
            writer.flush()?;
            println!("{}", output.display());
        }
        Command::Generate {
            model: path,
            generation,
        } => {
            generation.apply(&mut config)?;
            let generator = build_generator(&path, &config, logger)?;
            let report = generator
                .generate_batch_parallel(config.generator.length, config.generator.workers());
            println!(
                "{} candidates written to {} ({} of {} workers failed)",
                report.written,
                config.generator.candidate_file.display(),
                report.failed,
                report.workers
            );
        }
        Command::Attack {
            model: path,
            hash_file,
            rounds,
            masks,
            engine,
            options,
            threshold,
            rules,
            save,
            generation,
            persist,
        } => {
            generation.apply(&mut config)?;
            if let Some(engine) = engine {
                config.engine.program = engine;
            }
            if let Some(options) = options {
                config.engine.options = options;
            }
            if let Some(threshold) = threshold {
                config.generator.success_threshold = threshold;
            }
            if rounds == 0 {
                bail!("at least one round is required");
            }

            let generator = build_generator(&path, &config, logger.clone())?;
            let progress: ProgressCallback =
                Arc::new(|line: &str| tracing::info!(target: "rs_guess::engine", "{line}"));
            let engine = CrackEngineAdapter::new(&config.engine, progress, logger);
            tracing::info!(engine = engine.program(), rounds, masks = masks.len(), "Starting attack");
            let target = AttackTarget {
                hash_file,
                options: config.engine.options.clone(),
                candidate_file: config.generator.candidate_file.clone(),
            };

            for round in 1..=rounds {
                if masks.is_empty() {
                    let report = session::run_round(
                        &generator,
                        &engine,
                        &target,
                        config.generator.length,
                        config.generator.workers(),
                    )?;
                    println!(
                        "round {round}: {} candidates, {} recovered, {:?}",
                        report.generation.written, report.recovered, report.adaptation
                    );
                } else {
                    let generation = generator
                        .generate_batch_parallel(config.generator.length, config.generator.workers());
                    let outcomes = engine.run_with_masks(
                        &target.hash_file,
                        &target.options,
                        &target.candidate_file,
                        &masks,
                    )?;
                    for outcome in &outcomes {
                        println!("round {round}: mask {} recovered {}", outcome.mask, outcome.recovered);
                    }
                    let recovered: usize = outcomes.iter().map(|o| o.recovered).sum();
                    let adaptation = generator.register_success(recovered)?;
                    println!(
                        "round {round}: {} candidates, {recovered} recovered, {adaptation:?}",
                        generation.written
                    );
                }
            }

            if let Some(rules) = &rules {
                generator.export_rules(rules)?;
                println!("rules written to {}", rules.display());
            }

            if save {
                let model = Arc::clone(generator.model());
                drop(generator);
                let mut model = Arc::try_unwrap(model)
                    .map_err(|_| anyhow::anyhow!("model is still shared"))?
                    .into_inner()
                    .map_err(|_| anyhow::anyhow!("model lock poisoned"))?;
                save_model(&mut model, &path, &config, &persist)?;
            }
        }
        Command::Models { registry, id } => {
            let registry = ModelRegistry::open(&registry)?;
            let entries = match id {
                Some(id) => match registry.get_model(id)? {
                    Some(entry) => vec![entry],
                    None => bail!("no model with id {id} in the registry"),
                },
                None => registry.list_models()?,
            };
            for entry in entries {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    entry.id,
                    entry.model_type,
                    entry.version,
                    entry.saved_at.to_rfc3339(),
                    entry.file_path.display()
                );
            }
        }
    }

    Ok(())
}

impl GenerationArgs {
    fn apply(&self, config: &mut RunConfig) -> anyhow::Result<()> {
        if let Some(length) = self.length {
            config.generator.length = length;
        }
        if let Some(batch_size) = self.batch_size {
            config.generator.set_batch_size(batch_size)?;
        }
        if let Some(workers) = self.workers {
            config.generator.set_workers(workers)?;
        }
        if let Some(candidates) = &self.candidates {
            config.generator.candidate_file = candidates.clone();
        }
        Ok(())
    }
}

fn build_generator(
    path: &Path,
    config: &RunConfig,
    logger: Arc<dyn AttemptLogger>,
) -> anyhow::Result<AdaptiveGenerator<NGramModel>> {
    let model = NGramModel::load(path)?;
    let sink = WriterSink::append_file(&config.generator.candidate_file).with_context(|| {
        format!(
            "cannot open candidate file {}",
            config.generator.candidate_file.display()
        )
    })?;
    Ok(AdaptiveGenerator::new(
        Arc::new(RwLock::new(model)),
        Arc::new(sink),
        config.generator.batch_size(),
        logger,
    )
    .with_success_threshold(config.generator.success_threshold))
}

fn save_model(
    model: &mut NGramModel,
    path: &Path,
    config: &RunConfig,
    persist: &PersistArgs,
) -> anyhow::Result<()> {
    let version = persist
        .version
        .clone()
        .unwrap_or_else(|| config.model.version.clone());
    model.save(path, &version)?;
    if let Some(registry) = &persist.registry {
        ModelRegistry::open(registry)?.add_model(model.model_type(), path, &version)?;
    }
    println!(
        "{} (order {}, {} entries, {} contexts) saved to {}",
        model.model_type(),
        model.order(),
        model.corpus().len(),
        model.contexts().count(),
        path.display()
    );
    Ok(())
}
