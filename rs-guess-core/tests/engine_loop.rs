//! End-to-end tests of the guessing loop against a shell-script engine.
//!
//! The stub is run through `sh` so the script itself never needs the exec
//! bit; `mode_args` carries the script path followed by the usual mode flag.

#![cfg(unix)]

use std::error::Error;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use rs_guess_core::config::EngineSettings;
use rs_guess_core::engine::{CrackEngineAdapter, MaskOutcome};
use rs_guess_core::logging::TracingAttemptLogger;
use rs_guess_core::session::{self, AttackTarget};
use rs_guess_core::sink::WriterSink;
use rs_guess_core::{Adaptation, AdaptiveGenerator, ConfigError, GuessError, NGramModel};

struct Stub {
	_dir: tempfile::TempDir,
	root: PathBuf,
	engine: CrackEngineAdapter,
	lines: Arc<Mutex<Vec<String>>>,
}

impl Stub {
	/// Writes `body` as the engine script. `$ARGS_FILE` receives one line of
	/// arguments per invocation.
	fn new(body: &str) -> Self {
		let dir = tempfile::tempdir().expect("tempdir");
		let root = dir.path().to_path_buf();
		let script = root.join("engine.sh");
		let args_file = root.join("args.txt");
		let text = format!("ARGS_FILE='{}'\necho \"$@\" >> \"$ARGS_FILE\"\n{body}\n", args_file.display());
		std::fs::write(&script, text).expect("write stub");

		let settings = EngineSettings {
			program: "sh".to_owned(),
			mode_args: vec![script.display().to_string(), "-m".to_owned(), "0".to_owned()],
			options: String::new(),
		};
		let lines = Arc::new(Mutex::new(Vec::new()));
		let progress_lines = lines.clone();
		let engine = CrackEngineAdapter::new(
			&settings,
			Arc::new(move |line: &str| progress_lines.lock().unwrap().push(line.to_owned())),
			Arc::new(TracingAttemptLogger),
		);

		Self {
			_dir: dir,
			root,
			engine,
			lines,
		}
	}

	fn path(&self, name: &str) -> PathBuf {
		self.root.join(name)
	}

	fn invocations(&self) -> Vec<String> {
		std::fs::read_to_string(self.path("args.txt"))
			.unwrap_or_default()
			.lines()
			.map(str::to_owned)
			.collect()
	}
}

fn touch(path: &Path, content: &str) {
	std::fs::write(path, content).expect("write fixture");
}

#[test]
fn counts_markers_across_both_streams() {
	let stub = Stub::new(
		r#"
echo "Session..........: stub"
echo "Recovered........: 1/4 (25.00%)"
echo "Recovered........: 2/4 (50.00%)" >&2
echo "Progress.........: 10/10"
echo "warning: something" >&2
echo "Recovered........: 3/4 (75.00%)"
"#,
	);
	let hashes = stub.path("hashes.txt");
	let candidates = stub.path("candidates.txt");
	touch(&hashes, "");
	touch(&candidates, "");

	let recovered = stub.engine.run(&hashes, "", &candidates).unwrap();
	assert_eq!(recovered, 3);

	let lines = stub.lines.lock().unwrap();
	assert_eq!(lines.len(), 6);
	assert!(lines.iter().any(|line| line == "warning: something"));
}

#[test]
fn builds_the_expected_command_line() {
	let stub = Stub::new("exit 0");
	let hashes = stub.path("hashes.txt");
	let candidates = stub.path("candidates.txt");

	stub.engine.run(&hashes, "--force  -O", &candidates).unwrap();

	assert_eq!(
		stub.invocations(),
		vec![format!("-m 0 {} {} --force -O", hashes.display(), candidates.display())]
	);
}

#[test]
fn non_zero_exit_still_reports_count() {
	let stub = Stub::new("echo 'Recovered: 1/1'\nexit 1");
	let recovered = stub
		.engine
		.run(&stub.path("h.txt"), "", &stub.path("c.txt"))
		.unwrap();
	assert_eq!(recovered, 1);
}

#[test]
fn masks_run_sequentially_with_the_same_command() {
	let stub = Stub::new("echo 'Recovered: x'");
	let masks = vec!["?d?d?d".to_owned(), "?l?l?l".to_owned(), "?u?u?u".to_owned()];

	let outcomes = stub
		.engine
		.run_with_masks(&stub.path("h.txt"), "", &stub.path("c.txt"), &masks)
		.unwrap();

	assert_eq!(
		outcomes,
		masks
			.iter()
			.map(|mask| MaskOutcome {
				mask: mask.clone(),
				recovered: 1,
			})
			.collect::<Vec<_>>()
	);
	let invocations = stub.invocations();
	assert_eq!(invocations.len(), 3);
	assert!(invocations.iter().all(|args| args == &invocations[0]));
}

fn engine_at(program: &Path) -> CrackEngineAdapter {
	let settings = EngineSettings {
		program: program.display().to_string(),
		..EngineSettings::default()
	};
	CrackEngineAdapter::new(&settings, Arc::new(|_: &str| {}), Arc::new(TracingAttemptLogger))
}

fn assert_spawn_error(err: GuessError) {
	assert_eq!(err.error_code(), "GUESS-ENGINE-SPAWN");
	match &err {
		GuessError::Config(config @ ConfigError::Spawn { .. }) => assert!(config.source().is_some()),
		other => panic!("unexpected {other:?}"),
	}
}

#[test]
fn explicit_path_without_exec_bit_cannot_spawn() {
	let dir = tempfile::tempdir().unwrap();
	let fake = dir.path().join("hashcat");
	touch(&fake, "not a program");

	let err = engine_at(&fake).run(Path::new("h"), "", Path::new("c")).unwrap_err();
	assert_spawn_error(err);
}

#[test]
fn executable_the_os_refuses_to_start_is_a_spawn_error() {
	let dir = tempfile::tempdir().unwrap();
	let fake = dir.path().join("hashcat");
	// The interpreter does not exist, so exec fails with ENOENT
	touch(&fake, "#!/nonexistent/rs-guess/interpreter\n\u{1}\u{2}garbage\n");
	std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

	let err = engine_at(&fake).run(Path::new("h"), "", Path::new("c")).unwrap_err();
	assert_spawn_error(err);
}

#[test]
fn round_generates_cracks_and_adapts() {
	// Reports two recovered hashes per run, below the default threshold of 5
	let stub = Stub::new("echo 'Recovered: a'\necho 'Recovered: b' >&2");
	let candidate_file = stub.path("candidates.txt");
	let hash_file = stub.path("hashes.txt");
	touch(&hash_file, "");

	let corpus = ["abcab", "abcad", "password123", "qwertyuiop"]
		.iter()
		.map(|s| (*s).to_owned())
		.collect();
	let model = Arc::new(RwLock::new(NGramModel::from_corpus(corpus, 3).unwrap()));
	let sink = Arc::new(WriterSink::append_file(&candidate_file).unwrap());
	let generator = AdaptiveGenerator::new(model.clone(), sink, 25, Arc::new(TracingAttemptLogger));
	let target = AttackTarget {
		hash_file,
		options: String::new(),
		candidate_file: candidate_file.clone(),
	};

	let first = session::run_round(&generator, &stub.engine, &target, 8, 4).unwrap();
	assert_eq!(first.generation.written, 100);
	assert_eq!(first.recovered, 2);
	assert_eq!(first.adaptation, Adaptation::Increased { from: 3, to: 4 });

	let second = session::run_round(&generator, &stub.engine, &target, 8, 2).unwrap();
	assert_eq!(second.adaptation, Adaptation::Increased { from: 4, to: 5 });
	assert_eq!(model.read().unwrap().order(), 5);
	assert_eq!(generator.success_count(), 2);

	let written = std::fs::read_to_string(&candidate_file).unwrap();
	assert_eq!(written.lines().count(), 150);
	assert!(written.lines().all(|line| line.chars().count() <= 8));
}

#[test]
fn round_with_high_success_keeps_order() {
	let stub = Stub::new("for i in 1 2 3 4 5 6; do echo \"Recovered: $i\"; done");
	let corpus = vec!["letmein".to_owned(), "trustno1".to_owned()];
	let model = Arc::new(RwLock::new(NGramModel::from_corpus(corpus, 2).unwrap()));
	let generator = AdaptiveGenerator::new(
		model,
		Arc::new(WriterSink::append_file(stub.path("c.txt")).unwrap()),
		5,
		Arc::new(TracingAttemptLogger),
	);
	let target = AttackTarget {
		hash_file: stub.path("h.txt"),
		options: String::new(),
		candidate_file: stub.path("c.txt"),
	};

	let report = session::run_round(&generator, &stub.engine, &target, 6, 1).unwrap();
	assert_eq!(report.recovered, 6);
	assert_eq!(report.adaptation, Adaptation::Unchanged { order: Some(2) });
}
