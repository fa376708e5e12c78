use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// Destination for generated candidates.
///
/// A whole batch is handed over at once so implementations can keep each
/// batch contiguous even when several workers append concurrently.
pub trait CandidateSink: Send + Sync {
	/// Appends every line, each terminated by `\n`.
	fn append_batch(&self, lines: &[String]) -> io::Result<()>;
}

/// Wraps any writer behind a mutex, one batch per lock.
///
/// Batches from different workers never interleave line by line, but the
/// order in which batches land is whatever order the workers finish in.
#[derive(Debug)]
pub struct WriterSink<W: Write + Send> {
	writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
	pub fn new(writer: W) -> Self {
		Self { writer: Mutex::new(writer) }
	}

	/// Returns the wrapped writer.
	pub fn into_inner(self) -> W {
		self.writer.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

impl WriterSink<File> {
	/// Opens `path` for appending, creating it if needed.
	pub fn append_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
		let file = OpenOptions::new().create(true).append(true).open(path)?;
		Ok(Self::new(file))
	}
}

impl WriterSink<Vec<u8>> {
	pub fn in_memory() -> Self {
		Self::new(Vec::new())
	}

	/// Lines written so far.
	pub fn lines(&self) -> Vec<String> {
		let buffer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		String::from_utf8_lossy(&buffer).lines().map(str::to_owned).collect()
	}
}

impl<W: Write + Send> CandidateSink for WriterSink<W> {
	fn append_batch(&self, lines: &[String]) -> io::Result<()> {
		let mut buffer = String::with_capacity(lines.iter().map(|line| line.len() + 1).sum());
		for line in lines {
			buffer.push_str(line);
			buffer.push('\n');
		}

		let mut writer = self
			.writer
			.lock()
			.map_err(|_| io::Error::other("candidate sink lock poisoned"))?;
		writer.write_all(buffer.as_bytes())?;
		writer.flush()
	}
}
