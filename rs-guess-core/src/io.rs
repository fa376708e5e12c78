use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Reads a password list and returns one entry per line.
///
/// - Reads the entire file into memory
/// - Splits on `\n` / `\r\n`
/// - Invalid UTF-8 sequences are replaced, so leaked lists with mixed
///   encodings still load
pub fn read_corpus<P: AsRef<Path>>(filename: P) -> io::Result<Vec<String>> {
	let bytes = fs::read(filename)?;
	Ok(String::from_utf8_lossy(&bytes).lines().map(str::to_owned).collect())
}

/// Builds an output path based on an input path and a new extension.
///
/// Example:
/// `models/rockyou.json` + `"rule"` → `models/rockyou.rule`
pub fn build_output_path<P: AsRef<Path>>(
	input_path: P,
	output_extension: &str,
) -> io::Result<PathBuf> {
	let input_path = input_path.as_ref();

	let parent = input_path.parent().unwrap_or_else(|| Path::new("."));
	let file_stem = input_path
		.file_stem()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Input path has no filename"))?;

	let mut output = PathBuf::from(parent);
	output.push(file_stem);
	output.set_extension(output_extension);

	Ok(output)
}
