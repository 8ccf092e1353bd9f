//! Utilities for command handlers.

use std::{
	fs,
	io::{self, ErrorKind, IsTerminal, Read, Write},
};

use anyhow::{Context, Result};
use clap::ValueEnum;

/// Controls ANSI colour in command output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
	/// Colour when stdout is a terminal.
	#[default]
	Auto,
	Always,
	Never,
}

impl ColorMode {
	pub fn should_colorize(self) -> bool {
		match self {
			ColorMode::Auto => io::stdout().is_terminal(),
			ColorMode::Always => true,
			ColorMode::Never => false,
		}
	}
}

/// Read manifests from `path`, or from stdin when `path` is `-`.
pub fn read_manifests(path: &str) -> Result<String> {
	if path == "-" {
		let mut buf = String::new();
		io::stdin()
			.read_to_string(&mut buf)
			.context("reading manifests from stdin")?;
		return Ok(buf);
	}
	fs::read_to_string(path).with_context(|| format!("reading manifests from {path}"))
}

/// A writer wrapper that silently handles broken pipe errors.
///
/// Lets commands exit cleanly when output is piped to a process that closes
/// early (e.g. `kconverge services web | head -1`).
pub struct BrokenPipeGuard<W> {
	inner: W,
}

impl<W> BrokenPipeGuard<W> {
	pub fn new(inner: W) -> Self {
		Self { inner }
	}
}

impl<W: Write> Write for BrokenPipeGuard<W> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		match self.inner.write(buf) {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(buf.len()),
			other => other,
		}
	}

	fn flush(&mut self) -> io::Result<()> {
		match self.inner.flush() {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
			other => other,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct BrokenPipeWriter;

	impl Write for BrokenPipeWriter {
		fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
			Err(io::Error::new(ErrorKind::BrokenPipe, "broken pipe"))
		}

		fn flush(&mut self) -> io::Result<()> {
			Err(io::Error::new(ErrorKind::BrokenPipe, "broken pipe"))
		}
	}

	#[test]
	fn test_broken_pipe_is_swallowed() {
		let mut guard = BrokenPipeGuard::new(BrokenPipeWriter);
		writeln!(guard, "deployment: web (1/1) Ready").unwrap();
		guard.flush().unwrap();
	}

	#[test]
	fn test_read_manifests_from_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("app.yaml");
		fs::write(&path, "kind: ConfigMap\n").unwrap();

		let content = read_manifests(path.to_str().unwrap()).unwrap();
		assert_eq!(content, "kind: ConfigMap\n");
		assert!(read_manifests(dir.path().join("missing.yaml").to_str().unwrap()).is_err());
	}

	#[test]
	fn test_color_mode_overrides() {
		assert!(ColorMode::Always.should_colorize());
		assert!(!ColorMode::Never.should_colorize());
	}
}
