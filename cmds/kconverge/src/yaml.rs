//! YAML document handling for manifest streams.
//!
//! Manifests arrive as multi-document YAML streams. The reconcile engine only
//! ever accepts a single document, so streams are split here first.

use serde_json::Value as JsonValue;

/// Error returned when a document cannot be decoded.
pub type YamlError = serde_yaml_with_quirks::Error;

/// Split a YAML stream into its individual documents.
///
/// Line endings are normalized to `\n` before splitting. A separator is a line
/// starting with `---` followed by nothing, whitespace or a comment. Documents
/// that contain only whitespace or comments are dropped.
pub fn split_documents(raw: &str) -> Vec<String> {
	let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");

	let mut documents = Vec::new();
	let mut current = String::new();

	for line in normalized.lines() {
		if is_separator(line) {
			push_document(&mut documents, std::mem::take(&mut current));
			continue;
		}
		current.push_str(line);
		current.push('\n');
	}
	push_document(&mut documents, current);

	documents
}

fn is_separator(line: &str) -> bool {
	match line.strip_prefix("---") {
		Some(rest) => {
			let rest = rest.trim_start();
			rest.is_empty() || rest.starts_with('#')
		}
		None => false,
	}
}

fn push_document(documents: &mut Vec<String>, document: String) {
	let has_content = document.lines().any(|line| {
		let line = line.trim();
		!line.is_empty() && !line.starts_with('#')
	});
	if has_content {
		documents.push(document);
	}
}

/// Decode a single YAML (or JSON) document into a JSON value.
///
/// Uses YAML 1.1 semantics to match what the Kubernetes tooling ecosystem
/// produces. Streams with more than one document are rejected.
pub fn decode_document(document: &str) -> Result<JsonValue, YamlError> {
	serde_yaml_with_quirks::from_str(document)
}
