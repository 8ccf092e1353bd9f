//! Decoding of single-document resource manifests.

use kube::core::GroupVersionKind;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

use super::discovery::gvk_from_manifest;
use crate::yaml::{decode_document, YamlError};

/// Namespace used when neither the caller nor the document names one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Errors that can occur while decoding a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
	#[error("decoding manifest")]
	Decode(#[source] YamlError),

	#[error("manifest is not a single resource object")]
	NotAnObject,

	#[error("manifest missing apiVersion or kind")]
	MissingTypeMeta,

	#[error("manifest missing metadata.name")]
	MissingName,
}

/// A single parsed resource document.
///
/// The object itself is kept schema-less; only the fields needed to resolve
/// coordinates are pulled out.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedManifest {
	gvk: GroupVersionKind,
	name: String,
	object: JsonValue,
}

impl DecodedManifest {
	/// Decode one YAML or JSON document.
	///
	/// Multi-document streams are rejected; split them with
	/// [`crate::yaml::split_documents`] first.
	pub fn decode(raw: &str) -> Result<Self, ManifestError> {
		let object = decode_document(raw).map_err(ManifestError::Decode)?;
		Self::from_value(object)
	}

	/// Wrap an already decoded JSON object.
	pub fn from_value(object: JsonValue) -> Result<Self, ManifestError> {
		if !object.is_object() {
			return Err(ManifestError::NotAnObject);
		}

		let gvk = gvk_from_manifest(&object).ok_or(ManifestError::MissingTypeMeta)?;
		let name = object
			.pointer("/metadata/name")
			.and_then(JsonValue::as_str)
			.filter(|name| !name.is_empty())
			.ok_or(ManifestError::MissingName)?
			.to_string();

		Ok(Self { gvk, name, object })
	}

	pub fn gvk(&self) -> &GroupVersionKind {
		&self.gvk
	}

	pub fn kind(&self) -> &str {
		&self.gvk.kind
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// The namespace written in the document, if any.
	pub fn namespace(&self) -> Option<&str> {
		self.object
			.pointer("/metadata/namespace")
			.and_then(JsonValue::as_str)
			.filter(|ns| !ns.is_empty())
	}

	pub fn object(&self) -> &JsonValue {
		&self.object
	}

	/// Effective namespace for this document.
	///
	/// A non-empty `target` wins over the document's own namespace, which in
	/// turn wins over [`DEFAULT_NAMESPACE`].
	pub fn resolve_namespace(&self, target: &str) -> String {
		if !target.is_empty() {
			return target.to_string();
		}
		self.namespace().unwrap_or(DEFAULT_NAMESPACE).to_string()
	}

	/// Payload to send for this document.
	///
	/// Namespaced objects get `metadata.namespace` set to `namespace`;
	/// cluster-scoped objects have it removed.
	pub fn payload(&self, namespace: Option<&str>) -> JsonValue {
		let mut object = self.object.clone();
		if let Some(JsonValue::Object(metadata)) = object.get_mut("metadata") {
			match namespace {
				Some(ns) => {
					metadata.insert("namespace".to_string(), JsonValue::String(ns.to_string()));
				}
				None => {
					metadata.remove("namespace");
				}
			}
		}
		object
	}
}

/// Synthesize the manifest for a namespace carrying a `name` label.
pub fn namespace_manifest(name: &str) -> String {
	format!("kind: Namespace\napiVersion: v1\nmetadata:\n  name: {name}\n  labels:\n    name: {name}")
}

/// The object form of [`namespace_manifest`]. The name is kept a string even
/// where YAML would read it as a number or a boolean.
pub fn namespace_object(name: &str) -> JsonValue {
	json!({
		"apiVersion": "v1",
		"kind": "Namespace",
		"metadata": {
			"name": name,
			"labels": { "name": name },
		},
	})
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use indoc::indoc;
	use rstest::rstest;

	use super::*;

	const DEPLOYMENT: &str = indoc! {"
		apiVersion: apps/v1
		kind: Deployment
		metadata:
		  name: web
		  namespace: from-doc
		spec:
		  replicas: 2
	"};

	#[test]
	fn test_decode_deployment() {
		let manifest = DecodedManifest::decode(DEPLOYMENT).unwrap();
		assert_eq!(manifest.gvk().group, "apps");
		assert_eq!(manifest.gvk().version, "v1");
		assert_eq!(manifest.kind(), "Deployment");
		assert_eq!(manifest.name(), "web");
		assert_eq!(manifest.namespace(), Some("from-doc"));
		assert_eq!(manifest.object()["spec"]["replicas"], 2);
	}

	#[test]
	fn test_decode_malformed_yaml() {
		let result = DecodedManifest::decode("kind: [unclosed");
		assert_matches!(result, Err(ManifestError::Decode(_)));
	}

	#[test]
	fn test_decode_multiple_documents_is_error() {
		let result = DecodedManifest::decode("kind: A\n---\nkind: B\n");
		assert_matches!(result, Err(ManifestError::Decode(_)));
	}

	#[test]
	fn test_decode_scalar_is_not_object() {
		let result = DecodedManifest::decode("just a string");
		assert_matches!(result, Err(ManifestError::NotAnObject));
	}

	#[test]
	fn test_decode_missing_kind() {
		let result = DecodedManifest::decode("apiVersion: v1\nmetadata:\n  name: a\n");
		assert_matches!(result, Err(ManifestError::MissingTypeMeta));
	}

	#[test]
	fn test_decode_missing_name() {
		let result = DecodedManifest::decode("apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n");
		assert_matches!(result, Err(ManifestError::MissingName));
	}

	#[rstest]
	#[case("target", Some("from-doc"), "target")]
	#[case("", Some("from-doc"), "from-doc")]
	#[case("", None, "default")]
	#[case("target", None, "target")]
	fn test_resolve_namespace(
		#[case] target: &str,
		#[case] doc_namespace: Option<&str>,
		#[case] expected: &str,
	) {
		let mut object = serde_json::json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": { "name": "cfg" }
		});
		if let Some(ns) = doc_namespace {
			object["metadata"]["namespace"] = ns.into();
		}
		let manifest = DecodedManifest::from_value(object).unwrap();
		assert_eq!(manifest.resolve_namespace(target), expected);
	}

	#[test]
	fn test_payload_sets_and_strips_namespace() {
		let manifest = DecodedManifest::decode(DEPLOYMENT).unwrap();

		let namespaced = manifest.payload(Some("team-a"));
		assert_eq!(namespaced["metadata"]["namespace"], "team-a");

		let cluster = manifest.payload(None);
		assert!(cluster["metadata"].get("namespace").is_none());
	}

	#[test]
	fn test_namespace_manifest_decodes() {
		let text = namespace_manifest("team-a");
		assert_eq!(
			text,
			"kind: Namespace\napiVersion: v1\nmetadata:\n  name: team-a\n  labels:\n    name: team-a"
		);

		let manifest = DecodedManifest::decode(&text).unwrap();
		assert_eq!(manifest.kind(), "Namespace");
		assert_eq!(manifest.name(), "team-a");
		assert_eq!(manifest.object()["metadata"]["labels"]["name"], "team-a");
	}

	#[test]
	fn test_namespace_object_keeps_numeric_name() {
		let manifest = DecodedManifest::from_value(namespace_object("1e3")).unwrap();
		assert_eq!(manifest.kind(), "Namespace");
		assert_eq!(manifest.name(), "1e3");
		assert_eq!(manifest.object()["metadata"]["labels"]["name"], "1e3");
	}
}
