//! Helper functions for mock Kubernetes testing.

use serde_json::{json, Value};

/// Deep merge two JSON values (patch into base).
///
/// Objects merge key by key; everything else is replaced. Close enough to
/// server-side apply for a single field manager.
pub fn merge_json(base: Value, patch: Value) -> Value {
	match (base, patch) {
		(Value::Object(mut base_map), Value::Object(patch_map)) => {
			for (key, patch_value) in patch_map {
				let base_value = base_map.remove(&key).unwrap_or(Value::Null);
				base_map.insert(key, merge_json(base_value, patch_value));
			}
			Value::Object(base_map)
		}
		(_, patch) => patch,
	}
}

/// A `metav1.Status` failure body.
pub fn failure_status(code: u16, reason: &str, message: impl Into<String>) -> Value {
	json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message.into(),
		"reason": reason,
		"code": code
	})
}

/// Whether a request asked for a server-side dry run, in the query or body.
pub fn is_dry_run(query: Option<&str>, body: &Value) -> bool {
	query.is_some_and(|q| q.contains("dryRun")) || body.get("dryRun").is_some()
}
