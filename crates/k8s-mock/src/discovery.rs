//! Discovery data served by the mock API server.

use std::collections::BTreeMap;

use serde_json::{json, Value};

const VERBS: [&str; 7] = ["create", "delete", "get", "list", "patch", "update", "watch"];

/// Discovery mode for the mock server.
#[derive(Clone, Copy, Default)]
pub enum DiscoveryMode {
	/// Support aggregated discovery (APIGroupDiscoveryList).
	#[default]
	Aggregated,
	/// Return 406 for aggregated discovery, forcing fallback to legacy endpoints.
	Legacy,
}

/// A resource served by the mock.
pub struct MockApiResource {
	pub plural: String,
	pub kind: String,
	pub namespaced: bool,
}

impl MockApiResource {
	pub fn namespaced(plural: &str, kind: &str) -> Self {
		Self {
			plural: plural.to_string(),
			kind: kind.to_string(),
			namespaced: true,
		}
	}

	pub fn cluster_scoped(plural: &str, kind: &str) -> Self {
		Self {
			namespaced: false,
			..Self::namespaced(plural, kind)
		}
	}

	fn scope(&self) -> &'static str {
		if self.namespaced {
			"Namespaced"
		} else {
			"Cluster"
		}
	}

	fn aggregated(&self, group: &str, version: &str) -> Value {
		json!({
			"resource": self.plural,
			"responseKind": { "group": group, "version": version, "kind": self.kind },
			"scope": self.scope(),
			"verbs": VERBS,
		})
	}

	fn legacy(&self) -> Value {
		json!({
			"name": self.plural,
			"singularName": "",
			"namespaced": self.namespaced,
			"kind": self.kind,
			"verbs": VERBS,
		})
	}
}

/// Resources served per group version. The core group is keyed `v1`.
pub struct MockDiscovery {
	pub group_versions: BTreeMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self {
			group_versions: BTreeMap::from([
				(
					"v1".to_string(),
					vec![
						MockApiResource::namespaced("configmaps", "ConfigMap"),
						MockApiResource::namespaced("secrets", "Secret"),
						MockApiResource::namespaced("services", "Service"),
						MockApiResource::cluster_scoped("namespaces", "Namespace"),
					],
				),
				(
					"apps/v1".to_string(),
					vec![
						MockApiResource::namespaced("deployments", "Deployment"),
						MockApiResource::namespaced("statefulsets", "StatefulSet"),
						MockApiResource::namespaced("daemonsets", "DaemonSet"),
					],
				),
			]),
		}
	}
}

fn split_group_version(group_version: &str) -> (&str, &str) {
	group_version.split_once('/').unwrap_or(("", group_version))
}

/// URL prefix of a group version: `/api/v1` or `/apis/<group>/<version>`.
pub fn api_prefix(group_version: &str) -> String {
	if group_version.contains('/') {
		format!("/apis/{group_version}")
	} else {
		format!("/api/{group_version}")
	}
}

impl MockDiscovery {
	pub fn lookup(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		self.group_versions
			.get(api_version)?
			.iter()
			.find(|r| r.kind == kind)
	}

	fn groups(&self) -> impl Iterator<Item = (&str, &str, &[MockApiResource])> {
		self.group_versions
			.iter()
			.filter(|(gv, _)| gv.contains('/'))
			.map(|(gv, resources)| {
				let (group, version) = split_group_version(gv);
				(group, version, resources.as_slice())
			})
	}

	fn core(&self) -> &[MockApiResource] {
		self.group_versions
			.get("v1")
			.map(Vec::as_slice)
			.unwrap_or_default()
	}

	/// `/api` body for aggregated discovery.
	pub fn aggregated_core(&self) -> Value {
		let resources: Vec<_> = self.core().iter().map(|r| r.aggregated("", "v1")).collect();
		json!({
			"kind": "APIGroupDiscoveryList",
			"apiVersion": "apidiscovery.k8s.io/v2",
			"items": [{
				"metadata": { "name": "" },
				"versions": [{ "version": "v1", "resources": resources, "freshness": "Current" }]
			}]
		})
	}

	/// `/apis` body for aggregated discovery.
	pub fn aggregated_groups(&self) -> Value {
		let items: Vec<_> = self
			.groups()
			.map(|(group, version, resources)| {
				let resources: Vec<_> = resources.iter().map(|r| r.aggregated(group, version)).collect();
				json!({
					"metadata": { "name": group },
					"versions": [{ "version": version, "resources": resources, "freshness": "Current" }]
				})
			})
			.collect();
		json!({
			"kind": "APIGroupDiscoveryList",
			"apiVersion": "apidiscovery.k8s.io/v2",
			"items": items
		})
	}

	/// Legacy `/apis` group list.
	pub fn legacy_groups(&self) -> Value {
		let groups: Vec<_> = self
			.group_versions
			.keys()
			.filter(|gv| gv.contains('/'))
			.map(|gv| {
				let (group, version) = split_group_version(gv);
				json!({
					"name": group,
					"versions": [{ "groupVersion": gv, "version": version }],
					"preferredVersion": { "groupVersion": gv, "version": version }
				})
			})
			.collect();
		json!({ "kind": "APIGroupList", "apiVersion": "v1", "groups": groups })
	}

	/// Legacy resource list of every group version, keyed by URL prefix.
	pub fn legacy_resource_lists(&self) -> Vec<(String, Value)> {
		self.group_versions
			.iter()
			.map(|(gv, resources)| {
				let resources: Vec<_> = resources.iter().map(MockApiResource::legacy).collect();
				(
					api_prefix(gv),
					json!({
						"kind": "APIResourceList",
						"apiVersion": "v1",
						"groupVersion": gv,
						"resources": resources
					}),
				)
			})
			.collect()
	}
}
