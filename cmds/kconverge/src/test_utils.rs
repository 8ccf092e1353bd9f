//! Common test utilities.

use std::{
	collections::{BTreeMap, HashMap, HashSet},
	sync::Mutex,
};

use async_trait::async_trait;
use k8s_openapi::api::{
	apps::v1::{DaemonSet, Deployment, StatefulSet},
	core::v1::Service,
};
use kube::{core::GroupVersionKind, discovery::ApiResource};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};

use crate::k8s::{
	cluster::{ApiError, ClusterApi, WorkloadSource},
	discovery::{DiscoveredResource, DiscoveryError, ResourceRef},
	ResourceScope,
};

/// A call that reached the fake cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
	Apply { target: String, dry_run: bool },
	Delete { target: String, dry_run: bool },
	Create { target: String },
	List { kind: &'static str, namespace: String },
}

impl Call {
	pub fn is_mutating(&self) -> bool {
		!matches!(self, Call::List { .. })
	}
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
	kind: String,
	namespace: Option<String>,
	name: String,
}

impl ObjectKey {
	fn of(target: &ResourceRef) -> Self {
		Self {
			kind: target.kind().to_string(),
			namespace: target.namespace.clone(),
			name: target.name.clone(),
		}
	}
}

#[derive(Default)]
struct FakeState {
	objects: BTreeMap<ObjectKey, JsonValue>,
	calls: Vec<Call>,
}

/// An idealized in-memory cluster.
///
/// Server-side apply always converges, dry runs never persist, and deleting a
/// namespace removes everything inside it. Rejections are injected per object
/// name.
pub struct FakeCluster {
	kinds: HashMap<GroupVersionKind, DiscoveredResource>,
	reject_apply: HashSet<String>,
	reject_create: HashSet<String>,
	failing_list: Option<&'static str>,
	state: Mutex<FakeState>,
}

impl Default for FakeCluster {
	fn default() -> Self {
		let mut cluster = Self {
			kinds: HashMap::new(),
			reject_apply: HashSet::new(),
			reject_create: HashSet::new(),
			failing_list: None,
			state: Mutex::new(FakeState::default()),
		};
		cluster.add_kind("", "v1", "Namespace", "namespaces", ResourceScope::ClusterWide);
		cluster.add_kind("", "v1", "ConfigMap", "configmaps", ResourceScope::Namespaced);
		cluster.add_kind("", "v1", "Service", "services", ResourceScope::Namespaced);
		cluster.add_kind("apps", "v1", "Deployment", "deployments", ResourceScope::Namespaced);
		cluster.add_kind("apps", "v1", "StatefulSet", "statefulsets", ResourceScope::Namespaced);
		cluster.add_kind("apps", "v1", "DaemonSet", "daemonsets", ResourceScope::Namespaced);
		cluster
	}
}

impl FakeCluster {
	pub fn new() -> Self {
		Self::default()
	}

	fn add_kind(&mut self, group: &str, version: &str, kind: &str, plural: &str, scope: ResourceScope) {
		let gvk = GroupVersionKind::gvk(group, version, kind);
		let api_resource = ApiResource::from_gvk_with_plural(&gvk, plural);
		self.kinds.insert(gvk, DiscoveredResource { api_resource, scope });
	}

	/// Reject every server-side apply of objects named `name`.
	pub fn rejecting_apply(mut self, name: &str) -> Self {
		self.reject_apply.insert(name.to_string());
		self
	}

	/// Reject every create of objects named `name`.
	pub fn rejecting_create(mut self, name: &str) -> Self {
		self.reject_create.insert(name.to_string());
		self
	}

	/// Fail every list of `kind` (e.g. "Service").
	pub fn failing_list(mut self, kind: &'static str) -> Self {
		self.failing_list = Some(kind);
		self
	}

	/// Seed an object as if it already existed.
	pub fn with_object(self, namespace: &str, object: JsonValue) -> Self {
		let key = ObjectKey {
			kind: object["kind"].as_str().unwrap_or_default().to_string(),
			namespace: Some(namespace.to_string()),
			name: object["metadata"]["name"].as_str().unwrap_or_default().to_string(),
		};
		self.state.lock().unwrap().objects.insert(key, object);
		self
	}

	pub fn calls(&self) -> Vec<Call> {
		self.state.lock().unwrap().calls.clone()
	}

	pub fn mutating_calls(&self) -> Vec<Call> {
		self.calls().into_iter().filter(Call::is_mutating).collect()
	}

	pub fn object_count(&self) -> usize {
		self.state.lock().unwrap().objects.len()
	}

	pub fn get(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<JsonValue> {
		let key = ObjectKey {
			kind: kind.to_string(),
			namespace: namespace.map(str::to_string),
			name: name.to_string(),
		};
		self.state.lock().unwrap().objects.get(&key).cloned()
	}

	fn record(&self, call: Call) {
		self.state.lock().unwrap().calls.push(call);
	}

	fn list<T: DeserializeOwned>(&self, kind: &'static str, namespace: &str) -> Result<Vec<T>, ApiError> {
		self.record(Call::List {
			kind,
			namespace: namespace.to_string(),
		});
		if self.failing_list == Some(kind) {
			return Err(ApiError::status(500, "InternalError", "etcdserver: request timed out"));
		}

		let state = self.state.lock().unwrap();
		Ok(state
			.objects
			.iter()
			.filter(|(key, _)| key.kind == kind && key.namespace.as_deref() == Some(namespace))
			.map(|(_, object)| serde_json::from_value(object.clone()).unwrap())
			.collect())
	}
}

#[async_trait]
impl ClusterApi for FakeCluster {
	async fn resolve(&self, gvk: &GroupVersionKind) -> Result<DiscoveredResource, DiscoveryError> {
		self.kinds
			.get(gvk)
			.cloned()
			.ok_or_else(|| DiscoveryError::UnknownResourceType {
				api_version: gvk.api_version(),
				kind: gvk.kind.clone(),
			})
	}

	async fn apply(
		&self,
		target: &ResourceRef,
		payload: &JsonValue,
		_field_manager: &str,
		dry_run: bool,
	) -> Result<(), ApiError> {
		self.record(Call::Apply {
			target: target.to_string(),
			dry_run,
		});
		if self.reject_apply.contains(&target.name) {
			return Err(ApiError::status(
				422,
				"Invalid",
				"spec.selector: Invalid value: field is immutable",
			));
		}
		if !dry_run {
			self.state
				.lock()
				.unwrap()
				.objects
				.insert(ObjectKey::of(target), payload.clone());
		}
		Ok(())
	}

	async fn delete(&self, target: &ResourceRef, dry_run: bool) -> Result<(), ApiError> {
		self.record(Call::Delete {
			target: target.to_string(),
			dry_run,
		});
		let mut state = self.state.lock().unwrap();
		let key = ObjectKey::of(target);
		if !state.objects.contains_key(&key) {
			return Err(ApiError::status(404, "NotFound", format!("{target} not found")));
		}
		if !dry_run {
			state.objects.remove(&key);
			if target.kind() == "Namespace" {
				state
					.objects
					.retain(|key, _| key.namespace.as_deref() != Some(target.name.as_str()));
			}
		}
		Ok(())
	}

	async fn create(&self, target: &ResourceRef, payload: &JsonValue) -> Result<(), ApiError> {
		self.record(Call::Create {
			target: target.to_string(),
		});
		if self.reject_create.contains(&target.name) {
			return Err(ApiError::status(
				422,
				"Invalid",
				"metadata.name: Invalid value: rejected by admission webhook",
			));
		}
		let mut state = self.state.lock().unwrap();
		let key = ObjectKey::of(target);
		if state.objects.contains_key(&key) {
			return Err(ApiError::status(409, "AlreadyExists", format!("{target} already exists")));
		}
		state.objects.insert(key, payload.clone());
		Ok(())
	}
}

#[async_trait]
impl WorkloadSource for FakeCluster {
	async fn deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ApiError> {
		self.list("Deployment", namespace)
	}

	async fn stateful_sets(&self, namespace: &str) -> Result<Vec<StatefulSet>, ApiError> {
		self.list("StatefulSet", namespace)
	}

	async fn daemon_sets(&self, namespace: &str) -> Result<Vec<DaemonSet>, ApiError> {
		self.list("DaemonSet", namespace)
	}

	async fn services(&self, namespace: &str) -> Result<Vec<Service>, ApiError> {
		self.list("Service", namespace)
	}
}

/// A Deployment with the given observed and desired replica counts.
pub fn deployment(name: &str, ready: Option<i32>, desired: Option<i32>) -> JsonValue {
	let mut object = json!({
		"apiVersion": "apps/v1",
		"kind": "Deployment",
		"metadata": { "name": name },
		"spec": {
			"selector": { "matchLabels": { "app": name } },
			"template": { "metadata": { "labels": { "app": name } } }
		},
		"status": {}
	});
	if let Some(desired) = desired {
		object["spec"]["replicas"] = json!(desired);
	}
	if let Some(ready) = ready {
		object["status"]["readyReplicas"] = json!(ready);
	}
	object
}

/// A StatefulSet with the given observed and desired replica counts.
pub fn stateful_set(name: &str, ready: Option<i32>, desired: Option<i32>) -> JsonValue {
	let mut object = json!({
		"apiVersion": "apps/v1",
		"kind": "StatefulSet",
		"metadata": { "name": name },
		"spec": {
			"selector": { "matchLabels": { "app": name } },
			"serviceName": name,
			"template": { "metadata": { "labels": { "app": name } } }
		},
		"status": { "replicas": desired.unwrap_or_default() }
	});
	if let Some(desired) = desired {
		object["spec"]["replicas"] = json!(desired);
	}
	if let Some(ready) = ready {
		object["status"]["readyReplicas"] = json!(ready);
	}
	object
}

/// A DaemonSet with the given scheduling counts.
pub fn daemon_set(name: &str, desired_scheduled: i32, ready: i32) -> JsonValue {
	json!({
		"apiVersion": "apps/v1",
		"kind": "DaemonSet",
		"metadata": { "name": name },
		"spec": {
			"selector": { "matchLabels": { "app": name } },
			"template": { "metadata": { "labels": { "app": name } } }
		},
		"status": {
			"currentNumberScheduled": desired_scheduled,
			"desiredNumberScheduled": desired_scheduled,
			"numberMisscheduled": 0,
			"numberReady": ready
		}
	})
}

/// A Service of `service_type` with optional load-balancer ingress IPs.
pub fn service(name: &str, service_type: &str, cluster_ip: &str, ingress_ips: &[&str]) -> JsonValue {
	let ingress: Vec<JsonValue> = ingress_ips.iter().map(|ip| json!({ "ip": ip })).collect();
	json!({
		"apiVersion": "v1",
		"kind": "Service",
		"metadata": { "name": name },
		"spec": {
			"type": service_type,
			"clusterIP": cluster_ip,
			"clusterIPs": [cluster_ip],
			"ports": [{ "port": 8080, "protocol": "TCP" }]
		},
		"status": { "loadBalancer": { "ingress": ingress } }
	})
}
