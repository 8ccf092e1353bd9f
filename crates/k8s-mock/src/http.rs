//! HTTP mock Kubernetes server using wiremock.
//!
//! Serves discovery, `/version`, and create / apply / get / list / delete for
//! every discovered resource out of an in-memory object store. Kubeconfig-based
//! clients can connect to it like a real API server.

use std::{
	collections::{BTreeMap, HashSet},
	sync::{Arc, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::{
	discovery::{api_prefix, DiscoveryMode, MockDiscovery},
	helpers::{failure_status, is_dry_run, merge_json},
};

/// Stored objects keyed by (collection path, name).
pub type SharedResources = Arc<RwLock<BTreeMap<(String, String), Value>>>;

const AGGREGATED_DISCOVERY_CONTENT_TYPE: &str =
	"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery_mode: DiscoveryMode,
	/// Objects present at startup, as raw manifests. Their API paths are
	/// derived from apiVersion/kind using the discovery data.
	#[builder(default)]
	resources: Vec<Value>,
	/// Object names whose server-side apply is answered with 422 Invalid.
	#[builder(default)]
	reject_apply: Vec<String>,
	/// Object names whose create is answered with 422 Invalid.
	#[builder(default)]
	reject_create: Vec<String>,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	resources: SharedResources,
}

struct MockState {
	resources: SharedResources,
	reject_apply: HashSet<String>,
	reject_create: HashSet<String>,
}

/// Location of a request inside the API: the collection and, for single
/// object requests, the object name.
#[derive(Debug, PartialEq, Eq)]
struct ResourcePath {
	collection: String,
	name: Option<String>,
}

impl ResourcePath {
	/// Parse `/api/v1/...` and `/apis/<group>/<version>/...` paths.
	///
	/// Returns `None` for bare group-version paths and anything outside the API.
	fn parse(url_path: &str) -> Option<Self> {
		let segments: Vec<&str> = url_path.trim_matches('/').split('/').collect();
		let prefix_len = match segments.first() {
			Some(&"api") => 2,
			Some(&"apis") => 3,
			_ => return None,
		};
		if segments.len() <= prefix_len {
			return None;
		}

		let (collection_len, name) = match &segments[prefix_len..] {
			[_] => (1, None),
			["namespaces", _, _] => (3, None),
			["namespaces", _, _, name, ..] => (3, Some(*name)),
			[_, name, ..] => (1, Some(*name)),
			[] => return None,
		};

		Some(Self {
			collection: format!("/{}", segments[..prefix_len + collection_len].join("/")),
			name: name.map(str::to_string),
		})
	}

	fn key(&self) -> Option<(String, String)> {
		Some((self.collection.clone(), self.name.clone()?))
	}
}

/// Collection path an object of `manifest` is stored under.
fn collection_for_manifest(manifest: &Value, discovery: &MockDiscovery) -> Option<(String, String)> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.pointer("/metadata/name")?.as_str()?.to_string();
	let resource = discovery.lookup(api_version, kind)?;

	let prefix = api_prefix(api_version);
	let collection = if resource.namespaced {
		let ns = manifest
			.pointer("/metadata/namespace")
			.and_then(Value::as_str)
			.unwrap_or("default");
		format!("{prefix}/namespaces/{ns}/{}", resource.plural)
	} else {
		format!("{prefix}/{}", resource.plural)
	};
	Some((collection, name))
}

fn json_response(code: u16, body: Value) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(body)
}

fn not_found(target: &str) -> ResponseTemplate {
	json_response(404, failure_status(404, "NotFound", format!("{target} not found")))
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		let discovery = MockDiscovery::default();

		debug!(uri = %server.uri(), "started mock K8s server");

		let mut resources = BTreeMap::new();
		resources.insert(
			("/api/v1/namespaces".to_string(), "default".to_string()),
			json!({ "apiVersion": "v1", "kind": "Namespace", "metadata": { "name": "default" } }),
		);
		for manifest in self.resources {
			if let Some(key) = collection_for_manifest(&manifest, &discovery) {
				trace!(collection = %key.0, name = %key.1, "registered resource");
				resources.insert(key, manifest);
			}
		}

		let state = Arc::new(MockState {
			resources: Arc::new(RwLock::new(resources)),
			reject_apply: self.reject_apply.into_iter().collect(),
			reject_create: self.reject_create.into_iter().collect(),
		});

		mount_version(&server).await;
		mount_discovery(&server, &discovery, self.discovery_mode).await;
		mount_resources(&server, &state).await;

		RunningHttpMockK8sServer {
			server,
			resources: Arc::clone(&state.resources),
		}
	}
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		const CLUSTER: &str = "mock-cluster";
		const USER: &str = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: CLUSTER.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: CLUSTER.to_string(),
					user: Some(USER.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: USER.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}

	/// The stored object at `collection`/`name`, e.g.
	/// `("/apis/apps/v1/namespaces/default/deployments", "web")`.
	pub fn resource(&self, collection: &str, name: &str) -> Option<Value> {
		self.resources
			.read()
			.unwrap_or_else(std::sync::PoisonError::into_inner)
			.get(&(collection.to_string(), name.to_string()))
			.cloned()
	}

	/// Paths of every received request with the given HTTP method.
	pub async fn request_paths(&self, http_method: &str) -> Vec<String> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.into_iter()
			.filter(|req| req.method.as_str().eq_ignore_ascii_case(http_method))
			.map(|req| req.url.path().to_string())
			.collect()
	}
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(json_response(
			200,
			json!({
				"major": "1",
				"minor": "31",
				"gitVersion": "v1.31.0",
				"gitCommit": "fake",
				"gitTreeState": "clean",
				"buildDate": "2024-08-13T00:00:00Z",
				"goVersion": "go1.22.5",
				"compiler": "gc",
				"platform": "linux/amd64"
			}),
		))
		.mount(server)
		.await;
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	// Aggregated endpoints match on the Accept header and are mounted first so
	// they win over the legacy ones.
	for (root, body) in [
		("/api", discovery.aggregated_core()),
		("/apis", discovery.aggregated_groups()),
	] {
		let response = match mode {
			// set_body_json would overwrite the aggregated content type.
			DiscoveryMode::Aggregated => ResponseTemplate::new(200)
				.set_body_raw(body.to_string().into_bytes(), AGGREGATED_DISCOVERY_CONTENT_TYPE),
			DiscoveryMode::Legacy => ResponseTemplate::new(406),
		};
		Mock::given(method("GET"))
			.and(path(root))
			.and(header_regex("accept", "apidiscovery"))
			.respond_with(response)
			.mount(server)
			.await;
	}

	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(json_response(
			200,
			json!({ "kind": "APIVersions", "versions": ["v1"], "serverAddressByClientCIDRs": [] }),
		))
		.mount(server)
		.await;

	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(json_response(200, discovery.legacy_groups()))
		.mount(server)
		.await;

	for (prefix, body) in discovery.legacy_resource_lists() {
		Mock::given(method("GET"))
			.and(path(prefix))
			.respond_with(json_response(200, body))
			.mount(server)
			.await;
	}
}

async fn mount_resources(server: &MockServer, state: &Arc<MockState>) {
	let handlers: [(&str, fn(&MockState, &Request) -> ResponseTemplate); 4] = [
		("GET", handle_get),
		("PATCH", handle_apply),
		("POST", handle_create),
		("DELETE", handle_delete),
	];

	for (http_method, handler) in handlers {
		let state = Arc::clone(state);
		Mock::given(method(http_method))
			.and(path_regex(r"^/apis?/"))
			.respond_with(move |req: &Request| handler(&state, req))
			.mount(server)
			.await;
	}
}

fn handle_get(state: &MockState, req: &Request) -> ResponseTemplate {
	let Some(target) = ResourcePath::parse(req.url.path()) else {
		return not_found(req.url.path());
	};
	let resources = state
		.resources
		.read()
		.unwrap_or_else(std::sync::PoisonError::into_inner);

	if let Some(key) = target.key() {
		return match resources.get(&key) {
			Some(object) => json_response(200, object.clone()),
			None => not_found(&key.1),
		};
	}

	let items: Vec<_> = resources
		.iter()
		.filter(|((collection, _), _)| *collection == target.collection)
		.map(|(_, object)| object.clone())
		.collect();
	json_response(
		200,
		json!({
			"kind": "List",
			"apiVersion": "v1",
			"metadata": { "resourceVersion": "1" },
			"items": items
		}),
	)
}

fn handle_apply(state: &MockState, req: &Request) -> ResponseTemplate {
	let Some(key) = ResourcePath::parse(req.url.path()).and_then(|t| t.key()) else {
		return not_found(req.url.path());
	};
	if state.reject_apply.contains(&key.1) {
		return json_response(
			422,
			failure_status(422, "Invalid", format!("{}: field is immutable", key.1)),
		);
	}

	let patch: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
	let dry_run = is_dry_run(req.url.query(), &Value::Null);

	let mut resources = state
		.resources
		.write()
		.unwrap_or_else(std::sync::PoisonError::into_inner);
	let merged = match resources.get(&key) {
		Some(existing) => merge_json(existing.clone(), patch),
		None => patch,
	};
	if !dry_run {
		resources.insert(key, merged.clone());
	}
	json_response(200, merged)
}

fn handle_create(state: &MockState, req: &Request) -> ResponseTemplate {
	let Some(target) = ResourcePath::parse(req.url.path()) else {
		return not_found(req.url.path());
	};
	let body: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
	let Some(name) = body.pointer("/metadata/name").and_then(Value::as_str) else {
		return json_response(422, failure_status(422, "Invalid", "metadata.name: Required value"));
	};
	if state.reject_create.contains(name) {
		return json_response(
			422,
			failure_status(422, "Invalid", format!("{name}: rejected by admission webhook")),
		);
	}

	let key = (target.collection, name.to_string());
	let mut resources = state
		.resources
		.write()
		.unwrap_or_else(std::sync::PoisonError::into_inner);
	if resources.contains_key(&key) {
		return json_response(
			409,
			failure_status(409, "AlreadyExists", format!("{name} already exists")),
		);
	}
	if !is_dry_run(req.url.query(), &Value::Null) {
		resources.insert(key, body.clone());
	}
	json_response(201, body)
}

fn handle_delete(state: &MockState, req: &Request) -> ResponseTemplate {
	let Some(key) = ResourcePath::parse(req.url.path()).and_then(|t| t.key()) else {
		return not_found(req.url.path());
	};
	let options: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);

	let mut resources = state
		.resources
		.write()
		.unwrap_or_else(std::sync::PoisonError::into_inner);
	let Some(object) = resources.get(&key).cloned() else {
		return not_found(&key.1);
	};
	if !is_dry_run(req.url.query(), &options) {
		resources.remove(&key);
		if key.0 == "/api/v1/namespaces" {
			let scope = format!("/namespaces/{}/", key.1);
			resources.retain(|(collection, _), _| !collection.contains(&scope));
		}
	}
	json_response(200, object)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parsed(collection: &str, name: Option<&str>) -> Option<ResourcePath> {
		Some(ResourcePath {
			collection: collection.to_string(),
			name: name.map(str::to_string),
		})
	}

	#[test]
	fn test_parse_resource_paths() {
		assert_eq!(
			ResourcePath::parse("/api/v1/namespaces/default/configmaps/settings"),
			parsed("/api/v1/namespaces/default/configmaps", Some("settings"))
		);
		assert_eq!(
			ResourcePath::parse("/apis/apps/v1/namespaces/team-a/deployments"),
			parsed("/apis/apps/v1/namespaces/team-a/deployments", None)
		);
		assert_eq!(
			ResourcePath::parse("/api/v1/namespaces/team-a"),
			parsed("/api/v1/namespaces", Some("team-a"))
		);
		assert_eq!(ResourcePath::parse("/api/v1/namespaces"), parsed("/api/v1/namespaces", None));
		assert_eq!(ResourcePath::parse("/apis/example.com/v1"), None);
		assert_eq!(ResourcePath::parse("/version"), None);
	}

	#[test]
	fn test_collection_for_manifest() {
		let discovery = MockDiscovery::default();
		let deployment = json!({
			"apiVersion": "apps/v1",
			"kind": "Deployment",
			"metadata": { "name": "web", "namespace": "team-a" }
		});
		assert_eq!(
			collection_for_manifest(&deployment, &discovery),
			Some((
				"/apis/apps/v1/namespaces/team-a/deployments".to_string(),
				"web".to_string()
			))
		);

		let namespace = json!({ "apiVersion": "v1", "kind": "Namespace", "metadata": { "name": "team-a" } });
		assert_eq!(
			collection_for_manifest(&namespace, &discovery),
			Some(("/api/v1/namespaces".to_string(), "team-a".to_string()))
		);
	}
}
