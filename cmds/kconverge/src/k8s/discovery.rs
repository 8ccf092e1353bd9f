//! Kubernetes API resource discovery and caching.
//!
//! This module translates a manifest's apiVersion and kind into the concrete
//! API coordinates (plural resource name and scope) the dynamic client needs.
//! Results are kept in a shared, append-only cache. A cache miss triggers one
//! fresh discovery request for that kind; stale entries are tolerated rather
//! than invalidated.

use std::{
	collections::HashMap,
	future::Future,
	sync::{Arc, RwLock},
};

use kube::{
	core::GroupVersionKind,
	discovery::{oneshot::pinned_kind, ApiResource, Scope},
	Client, Discovery,
};
use thiserror::Error;
use tracing::instrument;

use super::ResourceScope;

/// Errors that can occur during API resource discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("full API discovery failed")]
	FullDiscovery(#[source] kube::Error),

	#[error("failed to discover resource {api_version}/{kind}")]
	ResourceDiscovery {
		api_version: String,
		kind: String,
		#[source]
		source: kube::Error,
	},

	#[error("unknown resource type: {api_version}/{kind}")]
	UnknownResourceType { api_version: String, kind: String },
}

/// Extract a GroupVersionKind from a Kubernetes manifest.
pub fn gvk_from_manifest(manifest: &serde_json::Value) -> Option<GroupVersionKind> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	gvk_from_api_version(api_version, kind)
}

/// Create a GroupVersionKind from an apiVersion string and kind.
pub fn gvk_from_api_version(api_version: &str, kind: &str) -> Option<GroupVersionKind> {
	if api_version.is_empty() || kind.is_empty() {
		return None;
	}
	let (group, version) = match api_version.split_once('/') {
		Some((g, v)) => (g, v),
		None => ("", api_version),
	};
	Some(GroupVersionKind::gvk(group, version, kind))
}

fn gvk_from_api_resource(ar: &ApiResource) -> GroupVersionKind {
	GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind)
}

fn scope_of(scope: &Scope) -> ResourceScope {
	match scope {
		Scope::Namespaced => ResourceScope::Namespaced,
		Scope::Cluster => ResourceScope::ClusterWide,
	}
}

/// Discovered API resource with its scope.
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
	/// The kube ApiResource for making API calls.
	pub api_resource: ApiResource,
	/// Whether this resource is namespaced or cluster-wide.
	pub scope: ResourceScope,
}

/// Canonical coordinates of one object: group-version-resource, scope and name.
///
/// Derived per operation from live discovery data and never persisted.
#[derive(Debug, Clone)]
pub struct ResourceRef {
	pub api_resource: ApiResource,
	/// `None` for cluster-scoped objects.
	pub namespace: Option<String>,
	pub name: String,
}

impl ResourceRef {
	/// Build coordinates for `name`, keeping `namespace` only when the
	/// resource is namespaced.
	pub fn new(discovered: &DiscoveredResource, namespace: &str, name: &str) -> Self {
		let namespace = match discovered.scope {
			ResourceScope::Namespaced => Some(namespace.to_string()),
			ResourceScope::ClusterWide => None,
		};
		Self {
			api_resource: discovered.api_resource.clone(),
			namespace,
			name: name.to_string(),
		}
	}

	pub fn api_group(&self) -> &str {
		&self.api_resource.group
	}

	pub fn version(&self) -> &str {
		&self.api_resource.version
	}

	pub fn kind(&self) -> &str {
		&self.api_resource.kind
	}

	/// Plural resource name, the path segment of the API URL.
	pub fn resource_name(&self) -> &str {
		&self.api_resource.plural
	}

	pub fn is_cluster_scoped(&self) -> bool {
		self.namespace.is_none()
	}
}

impl std::fmt::Display for ResourceRef {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match &self.namespace {
			Some(ns) => write!(f, "{}/{} (namespace {ns})", self.kind(), self.name),
			None => write!(f, "{}/{}", self.kind(), self.name),
		}
	}
}

/// Shared GVK -> resource cache.
///
/// Clones share the same cache. Entries are only ever added.
#[derive(Clone, Default)]
pub struct ResourceCache {
	resources: Arc<RwLock<HashMap<GroupVersionKind, DiscoveredResource>>>,
}

impl ResourceCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Look up a resource by its GroupVersionKind.
	pub fn lookup(&self, gvk: &GroupVersionKind) -> Option<DiscoveredResource> {
		let resources = self
			.resources
			.read()
			.unwrap_or_else(std::sync::PoisonError::into_inner);
		resources.get(gvk).cloned()
	}

	pub fn insert(&self, gvk: GroupVersionKind, discovered: DiscoveredResource) {
		let mut resources = self
			.resources
			.write()
			.unwrap_or_else(std::sync::PoisonError::into_inner);
		resources.insert(gvk, discovered);
	}

	pub fn len(&self) -> usize {
		self.resources
			.read()
			.unwrap_or_else(std::sync::PoisonError::into_inner)
			.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Resolve `gvk`, calling `fetch` exactly once on a cache miss.
	///
	/// `fetch` returns `Ok(None)` when the cluster does not serve the kind.
	pub async fn resolve_with<F, Fut>(
		&self,
		gvk: &GroupVersionKind,
		fetch: F,
	) -> Result<DiscoveredResource, DiscoveryError>
	where
		F: FnOnce(GroupVersionKind) -> Fut,
		Fut: Future<Output = Result<Option<DiscoveredResource>, DiscoveryError>>,
	{
		if let Some(hit) = self.lookup(gvk) {
			return Ok(hit);
		}

		tracing::debug!(
			api_version = %gvk.api_version(),
			kind = %gvk.kind,
			"discovery cache miss"
		);

		match fetch(gvk.clone()).await? {
			Some(discovered) => {
				self.insert(gvk.clone(), discovered.clone());
				Ok(discovered)
			}
			None => Err(DiscoveryError::UnknownResourceType {
				api_version: gvk.api_version(),
				kind: gvk.kind.clone(),
			}),
		}
	}

	/// Add every resource of a completed Discovery run.
	fn extend_from_discovery(&self, discovery: &Discovery) {
		let mut resources = self
			.resources
			.write()
			.unwrap_or_else(std::sync::PoisonError::into_inner);

		for group in discovery.groups() {
			// Iterate all versions, not just recommended, so we can handle
			// manifests using older API versions (e.g., v1alpha1 vs v1beta1)
			for ver in group.versions() {
				for (ar, caps) in group.versioned_resources(ver) {
					resources.insert(
						gvk_from_api_resource(&ar),
						DiscoveredResource {
							scope: scope_of(&caps.scope),
							api_resource: ar,
						},
					);
				}
			}
		}
	}
}

/// Discovery mapper backed by a live cluster.
#[derive(Clone)]
pub struct DiscoveryMapper {
	client: Client,
	cache: ResourceCache,
}

impl DiscoveryMapper {
	pub fn new(client: Client) -> Self {
		Self {
			client,
			cache: ResourceCache::new(),
		}
	}

	pub fn cache(&self) -> &ResourceCache {
		&self.cache
	}

	/// Resolve a GroupVersionKind to its API coordinates.
	///
	/// A miss issues a single pinned-kind discovery request; there is no
	/// retry loop.
	#[instrument(skip(self), fields(api_version = %gvk.api_version(), kind = %gvk.kind))]
	pub async fn resolve(&self, gvk: &GroupVersionKind) -> Result<DiscoveredResource, DiscoveryError> {
		let client = self.client.clone();
		self.cache
			.resolve_with(gvk, |gvk| async move {
				match pinned_kind(&client, &gvk).await {
					Ok((api_resource, capabilities)) => Ok(Some(DiscoveredResource {
						api_resource,
						scope: scope_of(&capabilities.scope),
					})),
					Err(kube::Error::Api(ref status)) if status.code == 404 => Ok(None),
					Err(kube::Error::Discovery(_)) => Ok(None),
					Err(source) => Err(DiscoveryError::ResourceDiscovery {
						api_version: gvk.api_version(),
						kind: gvk.kind.clone(),
						source,
					}),
				}
			})
			.await
	}

	/// Prefill the cache with every resource the cluster serves.
	///
	/// Uses the Aggregated Discovery API (K8s 1.26+) which requires only 2 API
	/// calls, falling back to full discovery for older clusters.
	#[instrument(skip(self))]
	pub async fn warm(&self) -> Result<(), DiscoveryError> {
		let discovery = match Discovery::new(self.client.clone()).run_aggregated().await {
			Ok(discovery) => {
				tracing::debug!("using aggregated discovery");
				discovery
			}
			Err(e) => {
				tracing::debug!(error = %e, "aggregated discovery not available");
				Discovery::new(self.client.clone())
					.run()
					.await
					.map_err(DiscoveryError::FullDiscovery)?
			}
		};
		self.cache.extend_from_discovery(&discovery);
		tracing::debug!(resource_count = self.cache.len(), "discovery cache warmed");
		Ok(())
	}
}
