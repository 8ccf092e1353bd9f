//! Seams between the engines and the cluster API.
//!
//! [`ClusterApi`] covers the mutating, dynamically typed operations of the
//! reconciler; [`WorkloadSource`] covers the typed list calls of the readiness
//! aggregator. [`KubeCluster`] implements both on top of a kube client.

use async_trait::async_trait;
use k8s_openapi::api::{
	apps::v1::{DaemonSet, Deployment, StatefulSet},
	core::v1::Service,
};
use kube::{
	api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
	core::GroupVersionKind,
	Client,
};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::instrument;

use super::{
	client::ClusterConnection,
	discovery::{DiscoveredResource, DiscoveryError, DiscoveryMapper, ResourceRef},
};

/// Errors returned by cluster API calls.
#[derive(Debug, Error)]
pub enum ApiError {
	/// The API server answered with a failure status.
	#[error("{reason} ({code}): {message}")]
	Status {
		code: u16,
		reason: String,
		message: String,
	},

	#[error(transparent)]
	Transport(kube::Error),

	#[error("encoding request payload")]
	Encode(#[source] serde_json::Error),
}

impl ApiError {
	pub fn status(code: u16, reason: &str, message: impl Into<String>) -> Self {
		Self::Status {
			code,
			reason: reason.to_string(),
			message: message.into(),
		}
	}

	pub fn code(&self) -> Option<u16> {
		match self {
			Self::Status { code, .. } => Some(*code),
			_ => None,
		}
	}

	pub fn is_not_found(&self) -> bool {
		self.code() == Some(404)
	}
}

impl From<kube::Error> for ApiError {
	fn from(error: kube::Error) -> Self {
		match error {
			kube::Error::Api(status) => Self::Status {
				code: status.code,
				reason: status.reason.clone(),
				message: status.message.clone(),
			},
			other => Self::Transport(other),
		}
	}
}

/// Dynamic resource operations used by the reconciler.
#[async_trait]
pub trait ClusterApi: Send + Sync {
	/// Resolve a kind to its API coordinates.
	async fn resolve(&self, gvk: &GroupVersionKind) -> Result<DiscoveredResource, DiscoveryError>;

	/// Server-side apply `payload` to `target` under `field_manager`.
	async fn apply(
		&self,
		target: &ResourceRef,
		payload: &JsonValue,
		field_manager: &str,
		dry_run: bool,
	) -> Result<(), ApiError>;

	/// Delete `target` with foreground cascading.
	async fn delete(&self, target: &ResourceRef, dry_run: bool) -> Result<(), ApiError>;

	/// Create `payload` at `target`.
	async fn create(&self, target: &ResourceRef, payload: &JsonValue) -> Result<(), ApiError>;
}

/// Typed list operations used by the readiness aggregator.
#[async_trait]
pub trait WorkloadSource: Send + Sync {
	async fn deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ApiError>;

	async fn stateful_sets(&self, namespace: &str) -> Result<Vec<StatefulSet>, ApiError>;

	async fn daemon_sets(&self, namespace: &str) -> Result<Vec<DaemonSet>, ApiError>;

	async fn services(&self, namespace: &str) -> Result<Vec<Service>, ApiError>;
}

/// [`ClusterApi`] and [`WorkloadSource`] backed by a live cluster.
///
/// Cheap to clone; clones share the kube client and the discovery cache.
#[derive(Clone)]
pub struct KubeCluster {
	client: Client,
	mapper: DiscoveryMapper,
}

impl KubeCluster {
	pub fn new(client: Client) -> Self {
		Self {
			mapper: DiscoveryMapper::new(client.clone()),
			client,
		}
	}

	pub fn from_connection(connection: &ClusterConnection) -> Self {
		Self::new(connection.client().clone())
	}

	pub fn mapper(&self) -> &DiscoveryMapper {
		&self.mapper
	}

	fn dynamic_api(&self, target: &ResourceRef) -> Api<DynamicObject> {
		match target.namespace.as_deref() {
			Some(ns) => Api::namespaced_with(self.client.clone(), ns, &target.api_resource),
			None => Api::all_with(self.client.clone(), &target.api_resource),
		}
	}
}

#[async_trait]
impl ClusterApi for KubeCluster {
	async fn resolve(&self, gvk: &GroupVersionKind) -> Result<DiscoveredResource, DiscoveryError> {
		self.mapper.resolve(gvk).await
	}

	#[instrument(skip(self, payload), fields(target = %target))]
	async fn apply(
		&self,
		target: &ResourceRef,
		payload: &JsonValue,
		field_manager: &str,
		dry_run: bool,
	) -> Result<(), ApiError> {
		let params = PatchParams {
			dry_run,
			field_manager: Some(field_manager.to_string()),
			..Default::default()
		};
		self.dynamic_api(target)
			.patch(&target.name, &params, &Patch::Apply(payload))
			.await?;
		Ok(())
	}

	#[instrument(skip(self), fields(target = %target))]
	async fn delete(&self, target: &ResourceRef, dry_run: bool) -> Result<(), ApiError> {
		let params = DeleteParams {
			dry_run,
			..DeleteParams::foreground()
		};
		self.dynamic_api(target).delete(&target.name, &params).await?;
		Ok(())
	}

	#[instrument(skip(self, payload), fields(target = %target))]
	async fn create(&self, target: &ResourceRef, payload: &JsonValue) -> Result<(), ApiError> {
		let object: DynamicObject =
			serde_json::from_value(payload.clone()).map_err(ApiError::Encode)?;
		self.dynamic_api(target)
			.create(&PostParams::default(), &object)
			.await?;
		Ok(())
	}
}

#[async_trait]
impl WorkloadSource for KubeCluster {
	async fn deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ApiError> {
		let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
		Ok(api.list(&ListParams::default()).await?.items)
	}

	async fn stateful_sets(&self, namespace: &str) -> Result<Vec<StatefulSet>, ApiError> {
		let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
		Ok(api.list(&ListParams::default()).await?.items)
	}

	async fn daemon_sets(&self, namespace: &str) -> Result<Vec<DaemonSet>, ApiError> {
		let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
		Ok(api.list(&ListParams::default()).await?.items)
	}

	async fn services(&self, namespace: &str) -> Result<Vec<Service>, ApiError> {
		let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
		Ok(api.list(&ListParams::default()).await?.items)
	}
}
