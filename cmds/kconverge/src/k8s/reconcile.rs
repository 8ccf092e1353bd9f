//! Kubernetes resource apply engine.
//!
//! Applies single manifests with server-side apply, falling back to a delete
//! followed by a create when the server rejects the patch (typically because an
//! immutable field changed). The fallback is a best-effort heuristic, not a
//! transaction: the object is briefly absent while it is recreated.
//!
//! Concurrent applies of the same object are not mutually exclusive. The
//! server-side apply path is last-writer-wins, but the delete-recreate path is
//! not safe under concurrency: another caller's patch can land between the
//! delete and the create.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::instrument;

use super::{
	cluster::{ApiError, ClusterApi},
	discovery::{DiscoveryError, ResourceRef},
	manifest::{namespace_object, DecodedManifest, ManifestError, DEFAULT_NAMESPACE},
};
use crate::yaml::split_documents;

/// Field manager recorded on every server-side apply.
pub const FIELD_MANAGER: &str = "kconverge";

/// Errors that can occur during reconcile operations.
#[derive(Debug, Error)]
pub enum ReconcileError {
	#[error(transparent)]
	Decode(#[from] ManifestError),

	#[error("resolving {kind}/{name}")]
	Discovery {
		kind: String,
		name: String,
		#[source]
		source: DiscoveryError,
	},

	#[error("refusing to modify protected {kind} `{name}`")]
	ProtectedResource { kind: String, name: String },

	#[error("applying {target} was rejected")]
	ApplyConflict {
		target: String,
		#[source]
		source: ApiError,
	},

	#[error("recreating {target} failed after apply was rejected ({patch_error})")]
	RecreateFailed {
		target: String,
		patch_error: ApiError,
		#[source]
		source: ApiError,
	},

	#[error("deleting {target}")]
	DeleteFailed {
		target: String,
		#[source]
		source: ApiError,
	},
}

/// Result of a successful apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
	/// The server-side apply patch was accepted.
	Applied,
	/// The patch was rejected and the object was deleted and created again.
	Recreated,
}

impl std::fmt::Display for ApplyOutcome {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ApplyOutcome::Applied => write!(f, "applied"),
			ApplyOutcome::Recreated => write!(f, "recreated"),
		}
	}
}

/// Options read by the reconciler. Never mutated by it.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
	/// Send every mutating call as a server-side dry run and disable the
	/// delete-recreate fallback.
	pub dry_run: bool,
	/// Also log errors that get folded into the fallback path.
	pub verbose: bool,
	pub field_manager: String,
}

impl Default for ReconcileOptions {
	fn default() -> Self {
		Self {
			dry_run: false,
			verbose: false,
			field_manager: FIELD_MANAGER.to_string(),
		}
	}
}

/// States of a single apply.
///
/// `Patching` and `Recreating` are transient; the other three are terminal.
#[derive(Debug)]
enum ApplyState {
	Patching,
	Recreating { patch_error: ApiError },
	Applied,
	Recreated,
	Failed(ReconcileError),
}

/// Outcome of one document of a manifest stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentOutcome {
	pub kind: String,
	pub name: String,
	/// `None` for cluster-scoped objects.
	pub namespace: Option<String>,
	pub outcome: ApplyOutcome,
}

/// Converges single resources toward their manifests.
#[derive(Clone)]
pub struct ResourceReconciler {
	cluster: Arc<dyn ClusterApi>,
	options: ReconcileOptions,
}

impl ResourceReconciler {
	pub fn new(cluster: Arc<dyn ClusterApi>, options: ReconcileOptions) -> Self {
		Self { cluster, options }
	}

	pub fn options(&self) -> &ReconcileOptions {
		&self.options
	}

	/// Apply a single-document manifest.
	///
	/// A non-empty `target_namespace` overrides the document's namespace.
	#[instrument(skip(self, document))]
	pub async fn apply(
		&self,
		document: &str,
		target_namespace: &str,
	) -> Result<ApplyOutcome, ReconcileError> {
		let manifest = DecodedManifest::decode(document)?;
		self.apply_manifest(&manifest, target_namespace).await
	}

	/// Apply an already decoded manifest.
	pub async fn apply_manifest(
		&self,
		manifest: &DecodedManifest,
		target_namespace: &str,
	) -> Result<ApplyOutcome, ReconcileError> {
		self.apply_located(manifest, target_namespace)
			.await
			.map(|(_, outcome)| outcome)
	}

	#[instrument(skip(self, manifest), fields(kind = %manifest.kind(), name = %manifest.name()))]
	async fn apply_located(
		&self,
		manifest: &DecodedManifest,
		target_namespace: &str,
	) -> Result<(ResourceRef, ApplyOutcome), ReconcileError> {
		let (target, payload) = self.locate(manifest, target_namespace).await?;

		let mut state = ApplyState::Patching;
		loop {
			state = match state {
				ApplyState::Patching => self.patch(&target, &payload).await,
				ApplyState::Recreating { patch_error } => {
					self.recreate(&target, &payload, patch_error).await
				}
				ApplyState::Applied => return Ok((target, ApplyOutcome::Applied)),
				ApplyState::Recreated => return Ok((target, ApplyOutcome::Recreated)),
				ApplyState::Failed(error) => return Err(error),
			};
		}
	}

	/// Delete the object a single-document manifest describes.
	///
	/// The delete error is returned as is; there is no fallback.
	#[instrument(skip(self, document))]
	pub async fn delete(&self, document: &str, target_namespace: &str) -> Result<(), ReconcileError> {
		let manifest = DecodedManifest::decode(document)?;
		self.delete_manifest(&manifest, target_namespace).await
	}

	#[instrument(skip(self, manifest), fields(kind = %manifest.kind(), name = %manifest.name()))]
	pub async fn delete_manifest(
		&self,
		manifest: &DecodedManifest,
		target_namespace: &str,
	) -> Result<(), ReconcileError> {
		let (target, _) = self.locate(manifest, target_namespace).await?;

		tracing::info!(target = %target, dry_run = self.options.dry_run, "deleting");
		self.cluster
			.delete(&target, self.options.dry_run)
			.await
			.map_err(|source| ReconcileError::DeleteFailed {
				target: target.to_string(),
				source,
			})?;
		tracing::info!(target = %target, "deleted");
		Ok(())
	}

	/// Apply every document of a YAML stream in order, stopping at the first
	/// failure.
	pub async fn apply_all(
		&self,
		stream: &str,
		target_namespace: &str,
	) -> Result<Vec<DocumentOutcome>, ReconcileError> {
		let mut outcomes = Vec::new();
		for document in split_documents(stream) {
			let manifest = DecodedManifest::decode(&document)?;
			let (target, outcome) = self.apply_located(&manifest, target_namespace).await?;
			outcomes.push(DocumentOutcome {
				kind: manifest.kind().to_string(),
				name: target.name,
				namespace: target.namespace,
				outcome,
			});
		}
		Ok(outcomes)
	}

	/// Delete every document of a YAML stream in order, stopping at the first
	/// failure.
	pub async fn delete_all(
		&self,
		stream: &str,
		target_namespace: &str,
	) -> Result<Vec<DecodedManifest>, ReconcileError> {
		let mut deleted = Vec::new();
		for document in split_documents(stream) {
			let manifest = DecodedManifest::decode(&document)?;
			self.delete_manifest(&manifest, target_namespace).await?;
			deleted.push(manifest);
		}
		Ok(deleted)
	}

	/// Create (or converge) a namespace labelled with its own name.
	///
	/// Returns `Ok(None)` without touching the cluster for an empty name.
	pub async fn create_namespace(&self, name: &str) -> Result<Option<ApplyOutcome>, ReconcileError> {
		ensure_not_protected(name)?;
		if name.is_empty() {
			return Ok(None);
		}
		tracing::info!(namespace = %name, "creating namespace");
		let manifest = DecodedManifest::from_value(namespace_object(name))?;
		self.apply_manifest(&manifest, name).await.map(Some)
	}

	/// Delete a namespace. The `default` namespace is always refused.
	pub async fn delete_namespace(&self, name: &str) -> Result<(), ReconcileError> {
		ensure_not_protected(name)?;
		if name.is_empty() {
			return Ok(());
		}
		tracing::info!(namespace = %name, "deleting namespace");
		let manifest = DecodedManifest::from_value(namespace_object(name))?;
		self.delete_manifest(&manifest, name).await
	}

	/// Resolve the effective namespace and API coordinates of a manifest.
	async fn locate(
		&self,
		manifest: &DecodedManifest,
		target_namespace: &str,
	) -> Result<(ResourceRef, JsonValue), ReconcileError> {
		// Scope is only known after discovery, but the namespace is settled first.
		let namespace = manifest.resolve_namespace(target_namespace);

		let discovered = self
			.cluster
			.resolve(manifest.gvk())
			.await
			.map_err(|source| ReconcileError::Discovery {
				kind: manifest.kind().to_string(),
				name: manifest.name().to_string(),
				source,
			})?;

		let target = ResourceRef::new(&discovered, &namespace, manifest.name());
		let payload = manifest.payload(target.namespace.as_deref());
		Ok((target, payload))
	}

	async fn patch(&self, target: &ResourceRef, payload: &JsonValue) -> ApplyState {
		tracing::info!(target = %target, dry_run = self.options.dry_run, "applying");

		let result = self
			.cluster
			.apply(
				target,
				payload,
				&self.options.field_manager,
				self.options.dry_run,
			)
			.await;

		match result {
			Ok(()) => {
				tracing::info!(target = %target, "applied");
				ApplyState::Applied
			}
			// Dry runs must never mutate, so there is no fallback.
			Err(source) if self.options.dry_run => {
				tracing::warn!(target = %target, error = %source, "dry-run apply rejected");
				ApplyState::Failed(ReconcileError::ApplyConflict {
					target: target.to_string(),
					source,
				})
			}
			Err(patch_error) => {
				tracing::warn!(
					target = %target,
					error = %patch_error,
					"apply rejected, recreating"
				);
				ApplyState::Recreating { patch_error }
			}
		}
	}

	async fn recreate(
		&self,
		target: &ResourceRef,
		payload: &JsonValue,
		patch_error: ApiError,
	) -> ApplyState {
		if let Err(error) = self.cluster.delete(target, false).await {
			if self.options.verbose {
				tracing::info!(target = %target, error = %error, "cleanup delete failed, creating anyway");
			} else {
				tracing::debug!(target = %target, error = %error, "cleanup delete failed");
			}
		}

		match self.cluster.create(target, payload).await {
			Ok(()) => {
				tracing::info!(target = %target, "recreated");
				ApplyState::Recreated
			}
			Err(source) => ApplyState::Failed(ReconcileError::RecreateFailed {
				target: target.to_string(),
				patch_error,
				source,
			}),
		}
	}
}

/// Reject mutations of well-known protected resources.
pub(crate) fn ensure_not_protected(namespace: &str) -> Result<(), ReconcileError> {
	if namespace.eq_ignore_ascii_case(DEFAULT_NAMESPACE) {
		return Err(ReconcileError::ProtectedResource {
			kind: "Namespace".to_string(),
			name: namespace.to_string(),
		});
	}
	Ok(())
}
