//! Kubernetes reconcile and readiness engines.
//!
//! This module provides native Kubernetes API access using kube-rs: the
//! apply/delete reconciler, the multi-kind readiness aggregator, and the
//! discovery cache both of them resolve coordinates through.

pub mod client;
pub mod cluster;
pub mod discovery;
pub mod manifest;
pub mod readiness;
pub mod reconcile;

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, ConfigMap).
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, ClusterRole).
	ClusterWide,
}
