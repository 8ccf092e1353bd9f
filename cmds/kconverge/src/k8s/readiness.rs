//! Multi-kind readiness aggregation.
//!
//! A check is a `kind:pattern` expression. Every object of that kind whose name
//! matches the (unanchored) pattern is evaluated against a per-kind readiness
//! predicate and rendered as one report line. The four lists are fetched once
//! per call; there is no caching between calls and no polling here.

use std::{fmt, str::FromStr, sync::Arc};

use k8s_openapi::{
	api::{
		apps::v1::{DaemonSet, Deployment, StatefulSet},
		core::v1::{LoadBalancerIngress, Service},
	},
	apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use nu_ansi_term::Color;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use super::cluster::{ApiError, WorkloadSource};

const READY_TAG: &str = "Ready";
const NOT_READY_TAG: &str = "Not Ready";

/// Errors that can occur while parsing a check expression.
#[derive(Debug, Error)]
pub enum CheckParseError {
	#[error("check `{0}` is not of the form kind:pattern")]
	MissingSeparator(String),

	#[error("unknown check kind `{0}`")]
	UnknownKind(String),

	#[error("invalid check pattern `{pattern}`")]
	InvalidPattern {
		pattern: String,
		#[source]
		source: regex::Error,
	},
}

/// Errors that abort a readiness check.
#[derive(Debug, Error)]
pub enum ReadinessError {
	#[error("listing {kind}")]
	Fetch {
		kind: FetchKind,
		#[source]
		source: ApiError,
	},
}

/// The kind named on the left of a check expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKind {
	Deployment,
	/// Alias of [`CheckKind::Deployment`]; checks the same objects.
	Replica,
	Stateful,
	DemonSet,
	Service,
}

impl CheckKind {
	pub fn as_str(self) -> &'static str {
		match self {
			CheckKind::Deployment => "deployment",
			CheckKind::Replica => "replica",
			CheckKind::Stateful => "stateful",
			CheckKind::DemonSet => "demonset",
			CheckKind::Service => "service",
		}
	}

	/// The list a check of this kind is evaluated against.
	pub fn fetch_kind(self) -> FetchKind {
		match self {
			CheckKind::Deployment | CheckKind::Replica => FetchKind::Deployments,
			CheckKind::Stateful => FetchKind::StatefulSets,
			CheckKind::DemonSet => FetchKind::DaemonSets,
			CheckKind::Service => FetchKind::Services,
		}
	}
}

impl FromStr for CheckKind {
	type Err = CheckParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"deployment" => Ok(CheckKind::Deployment),
			"replica" => Ok(CheckKind::Replica),
			"stateful" => Ok(CheckKind::Stateful),
			"demonset" => Ok(CheckKind::DemonSet),
			"service" => Ok(CheckKind::Service),
			other => Err(CheckParseError::UnknownKind(other.to_string())),
		}
	}
}

impl fmt::Display for CheckKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One of the four lists fetched per check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
	Deployments,
	StatefulSets,
	DaemonSets,
	Services,
}

impl fmt::Display for FetchKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			FetchKind::Deployments => "deployments",
			FetchKind::StatefulSets => "statefulsets",
			FetchKind::DaemonSets => "daemonsets",
			FetchKind::Services => "services",
		})
	}
}

/// A parsed `kind:pattern` check.
#[derive(Debug, Clone)]
pub struct CheckExpression {
	pub kind: CheckKind,
	pub pattern: Regex,
}

impl FromStr for CheckExpression {
	type Err = CheckParseError;

	/// Split on the first `:` so patterns may themselves contain colons.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (kind, pattern) = s
			.split_once(':')
			.ok_or_else(|| CheckParseError::MissingSeparator(s.to_string()))?;
		let kind = kind.parse()?;
		let pattern = Regex::new(pattern).map_err(|source| CheckParseError::InvalidPattern {
			pattern: pattern.to_string(),
			source,
		})?;
		Ok(Self { kind, pattern })
	}
}

impl fmt::Display for CheckExpression {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.kind, self.pattern.as_str())
	}
}

/// Readiness of one matched object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessRecord {
	pub kind: CheckKind,
	pub resource_name: String,
	/// Observed count: ready replicas, or ready daemon pods.
	pub current: Option<i32>,
	/// Wanted count: desired replicas, or pods the daemon set should schedule.
	pub desired: Option<i32>,
	pub ready: bool,
	pub rendered_line: String,
}

/// Result of one readiness check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessReport {
	pub all_ready: bool,
	pub records: Vec<ReadinessRecord>,
}

impl ReadinessReport {
	pub fn lines(&self) -> impl Iterator<Item = &str> {
		self.records.iter().map(|r| r.rendered_line.as_str())
	}
}

/// Address of a service as seen from outside (or inside) the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEndpoint {
	pub service_name: String,
	pub service_type: String,
	pub ip: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub port: Option<i32>,
}

/// The four lists a check is evaluated against.
#[derive(Debug, Default)]
pub struct WorkloadSnapshot {
	pub deployments: Vec<Deployment>,
	pub stateful_sets: Vec<StatefulSet>,
	pub daemon_sets: Vec<DaemonSet>,
	pub services: Vec<Service>,
}

impl WorkloadSnapshot {
	/// Fetch all four lists concurrently. The first failure aborts the rest.
	pub async fn fetch(workloads: &dyn WorkloadSource, namespace: &str) -> Result<Self, ReadinessError> {
		let fetch_err = |kind: FetchKind| move |source: ApiError| ReadinessError::Fetch { kind, source };

		let (deployments, stateful_sets, daemon_sets, services) = tokio::try_join!(
			async {
				workloads
					.deployments(namespace)
					.await
					.map_err(fetch_err(FetchKind::Deployments))
			},
			async {
				workloads
					.stateful_sets(namespace)
					.await
					.map_err(fetch_err(FetchKind::StatefulSets))
			},
			async {
				workloads
					.daemon_sets(namespace)
					.await
					.map_err(fetch_err(FetchKind::DaemonSets))
			},
			async {
				workloads
					.services(namespace)
					.await
					.map_err(fetch_err(FetchKind::Services))
			},
		)?;

		Ok(Self {
			deployments,
			stateful_sets,
			daemon_sets,
			services,
		})
	}
}

/// Evaluate parsed checks against a snapshot.
///
/// Records appear in check order, then in list order within a check.
pub fn evaluate(snapshot: &WorkloadSnapshot, checks: &[CheckExpression], colorize: bool) -> ReadinessReport {
	let mut records = Vec::new();
	for check in checks {
		match check.kind.fetch_kind() {
			FetchKind::Deployments => {
				for deployment in &snapshot.deployments {
					let name = object_name(&deployment.metadata);
					if check.pattern.is_match(name) {
						let current = deployment.status.as_ref().and_then(|s| s.ready_replicas);
						let desired = deployment.spec.as_ref().and_then(|s| s.replicas);
						records.push(replica_record(check.kind, name, current, desired, colorize));
					}
				}
			}
			FetchKind::StatefulSets => {
				for stateful_set in &snapshot.stateful_sets {
					let name = object_name(&stateful_set.metadata);
					if check.pattern.is_match(name) {
						let current = stateful_set.status.as_ref().and_then(|s| s.ready_replicas);
						let desired = stateful_set.spec.as_ref().and_then(|s| s.replicas);
						records.push(replica_record(check.kind, name, current, desired, colorize));
					}
				}
			}
			FetchKind::DaemonSets => {
				for daemon_set in &snapshot.daemon_sets {
					let name = object_name(&daemon_set.metadata);
					if check.pattern.is_match(name) {
						records.push(daemon_set_record(check.kind, name, daemon_set, colorize));
					}
				}
			}
			FetchKind::Services => {
				for service in &snapshot.services {
					let name = object_name(&service.metadata);
					if check.pattern.is_match(name) {
						records.push(service_record(check.kind, name, service, colorize));
					}
				}
			}
		}
	}

	ReadinessReport {
		all_ready: records.iter().all(|r| r.ready),
		records,
	}
}

fn object_name(metadata: &ObjectMeta) -> &str {
	metadata.name.as_deref().unwrap_or_default()
}

fn tag(ready: bool, colorize: bool) -> String {
	match (ready, colorize) {
		(true, true) => Color::Green.paint(READY_TAG).to_string(),
		(false, true) => Color::Red.paint(NOT_READY_TAG).to_string(),
		(true, false) => READY_TAG.to_string(),
		(false, false) => NOT_READY_TAG.to_string(),
	}
}

/// Deployments and stateful sets: ready iff ready replicas equal desired.
///
/// An absent ready count is zero; an absent desired count is never ready.
fn replica_record(
	kind: CheckKind,
	name: &str,
	current: Option<i32>,
	desired: Option<i32>,
	colorize: bool,
) -> ReadinessRecord {
	let observed = current.unwrap_or(0);
	let ready = desired == Some(observed);
	let desired_text = desired.map_or_else(|| "?".to_string(), |d| d.to_string());
	ReadinessRecord {
		kind,
		resource_name: name.to_string(),
		current,
		desired,
		ready,
		rendered_line: format!(
			"{kind}: {name} ({observed}/{desired_text}) {}",
			tag(ready, colorize)
		),
	}
}

/// Daemon sets: ready iff every desired pod is ready. Counts render as
/// desired/ready.
fn daemon_set_record(kind: CheckKind, name: &str, daemon_set: &DaemonSet, colorize: bool) -> ReadinessRecord {
	let (desired, current) = daemon_set
		.status
		.as_ref()
		.map_or((0, 0), |s| (s.desired_number_scheduled, s.number_ready));
	let ready = desired == current;
	ReadinessRecord {
		kind,
		resource_name: name.to_string(),
		current: Some(current),
		desired: Some(desired),
		ready,
		rendered_line: format!("{kind}: {name} ({desired}/{current}) {}", tag(ready, colorize)),
	}
}

/// Services: ready unless a load balancer has no ingress yet.
fn service_record(kind: CheckKind, name: &str, service: &Service, colorize: bool) -> ReadinessRecord {
	let is_load_balancer = service
		.spec
		.as_ref()
		.and_then(|s| s.type_.as_deref())
		== Some("LoadBalancer");
	let ready = !is_load_balancer || !load_balancer_ingress(service).is_empty();
	ReadinessRecord {
		kind,
		resource_name: name.to_string(),
		current: None,
		desired: None,
		ready,
		rendered_line: format!("{kind}: {name} {}", tag(ready, colorize)),
	}
}

fn load_balancer_ingress(service: &Service) -> &[LoadBalancerIngress] {
	service
		.status
		.as_ref()
		.and_then(|s| s.load_balancer.as_ref())
		.and_then(|lb| lb.ingress.as_deref())
		.unwrap_or_default()
}

/// Endpoints of a single service.
///
/// Load-balancer ingress IPs win; services without ingress report their
/// cluster IPs. Only the first declared port is reported.
fn endpoints_of(service: &Service) -> Vec<ServiceEndpoint> {
	let name = object_name(&service.metadata);
	let spec = service.spec.as_ref();
	let port = spec
		.and_then(|s| s.ports.as_ref())
		.and_then(|ports| ports.first())
		.map(|p| p.port);

	let endpoint = |service_type: &str, ip: &str| ServiceEndpoint {
		service_name: name.to_string(),
		service_type: service_type.to_string(),
		ip: ip.to_string(),
		port,
	};

	let ingress = load_balancer_ingress(service);
	if !ingress.is_empty() {
		return ingress
			.iter()
			.map(|i| endpoint("LoadBalancer", i.ip.as_deref().unwrap_or_default()))
			.collect();
	}

	spec.and_then(|s| s.cluster_ips.as_ref())
		.map(|ips| ips.iter().map(|ip| endpoint("ClusterIP", ip)).collect())
		.unwrap_or_default()
}

/// Aggregates readiness across workload kinds in one namespace.
#[derive(Clone)]
pub struct ReadinessAggregator {
	source: Arc<dyn WorkloadSource>,
	colorize: bool,
}

impl ReadinessAggregator {
	pub fn new(source: Arc<dyn WorkloadSource>) -> Self {
		Self {
			source,
			colorize: false,
		}
	}

	/// Colour the Ready / Not Ready tags with ANSI escapes.
	pub fn with_color(mut self, colorize: bool) -> Self {
		self.colorize = colorize;
		self
	}

	/// Check readiness of everything the raw `kind:pattern` checks match.
	///
	/// Malformed checks are skipped with a warning and never affect the
	/// result. With `want_none_running`, the report is ready only if nothing
	/// matched at all.
	#[instrument(skip(self, checks), fields(checks = checks.len()))]
	pub async fn check<S: AsRef<str>>(
		&self,
		namespace: &str,
		checks: &[S],
		want_none_running: bool,
	) -> Result<ReadinessReport, ReadinessError> {
		let parsed: Vec<CheckExpression> = checks
			.iter()
			.filter_map(|raw| match raw.as_ref().parse::<CheckExpression>() {
				Ok(check) => Some(check),
				Err(e) => {
					tracing::warn!(check = raw.as_ref(), error = %e, "skipping malformed check");
					None
				}
			})
			.collect();

		self.check_expressions(namespace, &parsed, want_none_running)
			.await
	}

	/// Check readiness for already parsed expressions.
	#[instrument(skip(self, checks), fields(checks = checks.len()))]
	pub async fn check_expressions(
		&self,
		namespace: &str,
		checks: &[CheckExpression],
		want_none_running: bool,
	) -> Result<ReadinessReport, ReadinessError> {
		let snapshot = WorkloadSnapshot::fetch(self.source.as_ref(), namespace).await?;
		let mut report = evaluate(&snapshot, checks, self.colorize);

		if want_none_running {
			report.all_ready = report.records.is_empty();
		}

		tracing::debug!(
			all_ready = report.all_ready,
			records = report.records.len(),
			"readiness evaluated"
		);
		Ok(report)
	}

	/// Addresses of every service whose name matches `pattern`.
	#[instrument(skip(self), fields(pattern = pattern.as_str()))]
	pub async fn service_endpoints(
		&self,
		namespace: &str,
		pattern: &Regex,
	) -> Result<Vec<ServiceEndpoint>, ReadinessError> {
		let services = self
			.source
			.services(namespace)
			.await
			.map_err(|source| ReadinessError::Fetch {
				kind: FetchKind::Services,
				source,
			})?;

		let endpoints: Vec<_> = services
			.iter()
			.filter(|s| pattern.is_match(object_name(&s.metadata)))
			.flat_map(endpoints_of)
			.collect();

		for endpoint in &endpoints {
			tracing::info!(
				service = %endpoint.service_name,
				ip = %endpoint.ip,
				port = ?endpoint.port,
				"service endpoint"
			);
		}
		Ok(endpoints)
	}
}
