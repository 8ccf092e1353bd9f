//! Command handlers and the connection flags they share.

pub mod apply;
pub mod check;
pub mod delete;
pub mod namespace;
pub mod services;

pub mod util;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Args;
use tracing::Level;

use crate::{
	config::{ClusterConfig, ConnectionMode},
	k8s::{
		client::ClusterConnection,
		cluster::KubeCluster,
		readiness::ReadinessAggregator,
		reconcile::ResourceReconciler,
	},
	telemetry::LogFormat,
};

/// Flags accepted by every command.
///
/// Values given here override the `.kconverge.yaml` found from the working
/// directory.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
	/// Configuration file to use instead of the nearest .kconverge.yaml
	#[arg(long, global = true)]
	pub config: Option<PathBuf>,

	/// How to authenticate against the cluster
	#[arg(long, value_enum, global = true)]
	pub connection_mode: Option<ConnectionMode>,

	/// Kubeconfig context to use
	#[arg(short = 'c', long, global = true)]
	pub context: Option<String>,

	/// Path to the kubeconfig file, or a directory ending in `/`
	#[arg(short = 'p', long, global = true)]
	pub kubeconfig: Option<PathBuf>,

	/// API server URL (token mode)
	#[arg(long, global = true)]
	pub host: Option<String>,

	/// Bearer token (token mode)
	#[arg(long, env = "KCONVERGE_TOKEN", hide_env_values = true, global = true)]
	pub token: Option<String>,

	/// Skip TLS verification of the API server certificate
	#[arg(long, global = true)]
	pub insecure_skip_tls_verify: bool,

	/// Send every change as a server-side dry run
	#[arg(long, global = true)]
	pub dry_run: bool,

	/// Also log errors that are recovered from
	#[arg(short = 'v', long, global = true)]
	pub verbose: bool,

	/// Per-request API timeout in seconds
	#[arg(long, global = true)]
	pub api_timeout: Option<u64>,

	/// Log level (overrides RUST_LOG)
	#[arg(long, global = true)]
	pub log_level: Option<Level>,

	/// Log output format
	#[arg(long, value_enum, default_value_t, global = true)]
	pub log_format: LogFormat,
}

impl GlobalArgs {
	/// Load the config file and apply flag overrides on top of it.
	pub fn resolve_config(&self) -> Result<ClusterConfig> {
		let mut config = match &self.config {
			Some(path) => ClusterConfig::load_from_file(path)?,
			None => {
				let cwd = std::env::current_dir().context("reading working directory")?;
				ClusterConfig::load_from_directory(&cwd)?.unwrap_or_default()
			}
		};
		self.apply_overrides(&mut config);
		Ok(config)
	}

	fn apply_overrides(&self, config: &mut ClusterConfig) {
		if let Some(mode) = self.connection_mode {
			config.connection_mode = mode;
		}
		if let Some(context) = &self.context {
			config.context_name = Some(context.clone());
		}
		if let Some(path) = &self.kubeconfig {
			config.config_path = Some(path.clone());
		}
		if let Some(host) = &self.host {
			config.host = Some(host.clone());
		}
		if let Some(token) = &self.token {
			config.bearer_token = Some(token.clone());
		}
		if self.api_timeout.is_some() {
			config.timeout_seconds = self.api_timeout;
		}
		config.insecure_skip_verify |= self.insecure_skip_tls_verify;
		config.dry_run |= self.dry_run;
		config.verbose |= self.verbose;
	}
}

/// Everything a command needs to talk to the cluster.
pub struct Session {
	pub connection: ClusterConnection,
	pub cluster: KubeCluster,
	pub config: ClusterConfig,
}

impl Session {
	pub async fn open(args: &GlobalArgs) -> Result<Self> {
		let config = args.resolve_config()?;
		tracing::debug!(?config, "resolved configuration");

		let connection = ClusterConnection::from_config(&config)
			.await
			.context("connecting to cluster")?;
		tracing::info!(cluster = %connection.cluster_identifier(), "connected");

		let cluster = KubeCluster::from_connection(&connection);
		Ok(Self {
			connection,
			cluster,
			config,
		})
	}

	/// Prefill discovery before a multi-document run. Failures only cost the
	/// lazy per-kind lookups later.
	pub async fn warm_discovery(&self) {
		if let Err(error) = self.cluster.mapper().warm().await {
			tracing::warn!(%error, "discovery warm-up failed, resolving lazily");
		}
	}

	pub fn reconciler(&self) -> ResourceReconciler {
		ResourceReconciler::new(Arc::new(self.cluster.clone()), self.config.reconcile_options())
	}

	pub fn aggregator(&self) -> ReadinessAggregator {
		ReadinessAggregator::new(Arc::new(self.cluster.clone()))
	}

	/// `namespace` if given, else the namespace of the kubeconfig context.
	pub fn namespace_or_default(&self, namespace: Option<&str>) -> String {
		namespace
			.filter(|ns| !ns.is_empty())
			.unwrap_or_else(|| self.connection.default_namespace())
			.to_string()
	}
}
