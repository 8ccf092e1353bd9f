//! Kubernetes cluster connection management.

use std::path::Path;

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

use crate::config::{ClusterConfig, ConnectionMode};

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("host and bearer token are required for a token connection")]
	IncompleteTokenConfig,

	#[error("invalid API server URL `{host}`")]
	InvalidHost {
		host: String,
		#[source]
		source: http::uri::InvalidUri,
	},

	#[error("unable to load kubeconfig {path}")]
	KubeconfigRead {
		path: String,
		#[source]
		source: KubeconfigError,
	},

	#[error("no context named `{0}` was found. Please check your kubeconfig")]
	ContextNotFound(String),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// Represents a connection to a Kubernetes cluster.
///
/// The connection is read-only shared state: engines clone the client out of
/// it and never mutate it.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	server_version: Info,
	/// Human-readable identifier for the cluster (context name or API server URL).
	cluster_identifier: String,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("cluster_identifier", &self.cluster_identifier)
			.field("server_version", &self.server_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect using the given configuration.
	///
	/// - [`ConnectionMode::Kubeconfig`]: reads the kubeconfig at `configPath`
	///   (or the default location) and uses `contextName` when set, otherwise
	///   the kubeconfig's current context.
	/// - [`ConnectionMode::Token`]: connects to `host` with `bearerToken`.
	#[instrument(skip_all, fields(mode = ?config.connection_mode))]
	pub async fn from_config(config: &ClusterConfig) -> Result<Self, ConnectionError> {
		match config.connection_mode {
			ConnectionMode::Kubeconfig => {
				let kubeconfig = match config.kubeconfig_path() {
					Some(path) => read_kubeconfig(&path)?,
					None => Kubeconfig::read()?,
				};
				Self::from_config_with_kubeconfig(config, kubeconfig).await
			}
			ConnectionMode::Token => Self::from_token(config).await,
		}
	}

	/// Connect using the configuration and a provided kubeconfig.
	#[instrument(skip_all)]
	pub async fn from_config_with_kubeconfig(
		config: &ClusterConfig,
		kubeconfig: Kubeconfig,
	) -> Result<Self, ConnectionError> {
		let context = config.context_name.clone().filter(|c| !c.is_empty());

		if let Some(name) = &context {
			if !kubeconfig.contexts.iter().any(|c| &c.name == name) {
				return Err(ConnectionError::ContextNotFound(name.clone()));
			}
		}

		let cluster_identifier = match &context {
			Some(name) => format!("context:{name}"),
			None => format!(
				"context:{}",
				kubeconfig.current_context.as_deref().unwrap_or("<current>")
			),
		};

		tracing::debug!(cluster = %cluster_identifier, "loading kubeconfig");

		let mut kube_config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context,
				..Default::default()
			},
		)
		.await?;
		if config.insecure_skip_verify {
			kube_config.accept_invalid_certs = true;
		}

		Self::connect(kube_config, config, cluster_identifier).await
	}

	/// Connect to an API server with a bearer token.
	#[instrument(skip_all)]
	async fn from_token(config: &ClusterConfig) -> Result<Self, ConnectionError> {
		let (Some(host), Some(token)) = (
			config.host.as_deref().filter(|h| !h.is_empty()),
			config.bearer_token.as_deref().filter(|t| !t.is_empty()),
		) else {
			return Err(ConnectionError::IncompleteTokenConfig);
		};

		let url = host
			.parse::<http::Uri>()
			.map_err(|source| ConnectionError::InvalidHost {
				host: host.to_string(),
				source,
			})?;

		let mut kube_config = Config::new(url);
		kube_config.auth_info.token = Some(token.to_string().into());
		kube_config.accept_invalid_certs = config.insecure_skip_verify;

		Self::connect(kube_config, config, host.to_string()).await
	}

	async fn connect(
		mut kube_config: Config,
		config: &ClusterConfig,
		cluster_identifier: String,
	) -> Result<Self, ConnectionError> {
		let timeout = config.api_timeout();
		kube_config.connect_timeout = Some(timeout);
		kube_config.read_timeout = Some(timeout);
		kube_config.write_timeout = Some(timeout);

		let client = Client::try_from(kube_config)?;
		let server_version = client.apiserver_version().await?;

		tracing::debug!(
			cluster = %cluster_identifier,
			server_version = %format!("{}.{}", server_version.major, server_version.minor),
			"connected to cluster"
		);

		Ok(Self {
			client,
			server_version,
			cluster_identifier,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Get the server version.
	pub fn server_version(&self) -> &Info {
		&self.server_version
	}

	/// Get the default namespace from the current context.
	pub fn default_namespace(&self) -> &str {
		self.client.default_namespace()
	}

	/// Get the cluster identifier (context name or API server URL).
	pub fn cluster_identifier(&self) -> &str {
		&self.cluster_identifier
	}
}

fn read_kubeconfig(path: &Path) -> Result<Kubeconfig, ConnectionError> {
	Kubeconfig::read_from(path).map_err(|source| ConnectionError::KubeconfigRead {
		path: path.display().to_string(),
		source,
	})
}
