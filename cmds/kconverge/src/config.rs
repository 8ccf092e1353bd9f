//! Configuration file support for kconverge
//!
//! Supports `.kconverge.yaml` files that can be placed anywhere in the
//! directory hierarchy. kconverge searches from the working directory upward
//! to the filesystem root. Command-line flags override file values.

use std::{
	fmt, fs,
	path::{Path, PathBuf},
	time::Duration,
};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::k8s::reconcile::ReconcileOptions;

/// The name of the config file kconverge looks for
pub const CONFIG_FILE_NAME: &str = ".kconverge.yaml";

/// Default timeout for Kubernetes API requests.
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file: {}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file: {}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_yaml_with_quirks::Error,
	},
}

/// How to authenticate against the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionMode {
	/// Read credentials and endpoint from a kubeconfig file.
	#[default]
	Kubeconfig,

	/// Connect to an explicit host with a bearer token.
	Token,
}

/// Connection and behaviour settings consumed by the engines.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterConfig {
	pub connection_mode: ConnectionMode,

	/// Kubeconfig context to use instead of the current one.
	pub context_name: Option<String>,

	/// Path to the kubeconfig. A path ending in `/` names a directory holding
	/// a `config` file.
	pub config_path: Option<PathBuf>,

	/// API server URL for token connections.
	pub host: Option<String>,

	pub bearer_token: Option<String>,

	pub insecure_skip_verify: bool,

	/// Send mutating calls as server-side dry runs and never fall back to
	/// delete-and-recreate.
	pub dry_run: bool,

	/// Log intermediate errors that are folded into the fallback path.
	pub verbose: bool,

	/// Per-request timeout applied to connect, read and write.
	pub timeout_seconds: Option<u64>,
}

impl fmt::Debug for ClusterConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ClusterConfig")
			.field("connection_mode", &self.connection_mode)
			.field("context_name", &self.context_name)
			.field("config_path", &self.config_path)
			.field("host", &self.host)
			.field(
				"bearer_token",
				&self.bearer_token.as_ref().map(|_| "<redacted>"),
			)
			.field("insecure_skip_verify", &self.insecure_skip_verify)
			.field("dry_run", &self.dry_run)
			.field("verbose", &self.verbose)
			.field("timeout_seconds", &self.timeout_seconds)
			.finish()
	}
}

impl ClusterConfig {
	/// Load config by searching from the given directory upward
	pub fn load_from_directory(start_dir: &Path) -> Result<Option<Self>, ConfigError> {
		match find_config_file(start_dir) {
			Some(config_path) => Self::load_from_file(&config_path).map(Some),
			None => Ok(None),
		}
	}

	/// Load config from a specific file path
	pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		serde_yaml_with_quirks::from_str(&content).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Resolved kubeconfig file, or `None` for the default location.
	pub fn kubeconfig_path(&self) -> Option<PathBuf> {
		let path = self.config_path.as_ref()?;
		if path.as_os_str().is_empty() {
			return None;
		}
		if path.to_string_lossy().ends_with('/') {
			return Some(path.join("config"));
		}
		Some(path.clone())
	}

	pub fn api_timeout(&self) -> Duration {
		self.timeout_seconds
			.filter(|secs| *secs > 0)
			.map_or(DEFAULT_API_TIMEOUT, Duration::from_secs)
	}

	pub fn reconcile_options(&self) -> ReconcileOptions {
		ReconcileOptions {
			dry_run: self.dry_run,
			verbose: self.verbose,
			..ReconcileOptions::default()
		}
	}
}

/// Search for a config file starting from `start_dir` and walking up to the filesystem root
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let mut current = start_dir.to_path_buf();

	// Canonicalize if possible to handle relative paths
	if let Ok(canonical) = current.canonicalize() {
		current = canonical;
	}

	loop {
		let config_path = current.join(CONFIG_FILE_NAME);
		if config_path.exists() {
			return Some(config_path);
		}

		match current.parent() {
			Some(parent) if parent != current => current = parent.to_path_buf(),
			_ => return None,
		}
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use indoc::indoc;
	use tempfile::TempDir;

	use super::*;

	#[test]
	fn test_find_config_in_current_dir() {
		let temp = TempDir::new().unwrap();
		let config_path = temp.path().join(CONFIG_FILE_NAME);
		fs::write(&config_path, "dryRun: true\n").unwrap();

		let found = find_config_file(temp.path());
		// Compare file names only to avoid canonicalization issues on macOS
		assert!(found.is_some());
		assert_eq!(found.unwrap().file_name(), config_path.file_name());
	}

	#[test]
	fn test_find_config_in_parent_dir() {
		let temp = TempDir::new().unwrap();
		fs::write(temp.path().join(CONFIG_FILE_NAME), "verbose: true\n").unwrap();

		let subdir = temp.path().join("nested").join("deeper");
		fs::create_dir_all(&subdir).unwrap();

		let config = ClusterConfig::load_from_directory(&subdir)
			.unwrap()
			.expect("config should be found in a parent directory");
		assert!(config.verbose);
	}

	#[test]
	fn test_load_full_config() {
		let temp = TempDir::new().unwrap();
		let path = temp.path().join(CONFIG_FILE_NAME);
		fs::write(
			&path,
			indoc! {"
				connectionMode: token
				host: https://cluster:6443
				bearerToken: s3cret
				insecureSkipVerify: true
				dryRun: true
				verbose: true
				timeoutSeconds: 5
			"},
		)
		.unwrap();

		let config = ClusterConfig::load_from_file(&path).unwrap();
		assert_eq!(config.connection_mode, ConnectionMode::Token);
		assert_eq!(config.host.as_deref(), Some("https://cluster:6443"));
		assert_eq!(config.bearer_token.as_deref(), Some("s3cret"));
		assert!(config.insecure_skip_verify);
		assert!(config.dry_run);
		assert_eq!(config.api_timeout(), Duration::from_secs(5));

		let options = config.reconcile_options();
		assert!(options.dry_run);
		assert!(options.verbose);
	}

	#[test]
	fn test_debug_redacts_token() {
		let config = ClusterConfig {
			bearer_token: Some("s3cret".to_string()),
			..ClusterConfig::default()
		};
		let debug = format!("{config:?}");
		assert!(!debug.contains("s3cret"));
		assert!(debug.contains("<redacted>"));
	}

	#[test]
	fn test_load_invalid_config() {
		let temp = TempDir::new().unwrap();
		let path = temp.path().join(CONFIG_FILE_NAME);
		fs::write(&path, "dryRun: [not, a, bool]\n").unwrap();

		let result = ClusterConfig::load_from_file(&path);
		assert_matches!(result, Err(ConfigError::Parse { .. }));
	}

	#[test]
	fn test_kubeconfig_path_resolution() {
		let mut config = ClusterConfig::default();
		assert_eq!(config.kubeconfig_path(), None);

		config.config_path = Some(PathBuf::from("/etc/kube/"));
		assert_eq!(
			config.kubeconfig_path(),
			Some(PathBuf::from("/etc/kube/config"))
		);

		config.config_path = Some(PathBuf::from("/etc/kube/admin.conf"));
		assert_eq!(
			config.kubeconfig_path(),
			Some(PathBuf::from("/etc/kube/admin.conf"))
		);
	}

	#[test]
	fn test_default_timeout() {
		let config = ClusterConfig {
			timeout_seconds: Some(0),
			..ClusterConfig::default()
		};
		assert_eq!(config.api_timeout(), DEFAULT_API_TIMEOUT);
	}
}
