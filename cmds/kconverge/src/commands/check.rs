//! Check command handler.
//!
//! Evaluates readiness once, or polls until everything is ready when `--wait`
//! is given. The polling policy lives here; the aggregator itself is a single
//! read-evaluate-render pass.

use std::{io::Write, time::Duration};

use anyhow::{bail, Result};
use clap::Args;
use tokio::time::{sleep, Instant};
use tracing::instrument;

use super::{util::ColorMode, GlobalArgs, Session};
use crate::k8s::readiness::{ReadinessAggregator, ReadinessReport};

#[derive(Args, Debug)]
pub struct CheckArgs {
	/// Checks of the form kind:pattern, kind being one of deployment, replica,
	/// stateful, demonset or service
	pub checks: Vec<String>,

	/// Namespace to check (defaults to the context's namespace)
	#[arg(short = 'n', long)]
	pub namespace: Option<String>,

	/// Succeed only if no object matches any check
	#[arg(long)]
	pub none_running: bool,

	/// Poll until the check succeeds or the timeout expires
	#[arg(long)]
	pub wait: bool,

	/// Seconds to wait for with --wait
	#[arg(long, default_value_t = 300)]
	pub timeout: u64,

	/// Seconds between polls with --wait
	#[arg(long, default_value_t = 5)]
	pub interval: u64,

	/// Colour the Ready / Not Ready tags
	#[arg(long, value_enum, default_value_t)]
	pub color: ColorMode,
}

/// Polling policy for `--wait`.
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
	pub timeout: Duration,
	pub interval: Duration,
}

#[instrument(skip_all, fields(checks = ?args.checks))]
pub async fn run<W: Write>(args: CheckArgs, global: &GlobalArgs, mut writer: W) -> Result<()> {
	let session = Session::open(global).await?;
	let namespace = session.namespace_or_default(args.namespace.as_deref());
	let aggregator = session.aggregator().with_color(args.color.should_colorize());

	let wait = args.wait.then(|| WaitPolicy {
		timeout: Duration::from_secs(args.timeout),
		interval: Duration::from_secs(args.interval.max(1)),
	});

	let report = poll(&aggregator, &namespace, &args.checks, args.none_running, wait).await?;
	for line in report.lines() {
		writeln!(writer, "{line}")?;
	}
	writer.flush()?;

	if !report.all_ready {
		if args.none_running {
			bail!("resources are still running in namespace {namespace}");
		}
		bail!("resources are not ready in namespace {namespace}");
	}
	Ok(())
}

/// Check once, or repeatedly until ready or `wait.timeout` elapses.
///
/// Returns the last report either way; fetch errors abort immediately.
pub async fn poll(
	aggregator: &ReadinessAggregator,
	namespace: &str,
	checks: &[String],
	none_running: bool,
	wait: Option<WaitPolicy>,
) -> Result<ReadinessReport> {
	let started = Instant::now();
	loop {
		let report = aggregator.check(namespace, checks, none_running).await?;
		let Some(wait) = wait else {
			return Ok(report);
		};
		if report.all_ready || started.elapsed() + wait.interval > wait.timeout {
			return Ok(report);
		}

		let pending = report.records.iter().filter(|r| !r.ready).count();
		tracing::info!(
			pending,
			matched = report.records.len(),
			"waiting for readiness"
		);
		sleep(wait.interval).await;
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::test_utils::{deployment, Call, FakeCluster};

	#[tokio::test]
	async fn test_poll_without_wait_checks_once() {
		let cluster = Arc::new(FakeCluster::new().with_object("ns", deployment("web", Some(0), Some(1))));
		let aggregator = ReadinessAggregator::new(cluster.clone());

		let report = poll(&aggregator, "ns", &["deployment:web".to_string()], false, None)
			.await
			.unwrap();
		assert!(!report.all_ready);

		let deployment_lists = cluster
			.calls()
			.into_iter()
			.filter(|c| matches!(c, Call::List { kind: "Deployment", .. }))
			.count();
		assert_eq!(deployment_lists, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_poll_gives_up_after_timeout() {
		let cluster = Arc::new(FakeCluster::new().with_object("ns", deployment("web", Some(0), Some(1))));
		let aggregator = ReadinessAggregator::new(cluster.clone());
		let wait = WaitPolicy {
			timeout: Duration::from_secs(10),
			interval: Duration::from_secs(3),
		};

		let report = poll(&aggregator, "ns", &["deployment:web".to_string()], false, Some(wait))
			.await
			.unwrap();
		assert!(!report.all_ready);

		// Polls at 0s, 3s, 6s and 9s; another interval would overrun the deadline.
		let deployment_lists = cluster
			.calls()
			.into_iter()
			.filter(|c| matches!(c, Call::List { kind: "Deployment", .. }))
			.count();
		assert_eq!(deployment_lists, 4);
	}

	#[tokio::test(start_paused = true)]
	async fn test_poll_returns_as_soon_as_ready() {
		let cluster = Arc::new(FakeCluster::new().with_object("ns", deployment("web", Some(1), Some(1))));
		let aggregator = ReadinessAggregator::new(cluster);
		let wait = WaitPolicy {
			timeout: Duration::from_secs(60),
			interval: Duration::from_secs(5),
		};

		let report = poll(&aggregator, "ns", &["deployment:web".to_string()], false, Some(wait))
			.await
			.unwrap();
		assert!(report.all_ready);
	}
}
