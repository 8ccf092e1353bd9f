//! Apply command handler.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use tracing::instrument;

use super::{util::read_manifests, GlobalArgs, Session};
use crate::yaml::split_documents;

#[derive(Args, Debug)]
pub struct ApplyArgs {
	/// Manifest file to apply, or `-` for stdin
	pub file: String,

	/// Namespace for every document, overriding the documents' own
	#[arg(short = 'n', long)]
	pub namespace: Option<String>,

	/// Create the target namespace first
	#[arg(long, requires = "namespace")]
	pub create_namespace: bool,
}

/// Apply every document of the manifest stream in order.
#[instrument(skip_all, fields(file = %args.file))]
pub async fn run<W: Write>(args: ApplyArgs, global: &GlobalArgs, mut writer: W) -> Result<()> {
	let manifests = read_manifests(&args.file)?;
	let session = Session::open(global).await?;
	if split_documents(&manifests).len() > 1 {
		session.warm_discovery().await;
	}
	let reconciler = session.reconciler();
	let namespace = args.namespace.as_deref().unwrap_or_default();
	let suffix = if reconciler.options().dry_run {
		" (server dry run)"
	} else {
		""
	};

	if args.create_namespace {
		if let Some(outcome) = reconciler.create_namespace(namespace).await? {
			writeln!(writer, "Namespace/{namespace} {outcome}{suffix}")?;
		}
	}

	let outcomes = reconciler
		.apply_all(&manifests, namespace)
		.await
		.with_context(|| format!("applying {}", args.file))?;

	for doc in &outcomes {
		writeln!(writer, "{}/{} {}{suffix}", doc.kind, doc.name, doc.outcome)?;
	}
	writer.flush()?;
	Ok(())
}
