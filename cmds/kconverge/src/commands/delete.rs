//! Delete command handler.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use tracing::instrument;

use super::{util::read_manifests, GlobalArgs, Session};
use crate::yaml::split_documents;

#[derive(Args, Debug)]
pub struct DeleteArgs {
	/// Manifest file whose objects should be deleted, or `-` for stdin
	pub file: String,

	/// Namespace for every document, overriding the documents' own
	#[arg(short = 'n', long)]
	pub namespace: Option<String>,
}

/// Delete the objects of every document, in order.
#[instrument(skip_all, fields(file = %args.file))]
pub async fn run<W: Write>(args: DeleteArgs, global: &GlobalArgs, mut writer: W) -> Result<()> {
	let manifests = read_manifests(&args.file)?;
	let session = Session::open(global).await?;
	if split_documents(&manifests).len() > 1 {
		session.warm_discovery().await;
	}
	let reconciler = session.reconciler();
	let namespace = args.namespace.as_deref().unwrap_or_default();

	let deleted = reconciler
		.delete_all(&manifests, namespace)
		.await
		.with_context(|| format!("deleting {}", args.file))?;

	let suffix = if reconciler.options().dry_run {
		" (server dry run)"
	} else {
		""
	};
	for manifest in &deleted {
		writeln!(writer, "{}/{} deleted{suffix}", manifest.kind(), manifest.name())?;
	}
	writer.flush()?;
	Ok(())
}
