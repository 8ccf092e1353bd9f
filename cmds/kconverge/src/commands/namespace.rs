//! Namespace lifecycle commands.

use std::io::Write;

use anyhow::Result;
use clap::{Args, Subcommand};

use super::{GlobalArgs, Session};
use crate::k8s::reconcile::ensure_not_protected;

#[derive(Args, Debug)]
pub struct NamespaceArgs {
	#[command(subcommand)]
	pub command: NamespaceCommand,
}

#[derive(Subcommand, Debug)]
pub enum NamespaceCommand {
	/// Create a namespace labelled with its own name
	Create { name: String },

	/// Delete a namespace and everything in it
	Delete { name: String },
}

pub async fn run<W: Write>(args: NamespaceArgs, global: &GlobalArgs, mut writer: W) -> Result<()> {
	let (NamespaceCommand::Create { name } | NamespaceCommand::Delete { name }) = &args.command;
	ensure_not_protected(name)?;

	let session = Session::open(global).await?;
	let reconciler = session.reconciler();

	match args.command {
		NamespaceCommand::Create { name } => {
			if let Some(outcome) = reconciler.create_namespace(&name).await? {
				writeln!(writer, "Namespace/{name} {outcome}")?;
			}
		}
		NamespaceCommand::Delete { name } => {
			reconciler.delete_namespace(&name).await?;
			if !name.is_empty() {
				writeln!(writer, "Namespace/{name} deleted")?;
			}
		}
	}
	Ok(())
}
