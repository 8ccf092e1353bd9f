//! Services command handler.

use std::io::Write;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use regex::Regex;

use super::{GlobalArgs, Session};
use crate::k8s::readiness::ServiceEndpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
	#[default]
	Text,
	Json,
	Yaml,
}

#[derive(Args, Debug)]
pub struct ServicesArgs {
	/// Regular expression matched against service names
	#[arg(default_value = ".*")]
	pub pattern: String,

	/// Namespace to list (defaults to the context's namespace)
	#[arg(short = 'n', long)]
	pub namespace: Option<String>,

	#[arg(short = 'o', long, value_enum, default_value_t)]
	pub output: OutputFormat,
}

pub async fn run<W: Write>(args: ServicesArgs, global: &GlobalArgs, mut writer: W) -> Result<()> {
	let pattern = Regex::new(&args.pattern)
		.with_context(|| format!("invalid service pattern `{}`", args.pattern))?;
	let session = Session::open(global).await?;
	let namespace = session.namespace_or_default(args.namespace.as_deref());

	let endpoints = session
		.aggregator()
		.service_endpoints(&namespace, &pattern)
		.await?;
	write_endpoints(&endpoints, args.output, &mut writer)?;
	writer.flush()?;
	Ok(())
}

fn write_endpoints<W: Write>(endpoints: &[ServiceEndpoint], format: OutputFormat, writer: &mut W) -> Result<()> {
	match format {
		OutputFormat::Text => {
			for endpoint in endpoints {
				let address = match endpoint.port {
					Some(port) => format!("{}:{port}", endpoint.ip),
					None => endpoint.ip.clone(),
				};
				writeln!(
					writer,
					"{}\t{}\t{address}",
					endpoint.service_name, endpoint.service_type
				)?;
			}
		}
		OutputFormat::Json => {
			serde_json::to_writer_pretty(&mut *writer, endpoints)?;
			writeln!(writer)?;
		}
		OutputFormat::Yaml => {
			write!(writer, "{}", serde_yaml_with_quirks::to_string(endpoints)?)?;
		}
	}
	Ok(())
}
