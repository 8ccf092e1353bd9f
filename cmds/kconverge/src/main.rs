use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kconverge::{
	commands::{self, util::BrokenPipeGuard, GlobalArgs},
	telemetry,
};

#[cfg(all(
	target_os = "linux",
	feature = "mimalloc",
	not(feature = "system-alloc")
))]
#[global_allocator]
static GLOBAL: mimallocator::Mimalloc = mimallocator::Mimalloc;

#[derive(Parser)]
#[command(name = "kconverge")]
#[command(about = "Converge Kubernetes objects toward manifests and report readiness", long_about = None)]
#[command(version)]
struct Cli {
	#[command(flatten)]
	global: GlobalArgs,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Apply manifests, recreating objects whose update is rejected
	Apply(commands::apply::ApplyArgs),

	/// Delete the objects described by manifests
	Delete(commands::delete::DeleteArgs),

	/// Report readiness of deployments, stateful sets, daemon sets and services
	Check(commands::check::CheckArgs),

	/// Create or delete namespaces
	Namespace(commands::namespace::NamespaceArgs),

	/// List service addresses
	Services(commands::services::ServicesArgs),
}

async fn run(cli: Cli) -> Result<()> {
	let _telemetry = telemetry::init(cli.global.log_level, cli.global.log_format)?;
	let stdout = BrokenPipeGuard::new(std::io::stdout());
	let global = &cli.global;

	match cli.command {
		Commands::Apply(args) => commands::apply::run(args, global, stdout).await,
		Commands::Delete(args) => commands::delete::run(args, global, stdout).await,
		Commands::Check(args) => commands::check::run(args, global, stdout).await,
		Commands::Namespace(args) => commands::namespace::run(args, global, stdout).await,
		Commands::Services(args) => commands::services::run(args, global, stdout).await,
	}
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")?;

	runtime.block_on(run(cli))
}
