use anyhow::Result;
use clap::{ArgAction, Parser};
use entando_install::{
	commands::{self, install::InstallOutcome},
	telemetry,
};

#[cfg(all(
	target_os = "linux",
	feature = "mimalloc",
	not(feature = "system-alloc")
))]
#[global_allocator]
static GLOBAL: mimallocator::Mimalloc = mimallocator::Mimalloc;

/// The Install Entando CLI simplifies the installation of Entando, a modern,
/// micro front-end platform, and guides you through setting it up in your
/// Kubernetes cluster.
///
/// All the flags are optional and only serve to bypass the guided inputs.
#[derive(Parser)]
#[command(name = "entando-install")]
#[command(version)]
// -h is the hostname
#[command(disable_help_flag = true)]
struct Cli {
	#[command(flatten)]
	install: commands::install::InstallArgs,

	/// Log level (trace, debug, info, warn, error). Overrides RUST_LOG
	#[arg(long)]
	log_level: Option<tracing::Level>,

	/// Print help
	#[arg(long, action = ArgAction::Help)]
	help: Option<bool>,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let _telemetry = telemetry::init(cli.log_level)?;

	let outcome = commands::install::run(cli.install, std::io::stdout())?;
	if outcome == InstallOutcome::Aborted {
		println!("\nExiting the program.\nHave a good rest of the day!\n");
	}
	Ok(())
}
