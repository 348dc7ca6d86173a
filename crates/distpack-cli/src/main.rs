//! distpack - fake-directory packaging CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use distpack_cli::cmd;
use distpack_cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Pack {
            plan,
            config,
            out,
            archiver,
        } => cmd::pack::pack(&plan, config.as_deref(), &out, &archiver),
        Commands::Install {
            manifest,
            dests,
            config,
            strict,
            archiver,
        } => cmd::install::install(&manifest, &dests, config.as_deref(), strict, &archiver),
        Commands::Inspect {
            manifest,
            digest,
            files,
        } => cmd::inspect::inspect(&manifest, digest.into(), files),
    }
}
