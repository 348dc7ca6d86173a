//! distpack - fake-directory packaging
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
//!
//! `pack` stages files into fake directories and writes one package archive
//! plus its manifest. `install` reads the manifest back and lays the files
//! out across real directories given on the command line, in order.
//!
//! # Example
//!
//! ```text
//! distpack pack --plan plan.toml --out dist
//! distpack inspect dist/install.distinfo
//! distpack install dist/install.distinfo --dest /opt/app --dest /opt/app/plugins
//! ```

pub mod cmd;

use clap::{Parser, Subcommand, ValueEnum};
use distpack_core::{Archiver, DistError, SevenZip, TarZst};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "distpack")]
#[command(author, version, about = "distpack - pack files into fake directories")]
pub struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Archive backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ArchiverKind {
    /// External 7-Zip executable
    #[value(name = "7z")]
    SevenZip,
    /// Built-in tar with zstd compression
    TarZst,
}

/// Options shared by commands that run an archiver.
#[derive(Debug, Clone, clap::Args)]
pub struct ArchiverArgs {
    /// Archive backend
    #[arg(long, value_enum, default_value = "7z", env = "DISTPACK_ARCHIVER")]
    pub archiver: ArchiverKind,

    /// Path to the 7-Zip executable (default: search PATH)
    #[arg(long, env = "DISTPACK_7Z")]
    pub seven_zip: Option<PathBuf>,

    /// Kill a single 7-Zip invocation after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl ArchiverArgs {
    /// Build the selected backend.
    pub fn build(&self) -> Result<Box<dyn Archiver>, DistError> {
        match self.archiver {
            ArchiverKind::TarZst => Ok(Box::new(TarZst::new())),
            ArchiverKind::SevenZip => {
                let mut zip = match &self.seven_zip {
                    Some(path) => SevenZip::with_program(path),
                    None => SevenZip::locate()?,
                };
                if let Some(secs) = self.timeout {
                    zip = zip.with_timeout(Duration::from_secs(secs));
                }
                Ok(Box::new(zip))
            }
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Stage files per a plan and write a package and manifest
    Pack {
        /// Plan file listing fake directories and their entries
        #[arg(long)]
        plan: PathBuf,
        /// Pack configuration (compression, pre-extract plugins)
        #[arg(long, short)]
        config: Option<PathBuf>,
        /// Output directory for the package and manifest
        #[arg(long, short, default_value = ".")]
        out: PathBuf,
        #[command(flatten)]
        archiver: ArchiverArgs,
    },
    /// Install a package into real directories, one per fake directory
    Install {
        /// Manifest file (deleted after it is read)
        manifest: PathBuf,
        /// Real directory for the next fake directory, in order
        #[arg(long = "dest", short = 'd', required = true)]
        dests: Vec<PathBuf>,
        /// Install configuration (digest, strict mode, work root)
        #[arg(long, short)]
        config: Option<PathBuf>,
        /// Fail when the number of --dest differs from the fake directory count
        #[arg(long)]
        strict: bool,
        #[command(flatten)]
        archiver: ArchiverArgs,
    },
    /// Print the contents of a manifest without consuming it
    Inspect {
        /// Manifest file
        manifest: PathBuf,
        /// Trailer digest the manifest was written with
        #[arg(long, value_enum, default_value = "md5")]
        digest: DigestArg,
        /// List every file, not just counts
        #[arg(long, short)]
        files: bool,
    },
}

/// Digest algorithm names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DigestArg {
    /// MD5
    Md5,
    /// BLAKE3 truncated to 16 bytes
    Blake3,
}

impl From<DigestArg> for distpack_schema::DigestAlgorithm {
    fn from(arg: DigestArg) -> Self {
        match arg {
            DigestArg::Md5 => Self::Md5,
            DigestArg::Blake3 => Self::Blake3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn install_collects_dests_in_order() {
        let cli = Cli::parse_from([
            "distpack",
            "install",
            "m.distinfo",
            "-d",
            "/a",
            "--dest",
            "/b",
            "--archiver",
            "tar-zst",
        ]);
        match cli.command {
            Commands::Install { dests, archiver, strict, .. } => {
                assert_eq!(dests, [PathBuf::from("/a"), PathBuf::from("/b")]);
                assert_eq!(archiver.archiver, ArchiverKind::TarZst);
                assert!(!strict);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn tar_zst_backend_builds_without_7z() {
        let args = ArchiverArgs {
            archiver: ArchiverKind::TarZst,
            seven_zip: None,
            timeout: None,
        };
        assert_eq!(args.build().unwrap().archive_extension(), "tar.zst");
    }
}
