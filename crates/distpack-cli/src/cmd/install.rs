//! Install command

use anyhow::{Context, Result};
use distpack_core::{InstallConfig, Installer};
use std::path::{Path, PathBuf};

use crate::ArchiverArgs;

/// Install the package described by `manifest` into `dests`, in order.
pub fn install(
    manifest: &Path,
    dests: &[PathBuf],
    config: Option<&Path>,
    strict: bool,
    archiver: &ArchiverArgs,
) -> Result<()> {
    let mut config = match config {
        Some(path) => InstallConfig::load_or_default(path)
            .with_context(|| format!("Failed to load install config {}", path.display()))?,
        None => InstallConfig::default(),
    };
    config.strict_dir_count |= strict;

    let mut installer = Installer::init(manifest, archiver.build()?, config)
        .with_context(|| format!("Failed to read manifest {}", manifest.display()))?;
    for dest in dests {
        installer.register_real_dir(dest.as_path())?;
    }

    let result = installer.extract_and_distribute();
    let clean = installer.free();
    let report = result.context("Installation failed")?;

    println!(
        "{} files ({} bytes) into {} directories",
        report.files, report.bytes, report.dirs
    );
    if report.unmatched_fake > 0 {
        println!("{} fake directories had no destination", report.unmatched_fake);
    }
    if report.unmatched_real > 0 {
        println!("{} destinations were not used", report.unmatched_real);
    }
    if !clean {
        println!("Work directory could not be fully removed");
    }
    Ok(())
}
