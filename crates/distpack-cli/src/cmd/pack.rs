//! Pack command

use anyhow::{Context, Result};
use distpack_core::{PackConfig, PackPlan, Packer};
use std::path::Path;
use tracing::info;

use crate::ArchiverArgs;

/// Stage everything a plan lists and write the package and manifest to `out`.
pub fn pack(plan_path: &Path, config: Option<&Path>, out: &Path, archiver: &ArchiverArgs) -> Result<()> {
    let config = match config {
        Some(path) => PackConfig::from_file(path)
            .with_context(|| format!("Failed to load pack config {}", path.display()))?,
        None => PackConfig::default(),
    };
    let plan = PackPlan::from_file(plan_path)
        .with_context(|| format!("Failed to load plan {}", plan_path.display()))?;
    if plan.dirs.is_empty() {
        anyhow::bail!("Plan {} lists no fake directories", plan_path.display());
    }

    let mut packer = Packer::new(archiver.build()?, config)?;
    let bytes = packer.apply_plan(&plan).context("Failed to stage files")?;
    info!(bytes, "Staged");

    let output = packer.finalize(out).context("Failed to write package")?;
    println!("package  {}", output.package_path.display());
    println!("manifest {}", output.manifest_path.display());
    println!(
        "{} files in {} fake directories, {} pre-extracted plugins",
        output.files,
        packer.manifest().dirs().len(),
        output.plugins
    );
    Ok(())
}
