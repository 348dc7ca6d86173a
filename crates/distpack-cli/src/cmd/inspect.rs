//! Inspect command

use anyhow::{Context, Result};
use distpack_schema::{DigestAlgorithm, Manifest};
use std::path::Path;

/// Print a manifest's package name, fake directories, and plugins.
pub fn inspect(path: &Path, digest: DigestAlgorithm, list_files: bool) -> Result<()> {
    let manifest =
        Manifest::load(path, digest).with_context(|| format!("Failed to read {}", path.display()))?;

    println!("package: {}", manifest.package_name().unwrap_or("<none>"));
    println!("digest:  {digest}");
    for (index, dir) in manifest.dirs().iter().enumerate() {
        println!("[{index}] {} ({} files)", dir.name, dir.files.len());
        if list_files {
            for file in &dir.files {
                println!("    {file}");
            }
        }
    }
    for plugin in manifest.plugins() {
        println!("plugin: {} [{}]", plugin.path, plugin.compress_param);
    }
    Ok(())
}
