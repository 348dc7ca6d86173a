//! Print a manifest summary: `cargo run --example inspect -- <path> [md5|blake3]`

use distpack_schema::{DEFAULT_MANIFEST_NAME, DigestAlgorithm, Manifest};
use std::path::Path;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let path = if args.len() > 1 {
        args[1].clone()
    } else {
        DEFAULT_MANIFEST_NAME.to_string()
    };
    let digest = match args.get(2).map(String::as_str) {
        Some("blake3") => DigestAlgorithm::Blake3,
        _ => DigestAlgorithm::Md5,
    };

    let manifest = Manifest::load(Path::new(&path), digest)?;
    println!("Package: {}", manifest.package_name().unwrap_or("<none>"));
    println!("Fake directories ({}):", manifest.dirs().len());

    for dir in manifest.dirs() {
        println!(" - {} ({} files)", dir.name, dir.files.len());
    }

    for plugin in manifest.plugins() {
        println!("Plugin: {} [{}]", plugin.path, plugin.compress_param);
    }

    Ok(())
}
