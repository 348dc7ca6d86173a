//! Well-known paths and path helpers.

use std::path::{Path, PathBuf};

/// Suffix appended to a plugin path to name its exploded marker directory.
pub const MARKER_SUFFIX: &str = ".distbin";

/// Root for staging, scratch, and install work directories.
///
/// `DISTPACK_TMP` overrides the system temp directory.
pub fn tmp_path() -> PathBuf {
    match std::env::var_os("DISTPACK_TMP") {
        Some(val) if !val.is_empty() => PathBuf::from(val),
        _ => std::env::temp_dir(),
    }
}

/// Marker directory for a plugin: `<root>/<plugin path><MARKER_SUFFIX>`.
pub fn marker_dir(root: &Path, plugin_rel: &Path) -> PathBuf {
    let mut name = root.join(plugin_rel).into_os_string();
    name.push(MARKER_SUFFIX);
    PathBuf::from(name)
}
