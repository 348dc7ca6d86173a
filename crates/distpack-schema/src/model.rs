//! In-memory manifest and its append-only mutation API.
//!
//! Every mutation either grows the manifest by exactly one element or fails
//! leaving it untouched: capacity is reserved with `try_reserve` before
//! anything is pushed, so an allocation failure surfaces as
//! [`ManifestError::Allocation`] instead of aborting or half-appending.

use std::path::{Component, Path, PathBuf};

use crate::WIRE_SEPARATOR;
use crate::error::ManifestError;

/// A named logical group of files inside the package.
///
/// Names are not required to be unique; the position of a fake directory in
/// [`Manifest::dirs`] is the only identity an installer relies on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FakeDir {
    /// Group name as registered by the build driver.
    pub name: String,
    /// Staging-relative file paths, in registration order.
    pub files: Vec<String>,
}

/// A subtree that is recompressed with its own parameters at install time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Plugin {
    /// Staging-relative path of the original archive file.
    pub path: String,
    /// Archiver parameters, passed through verbatim.
    pub compress_param: String,
}

/// The decoded or under-construction manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    pub(crate) dirs: Vec<FakeDir>,
    pub(crate) plugins: Vec<Plugin>,
    pub(crate) package_name: Option<String>,
}

impl Manifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fake directories in registration order.
    pub fn dirs(&self) -> &[FakeDir] {
        &self.dirs
    }

    /// Pre-extract plugins in registration order.
    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    /// File name of the package archive, if one has been recorded.
    pub fn package_name(&self) -> Option<&str> {
        self.package_name.as_deref()
    }

    /// Total number of registered files across all fake directories.
    pub fn file_count(&self) -> usize {
        self.dirs.iter().map(|d| d.files.len()).sum()
    }

    /// Register a new fake directory and return its index.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Allocation`] if the directory list cannot grow.
    pub fn add_fake_dir(&mut self, name: impl Into<String>) -> Result<usize, ManifestError> {
        self.dirs
            .try_reserve(1)
            .map_err(|_| ManifestError::Allocation("fake directory list"))?;
        self.dirs.push(FakeDir {
            name: name.into(),
            files: Vec::new(),
        });
        Ok(self.dirs.len() - 1)
    }

    /// Register `path` as a member of the fake directory at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::InvalidIndex`] if no such fake directory
    /// exists, or [`ManifestError::Allocation`] if its file list cannot grow.
    pub fn add_file(&mut self, index: usize, path: impl Into<String>) -> Result<(), ManifestError> {
        let count = self.dirs.len();
        let dir = self
            .dirs
            .get_mut(index)
            .ok_or(ManifestError::InvalidIndex { index, count })?;
        dir.files
            .try_reserve(1)
            .map_err(|_| ManifestError::Allocation("fake directory file list"))?;
        dir.files.push(path.into());
        Ok(())
    }

    /// Record a pre-extract plugin and return its index.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Allocation`] if the plugin list cannot grow.
    pub fn add_plugin(
        &mut self,
        path: impl Into<String>,
        compress_param: impl Into<String>,
    ) -> Result<usize, ManifestError> {
        self.plugins
            .try_reserve(1)
            .map_err(|_| ManifestError::Allocation("plugin list"))?;
        self.plugins.push(Plugin {
            path: path.into(),
            compress_param: compress_param.into(),
        });
        Ok(self.plugins.len() - 1)
    }

    /// Record the package archive file name, replacing any previous value.
    pub fn set_package_name(&mut self, name: impl Into<String>) {
        self.package_name = Some(name.into());
    }
}

/// Canonicalize separators to the wire form (`\`).
pub fn normalize_separators(path: &str) -> String {
    path.replace('/', &WIRE_SEPARATOR.to_string())
}

/// Turn a manifest path (either separator) into a native relative path.
///
/// Returns `None` for paths that are empty, absolute, carry a drive/root
/// prefix, or climb out of their base with `..`; manifest paths are always
/// relative to a staging or working directory. A `:` elsewhere in a name is
/// kept.
pub fn native_relative_path(path: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for (index, part) in path.split(['/', '\\']).enumerate() {
        if index == 0 && is_drive_prefix(part) {
            return None;
        }
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            return None;
        }
        match Path::new(part).components().next() {
            Some(Component::Normal(_)) => out.push(part),
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() || path.starts_with(['/', '\\']) {
        return None;
    }
    Some(out)
}

/// `C:`, `c:foo`, and the like.
fn is_drive_prefix(part: &str) -> bool {
    let bytes = part.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_fake_dir_returns_sequential_indices() {
        let mut m = Manifest::new();
        assert_eq!(m.add_fake_dir("$INSTDIR").unwrap(), 0);
        assert_eq!(m.add_fake_dir("$INSTDIR").unwrap(), 1);
        assert_eq!(m.dirs().len(), 2);
    }

    #[test]
    fn add_file_to_missing_dir_leaves_state_unchanged() {
        let mut m = Manifest::new();
        m.add_fake_dir("a").unwrap();
        m.add_file(0, "x.txt").unwrap();
        let before = m.clone();

        let err = m.add_file(3, "y.txt").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidIndex { index: 3, count: 1 }));
        assert_eq!(m, before);
    }

    #[test]
    fn file_count_spans_dirs() {
        let mut m = Manifest::new();
        m.add_fake_dir("a").unwrap();
        m.add_fake_dir("b").unwrap();
        m.add_file(0, "1").unwrap();
        m.add_file(1, "2").unwrap();
        m.add_file(1, "3").unwrap();
        assert_eq!(m.file_count(), 3);
    }

    #[test]
    fn set_package_name_replaces() {
        let mut m = Manifest::new();
        m.set_package_name("install_1.7z");
        m.set_package_name("install_2.7z");
        assert_eq!(m.package_name(), Some("install_2.7z"));
    }

    #[test]
    fn normalize_uses_backslash() {
        assert_eq!(normalize_separators("a/b\\c/d"), "a\\b\\c\\d");
    }

    #[test]
    fn native_path_accepts_both_separators() {
        let p = native_relative_path("ff3\\content.pkg").unwrap();
        assert_eq!(p, Path::new("ff3").join("content.pkg"));
        let p = native_relative_path("fake12txt/fake1_2o.txt").unwrap();
        assert_eq!(p, Path::new("fake12txt").join("fake1_2o.txt"));
    }

    #[test]
    fn native_path_rejects_escapes() {
        assert!(native_relative_path("..\\evil").is_none());
        assert!(native_relative_path("a/../../b").is_none());
        assert!(native_relative_path("/etc/passwd").is_none());
        assert!(native_relative_path("C:\\Windows").is_none());
        assert!(native_relative_path("").is_none());
        assert!(native_relative_path("d:relative").is_none());
    }

    #[test]
    fn native_path_keeps_colons_after_the_first_component() {
        let p = native_relative_path("logs\\12:00.log").unwrap();
        assert_eq!(p, Path::new("logs").join("12:00.log"));
        let p = native_relative_path("12:00.log").unwrap();
        assert_eq!(p, Path::new("12:00.log"));
    }
}
