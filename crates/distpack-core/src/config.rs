//! TOML configuration for packing and installing.
//!
//! Both configs are optional: a missing file yields defaults. Files larger
//! than [`MAX_CONFIG_SIZE`] are rejected before parsing.

use crate::error::{DistError, IoResultExt};
use distpack_schema::{DEFAULT_MANIFEST_NAME, DigestAlgorithm, normalize_separators};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Bulk compression parameters used when none are configured.
pub const DEFAULT_COMPRESS_PARAM: &str = "-t7z -m0=lzma:fb=273 -mx=9 -md=256M -ms=4G -mmt=2";

/// Largest accepted configuration file.
pub const MAX_CONFIG_SIZE: u64 = 64 * 1024;

/// Default prefix of generated package file names.
pub const DEFAULT_PACKAGE_PREFIX: &str = "install_";

/// Default time to wait for an exploded plugin file to disappear.
pub const DEFAULT_DELETE_TIMEOUT_MS: u64 = 5000;

/// A staged file that is unpacked before bulk compression and rebuilt at
/// install time with its own parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreExtractPlugin {
    /// Path relative to the staging root.
    pub path: String,
    /// Archiver parameters for unpacking and rebuilding this file.
    pub compress_param: String,
}

/// Build-side configuration.
///
/// ```toml
/// compress_param = "-t7z -mx=9"
///
/// [[pre_extract_plugins]]
/// path = "ff3/content.pkg"
/// compress_param = "-tzip -mx=0"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    /// Parameters for the bulk package archive.
    pub compress_param: String,
    /// Files to explode before bulk compression.
    pub pre_extract_plugins: Vec<PreExtractPlugin>,
    /// File name of the manifest written next to the package.
    pub manifest_name: String,
    /// Prefix of the generated package file name.
    pub package_prefix: String,
    /// Manifest trailer algorithm.
    pub digest: DigestAlgorithm,
    /// Where staging directories are created. Defaults to [`crate::tmp_path`].
    pub staging_root: Option<PathBuf>,
    /// Milliseconds to wait for an exploded plugin file to be deleted.
    pub delete_timeout_ms: u64,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            compress_param: DEFAULT_COMPRESS_PARAM.to_string(),
            pre_extract_plugins: Vec::new(),
            manifest_name: DEFAULT_MANIFEST_NAME.to_string(),
            package_prefix: DEFAULT_PACKAGE_PREFIX.to_string(),
            digest: DigestAlgorithm::default(),
            staging_root: None,
            delete_timeout_ms: DEFAULT_DELETE_TIMEOUT_MS,
        }
    }
}

impl PackConfig {
    /// Parse configuration text.
    ///
    /// A blank `compress_param` falls back to [`DEFAULT_COMPRESS_PARAM`].
    /// Plugin entries with a blank path or blank parameters are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DistError::Config`] if the text is not valid TOML for this
    /// structure.
    pub fn parse(content: &str) -> Result<Self, DistError> {
        let mut config: Self = toml::from_str(content)?;

        config.compress_param = config.compress_param.trim().to_string();
        if config.compress_param.is_empty() {
            debug!("compress_param is blank, using default");
            config.compress_param = DEFAULT_COMPRESS_PARAM.to_string();
        }

        let mut plugins = Vec::with_capacity(config.pre_extract_plugins.len());
        for plugin in config.pre_extract_plugins {
            let path = plugin.path.trim();
            let param = plugin.compress_param.trim();
            if path.is_empty() || param.is_empty() {
                warn!(path, "Skipping pre-extract plugin with blank path or parameters");
                continue;
            }
            plugins.push(PreExtractPlugin {
                path: normalize_separators(path),
                compress_param: param.to_string(),
            });
        }
        config.pre_extract_plugins = plugins;

        if config.manifest_name.trim().is_empty() {
            config.manifest_name = DEFAULT_MANIFEST_NAME.to_string();
        }
        Ok(config)
    }

    /// Read and parse a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, exceeds
    /// [`MAX_CONFIG_SIZE`], or does not parse.
    pub fn from_file(path: &Path) -> Result<Self, DistError> {
        Self::parse(&read_limited(path)?)
    }

    /// Like [`PackConfig::from_file`], but a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be used.
    pub fn load_or_default(path: &Path) -> Result<Self, DistError> {
        if !path.exists() {
            debug!(path = %path.display(), "No pack config, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }
}

/// Install-side configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Manifest trailer algorithm. Must match the one used when packing.
    pub digest: DigestAlgorithm,
    /// Where the private work directory is created. Defaults to [`crate::tmp_path`].
    pub work_root: Option<PathBuf>,
    /// Fail instead of truncating when real and fake directory counts differ.
    pub strict_dir_count: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            digest: DigestAlgorithm::default(),
            work_root: None,
            strict_dir_count: false,
        }
    }
}

impl InstallConfig {
    /// Parse configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`DistError::Config`] on invalid TOML.
    pub fn parse(content: &str) -> Result<Self, DistError> {
        Ok(toml::from_str(content)?)
    }

    /// Read a configuration file, falling back to defaults when it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is unreadable, too large, or
    /// invalid.
    pub fn load_or_default(path: &Path) -> Result<Self, DistError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::parse(&read_limited(path)?)
    }
}

/// One entry of a [`PlanDir`]: a tree to diff in, or a single file to copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// File, directory, or wildcard pattern on the build machine.
    pub source: PathBuf,
    /// Staged name for a single file. Presence selects single-file mode.
    #[serde(default)]
    pub name: Option<String>,
    /// Descend into subdirectories when adding a tree.
    #[serde(default = "default_true")]
    pub recurse: bool,
    /// Glob patterns excluded when adding a tree.
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// A fake directory and the entries that populate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDir {
    /// Display name, recorded in the manifest.
    pub name: String,
    /// Entries applied in order.
    #[serde(default, rename = "entry")]
    pub entries: Vec<PlanEntry>,
}

/// A declarative build script for the `pack` command.
///
/// ```toml
/// [[dir]]
/// name = "$INSTDIR"
///
/// [[dir.entry]]
/// source = "payload/bin"
/// exclude = ["*.pdb"]
///
/// [[dir.entry]]
/// source = "payload/readme.txt"
/// name = "docs/readme.txt"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackPlan {
    /// Fake directories in index order.
    #[serde(default, rename = "dir")]
    pub dirs: Vec<PlanDir>,
}

impl PackPlan {
    /// Parse plan text.
    ///
    /// # Errors
    ///
    /// Returns [`DistError::Config`] on invalid TOML.
    pub fn parse(content: &str) -> Result<Self, DistError> {
        Ok(toml::from_str(content)?)
    }

    /// Read a plan and resolve relative sources against its directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable, too large, or invalid.
    pub fn from_file(path: &Path) -> Result<Self, DistError> {
        let mut plan = Self::parse(&read_limited(path)?)?;
        if let Some(base) = path.parent() {
            plan.resolve_sources(base);
        }
        Ok(plan)
    }

    /// Make every relative `source` relative to `base` instead.
    pub fn resolve_sources(&mut self, base: &Path) {
        for entry in self.dirs.iter_mut().flat_map(|d| d.entries.iter_mut()) {
            if entry.source.is_relative() {
                entry.source = base.join(&entry.source);
            }
        }
    }
}

fn read_limited(path: &Path) -> Result<String, DistError> {
    let meta = std::fs::metadata(path).io_context(|| format!("reading {}", path.display()))?;
    if meta.len() > MAX_CONFIG_SIZE {
        return Err(DistError::Config(format!(
            "{} is {} bytes, limit is {MAX_CONFIG_SIZE}",
            path.display(),
            meta.len()
        )));
    }
    std::fs::read_to_string(path).io_context(|| format!("reading {}", path.display()))
}
