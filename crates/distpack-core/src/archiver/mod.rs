//! Archive backends.
//!
//! The packer and installer never touch an archive format directly; they
//! describe what they want in a [`CompressRequest`] or [`ExtractRequest`]
//! and hand it to an [`Archiver`]. Parameter strings are opaque to the
//! caller and interpreted by the backend.

mod sevenzip;
mod tarzst;

pub use sevenzip::SevenZip;
pub use tarzst::{TarZst, ZSTD_MAGIC};

use crate::error::DistError;
use std::path::{Path, PathBuf};

/// Input for [`Archiver::compress`].
#[derive(Debug, Clone, Copy)]
pub struct CompressRequest<'a> {
    /// Archive to create or append to.
    pub archive: &'a Path,
    /// Files, directories, or wildcard patterns to add. See [`contents_of`].
    pub sources: &'a [PathBuf],
    /// Backend parameters (format, level, ...).
    pub params: &'a str,
    /// Descend into subdirectories of directory sources.
    pub recurse: bool,
    /// Glob patterns to leave out.
    pub exclude: &'a [String],
}

/// Input for [`Archiver::extract`].
#[derive(Debug, Clone, Copy)]
pub struct ExtractRequest<'a> {
    /// Archive to read.
    pub archive: &'a Path,
    /// Directory receiving the contents. Created if missing.
    pub dest: &'a Path,
    /// Backend parameters (format hints).
    pub params: &'a str,
}

/// An archive tool the packer and installer can drive.
pub trait Archiver: std::fmt::Debug {
    /// Create an archive from the requested sources.
    ///
    /// # Errors
    ///
    /// Returns [`DistError::Archiver`] when the backend fails, or
    /// [`DistError::Io`] for local filesystem failures.
    fn compress(&self, request: &CompressRequest<'_>) -> Result<(), DistError>;

    /// Unpack an archive into a directory. Files already present at the
    /// destination are kept.
    ///
    /// # Errors
    ///
    /// Returns [`DistError::Archiver`] when the backend fails, or
    /// [`DistError::Io`] for local filesystem failures.
    fn extract(&self, request: &ExtractRequest<'_>) -> Result<(), DistError>;

    /// File extension (without dot) for package archives this backend writes.
    fn archive_extension(&self) -> &'static str;
}

impl<T: Archiver + ?Sized> Archiver for Box<T> {
    fn compress(&self, request: &CompressRequest<'_>) -> Result<(), DistError> {
        (**self).compress(request)
    }

    fn extract(&self, request: &ExtractRequest<'_>) -> Result<(), DistError> {
        (**self).extract(request)
    }

    fn archive_extension(&self) -> &'static str {
        (**self).archive_extension()
    }
}

impl<T: Archiver + ?Sized> Archiver for &T {
    fn compress(&self, request: &CompressRequest<'_>) -> Result<(), DistError> {
        (**self).compress(request)
    }

    fn extract(&self, request: &ExtractRequest<'_>) -> Result<(), DistError> {
        (**self).extract(request)
    }

    fn archive_extension(&self) -> &'static str {
        (**self).archive_extension()
    }
}

/// Path of the `*` wildcard inside `dir`, used to add a directory's contents
/// without the directory itself. Subdirectories are added whole, whatever the
/// request's recursion flag says.
pub fn contents_of(dir: &Path) -> PathBuf {
    dir.join("*")
}
