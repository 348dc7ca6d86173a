//! Domain-specific errors for packing and installing.

use distpack_schema::ManifestError;
use thiserror::Error;

/// Broad failure class, used by drivers to decide how to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Open/read/write/copy failures.
    Io,
    /// Bad magic, bad version, out-of-bounds field, digest mismatch.
    Format,
    /// A collection could not grow.
    Allocation,
    /// The archiver reported failure or did not finish in time.
    ExternalTool,
    /// An operation was called in the wrong state or with a bad index.
    Logic,
    /// Configuration could not be read or parsed.
    Config,
}

/// Errors surfaced by [`Packer`](crate::packer::Packer) and
/// [`Installer`](crate::installer::Installer).
#[derive(Error, Debug)]
pub enum DistError {
    /// A filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being done, including the path involved.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest could not be built, encoded, or decoded.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// The archiver exited unsuccessfully or timed out.
    #[error("Archiver failed: {0}")]
    Archiver(String),

    /// An operation was called out of order or with invalid arguments.
    #[error("Invalid operation: {0}")]
    Logic(String),

    /// A configuration file was unreadable or invalid.
    #[error("Config error: {0}")]
    Config(String),
}

impl DistError {
    /// Wrap an I/O error with a description of what was being attempted.
    pub fn io(context: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            context: context.to_string(),
            source,
        }
    }

    /// Create a [`DistError::Logic`] from any displayable message.
    pub fn logic(message: impl std::fmt::Display) -> Self {
        Self::Logic(message.to_string())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Manifest(e) if e.is_format() => ErrorKind::Format,
            Self::Manifest(ManifestError::Io { .. }) => ErrorKind::Io,
            Self::Manifest(ManifestError::Allocation(_)) => ErrorKind::Allocation,
            Self::Manifest(ManifestError::InvalidIndex { .. }) => ErrorKind::Logic,
            // Values the wire format cannot express.
            Self::Manifest(_) => ErrorKind::Format,
            Self::Archiver(_) => ErrorKind::ExternalTool,
            Self::Logic(_) => ErrorKind::Logic,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<toml::de::Error> for DistError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Attach context to `std::io::Result` values.
pub trait IoResultExt<T> {
    /// Map the error into [`DistError::Io`] with a lazily built context.
    fn io_context<C: std::fmt::Display>(self, context: impl FnOnce() -> C) -> Result<T, DistError>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn io_context<C: std::fmt::Display>(self, context: impl FnOnce() -> C) -> Result<T, DistError> {
        self.map_err(|source| DistError::io(context(), source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_errors_map_to_taxonomy() {
        let fmt: DistError = ManifestError::UnsupportedVersion(9).into();
        assert_eq!(fmt.kind(), ErrorKind::Format);

        let idx: DistError = ManifestError::InvalidIndex { index: 1, count: 0 }.into();
        assert_eq!(idx.kind(), ErrorKind::Logic);

        let alloc: DistError = ManifestError::Allocation("plugin list").into();
        assert_eq!(alloc.kind(), ErrorKind::Allocation);

        let big: DistError = ManifestError::TooLarge { field: "file list", len: 1 }.into();
        assert_eq!(big.kind(), ErrorKind::Format);
    }

    #[test]
    fn io_context_wraps_message() {
        let res: std::io::Result<()> = Err(std::io::Error::other("boom"));
        let err = res.io_context(|| "copying a -> b").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.to_string(), "copying a -> b: boom");
    }
}
