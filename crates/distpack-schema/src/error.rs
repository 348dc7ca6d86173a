//! Error type for manifest construction and (de)serialization.

use thiserror::Error;

/// Errors produced while building, encoding, or decoding a manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The manifest file could not be read or written.
    #[error("IO error on {path}: {source}")]
    Io {
        /// Path of the manifest file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The buffer is shorter than header plus trailer.
    #[error("manifest too short: {len} bytes (minimum {min})")]
    TooShort {
        /// Actual buffer length.
        len: usize,
        /// Minimum acceptable length.
        min: usize,
    },

    /// The trailing digest does not match the recomputed one.
    #[error("integrity check failed: expected {expected}, computed {actual}")]
    DigestMismatch {
        /// Digest stored in the trailer (hex).
        expected: String,
        /// Digest computed over the payload (hex).
        actual: String,
    },

    /// Magic bytes did not match `XNSI`.
    #[error("invalid magic: {0:02x?}")]
    BadMagic([u8; 4]),

    /// Version field is not the supported version.
    #[error("unsupported manifest version: {0}")]
    UnsupportedVersion(u32),

    /// A read would run past the end of the current buffer or block.
    #[error("{field} at offset {offset}: needs {needed} bytes, {remaining} remaining")]
    OutOfBounds {
        /// Name of the field being read.
        field: &'static str,
        /// Absolute offset of the read.
        offset: usize,
        /// Bytes the read needed.
        needed: usize,
        /// Bytes left in the current region.
        remaining: usize,
    },

    /// A string field is not valid UTF-16.
    #[error("invalid UTF-16 in {field} at offset {offset}")]
    InvalidString {
        /// Name of the field being read.
        field: &'static str,
        /// Absolute offset of the string payload.
        offset: usize,
    },

    /// A value does not fit the 32-bit length fields of the format.
    #[error("{field} too large for the wire format: {len}")]
    TooLarge {
        /// Name of the field being written.
        field: &'static str,
        /// Offending length.
        len: usize,
    },

    /// A known block carried bytes beyond its structured content.
    #[error("block type {block_type} at offset {offset} has {extra} trailing bytes")]
    TrailingBytes {
        /// Block type byte.
        block_type: u8,
        /// Absolute offset of the first unread byte.
        offset: usize,
        /// Number of unread bytes.
        extra: usize,
    },

    /// A known block type appeared more than once.
    #[error("duplicate block type {0}")]
    DuplicateBlock(u8),

    /// A fake directory index does not exist.
    #[error("fake directory index {index} out of range ({count} registered)")]
    InvalidIndex {
        /// Requested index.
        index: usize,
        /// Number of registered fake directories.
        count: usize,
    },

    /// Growing a collection failed.
    #[error("allocation failed while growing {0}")]
    Allocation(&'static str),
}

impl ManifestError {
    /// True for failures caused by the manifest bytes themselves rather than
    /// by I/O, sizes, or caller misuse.
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            Self::TooShort { .. }
                | Self::DigestMismatch { .. }
                | Self::BadMagic(_)
                | Self::UnsupportedVersion(_)
                | Self::OutOfBounds { .. }
                | Self::InvalidString { .. }
                | Self::TrailingBytes { .. }
                | Self::DuplicateBlock(_)
        )
    }
}
