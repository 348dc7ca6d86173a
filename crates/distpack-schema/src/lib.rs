//! Shared manifest types and wire format for distpack.
//!
//! The manifest ("distinfo") describes how a single distributed package maps
//! back onto the filesystem at install time: which files belong to which fake
//! directory, which subtrees need to be recompressed with their own settings,
//! and the file name of the package archive itself.
//!
//! # Wire Format (Version 2)
//!
//! All integers are little-endian.
//!
//! ```text
//! +---------------------------+
//! | magic "XNSI"   (4 bytes)  |
//! | version = 2    (4 bytes)  |
//! +---------------------------+
//! | block: type    (1 byte)   |  repeated
//! |        length  (4 bytes)  |
//! |        payload (length)   |
//! +---------------------------+
//! | digest         (16 bytes) |  over every preceding byte
//! +---------------------------+
//! ```
//!
//! Strings are a `u32` count of UTF-16 code units followed by the units, with
//! no terminator. Unknown block types are skipped by length.

pub mod codec;
pub mod cursor;
pub mod digest;
pub mod error;
pub mod model;

// Re-exports
pub use codec::BlockType;
pub use digest::DigestAlgorithm;
pub use error::ManifestError;
pub use model::{FakeDir, Manifest, Plugin, native_relative_path, normalize_separators};

/// Magic bytes at the start of every manifest.
pub const MAGIC: [u8; 4] = *b"XNSI";

/// The only manifest version this crate reads and writes.
pub const FORMAT_VERSION: u32 = 2;

/// Size of the fixed header (magic + version).
pub const HEADER_LEN: usize = 8;

/// Size of the integrity trailer.
pub const DIGEST_LEN: usize = 16;

/// Size of a block header (type + payload length).
pub const BLOCK_HEADER_LEN: usize = 5;

/// Canonical path separator used on the wire.
pub const WIRE_SEPARATOR: char = '\\';

/// Default manifest file name written next to the package archive.
pub const DEFAULT_MANIFEST_NAME: &str = "install.distinfo";
