//! Bounds-checked reading and length-prefixed writing over byte buffers.
//!
//! Every read states how many bytes it needs and fails with
//! [`ManifestError::OutOfBounds`] instead of touching memory past the region
//! it was given. Sub-regions created with [`Cursor::take`] keep absolute
//! offsets so errors point at the right place in the file.

use crate::error::ManifestError;

/// A read position inside a byte region.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Absolute offset of `buf[0]` in the original buffer.
    base: usize,
}

impl<'a> Cursor<'a> {
    /// Start reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, base: 0 }
    }

    /// Absolute offset of the next read.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    /// Bytes left in this region.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True when the region is fully consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, field: &'static str, needed: usize) -> Result<(), ManifestError> {
        if needed > self.remaining() {
            return Err(ManifestError::OutOfBounds {
                field,
                offset: self.offset(),
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    /// Read `len` raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::OutOfBounds`] if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], ManifestError> {
        self.ensure(field, len)?;
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Read a single byte.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::OutOfBounds`] if the region is exhausted.
    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, ManifestError> {
        Ok(self.read_bytes(field, 1)?[0])
    }

    /// Read a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::OutOfBounds`] if fewer than 4 bytes remain.
    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, ManifestError> {
        let bytes = self.read_bytes(field, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a length-prefixed UTF-16LE string.
    ///
    /// The unit count is validated against the remaining bytes before any
    /// allocation happens, so a corrupted count cannot trigger a huge
    /// reservation.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::OutOfBounds`] if the count or the units do not
    /// fit, or [`ManifestError::InvalidString`] for unpaired surrogates.
    pub fn read_wide_string(&mut self, field: &'static str) -> Result<String, ManifestError> {
        let units = self.read_u32(field)? as usize;
        let byte_len = units.checked_mul(2).ok_or(ManifestError::OutOfBounds {
            field,
            offset: self.offset(),
            needed: usize::MAX,
            remaining: self.remaining(),
        })?;
        let offset = self.offset();
        let raw = self.read_bytes(field, byte_len)?;
        let wide: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&wide).map_err(|_| ManifestError::InvalidString { field, offset })
    }

    /// Split off the next `len` bytes as an independent region and advance
    /// past them.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::OutOfBounds`] if `len` exceeds the remaining
    /// bytes.
    pub fn take(&mut self, field: &'static str, len: usize) -> Result<Cursor<'a>, ManifestError> {
        let base = self.offset();
        let buf = self.read_bytes(field, len)?;
        Ok(Cursor { buf, pos: 0, base })
    }

    /// Upper bound on how many records of at least `min_record_len` bytes
    /// this region can still hold. Used to cap reservations driven by
    /// untrusted count fields.
    pub fn max_records(&self, min_record_len: usize) -> usize {
        self.remaining() / min_record_len.max(1)
    }
}

/// Append-only encoder for the manifest wire format.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer, returning the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Append raw bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append one byte.
    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Append a little-endian `u32`.
    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a collection length as `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::TooLarge`] if `len` does not fit in 32 bits.
    pub fn put_len(&mut self, field: &'static str, len: usize) -> Result<(), ManifestError> {
        let len = u32::try_from(len).map_err(|_| ManifestError::TooLarge { field, len })?;
        self.put_u32(len);
        Ok(())
    }

    /// Append a length-prefixed UTF-16LE string.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::TooLarge`] if the unit count does not fit in
    /// 32 bits.
    pub fn put_wide_string(&mut self, field: &'static str, value: &str) -> Result<(), ManifestError> {
        let units: Vec<u16> = value.encode_utf16().collect();
        self.put_len(field, units.len())?;
        for unit in units {
            self.buf.extend_from_slice(&unit.to_le_bytes());
        }
        Ok(())
    }

    /// Append a `{type, length, payload}` block.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::TooLarge`] if the payload exceeds `u32::MAX`.
    pub fn put_block(&mut self, block_type: u8, payload: &[u8]) -> Result<(), ManifestError> {
        self.put_u8(block_type);
        self.put_len("block payload", payload.len())?;
        self.put_bytes(payload);
        Ok(())
    }
}
