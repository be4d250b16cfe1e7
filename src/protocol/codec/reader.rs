use super::CodecError;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Cursor over a received message
///
/// Every read checks the remaining length first, so a truncated frame
/// yields [`CodecError::InsufficientData`] instead of a panic.
#[derive(Debug, Clone)]
pub struct MessageReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> MessageReader<'a> {
    /// Create a reader positioned at the start of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let available = self.remaining_len();
        if len > available {
            return Err(CodecError::InsufficientData {
                needed: len,
                available,
                offset: self.offset,
            });
        }
        let data = self.data;
        let slice = &data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Read one byte
    ///
    /// # Errors
    ///
    /// Returns error if the buffer is exhausted
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian `u16`
    ///
    /// # Errors
    ///
    /// Returns error if fewer than 2 bytes remain
    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    /// Read a little-endian `u32`
    ///
    /// # Errors
    ///
    /// Returns error if fewer than 4 bytes remain
    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    /// Read a big-endian `u32` (used by the compressed payload header)
    ///
    /// # Errors
    ///
    /// Returns error if fewer than 4 bytes remain
    pub fn read_u32_be(&mut self) -> Result<u32, CodecError> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    /// Read a little-endian `u64` whose upper word must be zero
    ///
    /// # Errors
    ///
    /// Returns error if fewer than 8 bytes remain or the value does not fit in 32 bits
    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let bytes = self.take(8)?;
        let lower = LittleEndian::read_u32(&bytes[..4]);
        let upper = LittleEndian::read_u32(&bytes[4..]);
        if upper != 0 {
            return Err(CodecError::ValueOutOfRange { upper });
        }
        Ok(u64::from(lower))
    }

    /// Read a length-prefixed UTF-8 string
    ///
    /// # Errors
    ///
    /// Returns error on underrun or invalid UTF-8
    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u32()? as usize;
        let offset = self.offset;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { offset })
    }

    /// Read exactly `len` raw bytes
    ///
    /// # Errors
    ///
    /// Returns error if fewer than `len` bytes remain
    pub fn read_blob(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.take(len)
    }

    /// Fixed-size variant of [`read_blob`](Self::read_blob)
    ///
    /// # Errors
    ///
    /// Returns error if fewer than `N` bytes remain
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Current cursor position
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes after the cursor, without consuming them
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        let data = self.data;
        &data[self.offset.min(data.len())..]
    }

    /// Number of unread bytes
    #[must_use]
    pub fn remaining_len(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }
}
