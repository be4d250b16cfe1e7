use super::{CodecError, MAX_FIELD_LEN};
use bytes::{BufMut, BytesMut};

#[derive(Debug, Clone)]
enum Entry {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    String(Vec<u8>),
    Blob(Vec<u8>),
}

impl Entry {
    fn encoded_len(&self) -> usize {
        match self {
            Self::U8(_) => 1,
            Self::U16(_) => 2,
            Self::U32(_) => 4,
            Self::U64(_) => 8,
            Self::String(bytes) => 4 + bytes.len(),
            Self::Blob(bytes) => bytes.len(),
        }
    }
}

/// Builder for outgoing binary messages
///
/// Entries are buffered in call order and laid out back to back by
/// [`to_bytes`](Self::to_bytes).
#[derive(Debug, Clone, Default)]
pub struct MessageWriter {
    entries: Vec<Entry>,
}

impl MessageWriter {
    /// Create an empty writer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one byte
    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.entries.push(Entry::U8(value));
        self
    }

    /// Append a little-endian `u16`
    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.entries.push(Entry::U16(value));
        self
    }

    /// Append a little-endian `u32`
    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.entries.push(Entry::U32(value));
        self
    }

    /// Append a little-endian `u64`
    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.entries.push(Entry::U64(value));
        self
    }

    /// Append a length-prefixed UTF-8 string
    ///
    /// # Errors
    ///
    /// Returns error if the string is larger than 10 MiB
    pub fn write_string(&mut self, value: &str) -> Result<&mut Self, CodecError> {
        check_len(value.len())?;
        self.entries.push(Entry::String(value.as_bytes().to_vec()));
        Ok(self)
    }

    /// Append raw bytes without a length prefix
    ///
    /// # Errors
    ///
    /// Returns error if the blob is larger than 10 MiB
    pub fn write_blob(&mut self, value: &[u8]) -> Result<&mut Self, CodecError> {
        check_len(value.len())?;
        self.entries.push(Entry::Blob(value.to_vec()));
        Ok(self)
    }

    /// Total encoded size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().map(Entry::encoded_len).sum()
    }

    /// True if nothing has been written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize all entries into one contiguous buffer
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.len());
        for entry in &self.entries {
            match entry {
                Entry::U8(v) => buf.put_u8(*v),
                Entry::U16(v) => buf.put_u16_le(*v),
                Entry::U32(v) => buf.put_u32_le(*v),
                Entry::U64(v) => buf.put_u64_le(*v),
                Entry::String(bytes) => {
                    #[allow(clippy::cast_possible_truncation)]
                    buf.put_u32_le(bytes.len() as u32);
                    buf.put_slice(bytes);
                }
                Entry::Blob(bytes) => buf.put_slice(bytes),
            }
        }
        buf.to_vec()
    }
}

fn check_len(len: usize) -> Result<(), CodecError> {
    if len > MAX_FIELD_LEN {
        return Err(CodecError::FieldTooLarge { len });
    }
    Ok(())
}
