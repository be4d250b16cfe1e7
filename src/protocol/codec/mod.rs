//! Binary framing for the inner access point messages
//!
//! All multi-byte integers are little-endian unless a method says otherwise.
//! Strings are a `u32` byte count followed by UTF-8 bytes; blobs are raw bytes
//! whose length is implied by the surrounding message layout.

mod reader;
mod writer;


pub use reader::MessageReader;
pub use writer::MessageWriter;

use thiserror::Error;

/// Largest string or blob accepted by the writer (10 MiB)
pub const MAX_FIELD_LEN: usize = 10 * 1024 * 1024;

/// Binary codec errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A read needed more bytes than the buffer has left
    #[error("insufficient data: need {needed} bytes at offset {offset}, have {available}")]
    InsufficientData {
        /// Bytes requested
        needed: usize,
        /// Bytes left in the buffer
        available: usize,
        /// Cursor position at the time of the read
        offset: usize,
    },

    /// A string or blob exceeded [`MAX_FIELD_LEN`]
    #[error("refusing to write {len} bytes, limit is {MAX_FIELD_LEN}")]
    FieldTooLarge {
        /// Offending length
        len: usize,
    },

    /// A 64-bit value had non-zero upper 32 bits
    #[error("64-bit value exceeds 32-bit range (upper word {upper:#x})")]
    ValueOutOfRange {
        /// The upper 32 bits that were found
        upper: u32,
    },

    /// String bytes were not valid UTF-8
    #[error("string at offset {offset} is not valid UTF-8")]
    InvalidUtf8 {
        /// Offset of the string payload
        offset: usize,
    },
}
