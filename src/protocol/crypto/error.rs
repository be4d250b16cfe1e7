use crate::protocol::codec::CodecError;
use thiserror::Error;

/// Cryptographic operation errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("SCRAM error: {0}")]
    ScramError(String),

    #[error("key exchange failed: {0}")]
    KeyExchangeFailed(String),

    #[error("payload too large: {len} bytes")]
    PayloadTooLarge { len: usize },

    #[error("message counter exhausted")]
    CounterExhausted,

    #[error("sequence {sequence} on stream '{stream}' rejected (expected {expected})")]
    ReplayRejected {
        stream: String,
        sequence: u64,
        expected: u64,
    },

    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    #[error("missing key material: {0}")]
    MissingKey(&'static str),

    #[error("invalid base64: {0}")]
    InvalidEncoding(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
