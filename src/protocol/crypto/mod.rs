//! Cryptographic layer of the access point protocol
//!
//! Key exchange, SCRAM login, per-message box encryption and the
//! symmetric pubsub streams with their replay windows.

mod engine;
mod error;
pub mod primitives;
mod replay;
mod scram;
#[cfg(test)]
mod tests;

pub use self::engine::{CryptoEngine, KeyExchangeResult, SessionBlob};
pub use self::error::CryptoError;
pub use self::replay::{Admission, ReplayWindow, SKIPPED_CAPACITY};
pub use self::scram::{MECHANISM as SCRAM_MECHANISM, ScramClient, ScramPolicy, ScramState};

/// Length of various cryptographic values
pub mod lengths {
    /// Curve25519 public key length
    pub const PUBLIC_KEY: usize = 32;
    /// PBKDF2 output length
    pub const PASSWORD_KEY: usize = 32;
    /// One-time authenticator key length
    pub const AUTH_KEY: usize = 32;
    /// One-time authenticator tag length
    pub const AUTH_TAG: usize = 16;
    /// Random key for the generic hash in the authenticator
    pub const HASH_KEY: usize = 16;
    /// Local authenticator: public key, hash key, tag
    pub const AUTHENTICATOR: usize = PUBLIC_KEY + HASH_KEY + AUTH_TAG;
    /// Box and secretbox nonce length
    pub const NONCE: usize = 24;
    /// Box and secretbox MAC length
    pub const MAC: usize = 16;
    /// Secretbox key length
    pub const SECRETBOX_KEY: usize = 32;
    /// Session blob handed out with the new-session result
    pub const SESSION_BLOB: usize = 8;
    /// Largest payload accepted for encryption (10 MiB)
    pub const MAX_PAYLOAD: usize = 10 * 1024 * 1024;
}
