use crate::model::{LookupError, ModelError};
use crate::protocol::codec::CodecError;
use crate::protocol::crypto::CryptoError;
use crate::protocol::messages::MessageError;
use crate::protocol::xml::XmlError;
use std::io;
use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while talking to the access point
#[derive(Debug, Error)]
pub enum GatewayError {
    // ===== Configuration Errors =====
    /// Bad or missing credentials, unknown or disabled user, malformed settings
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem
        message: String,
    },

    /// Access point firmware is older than supported
    #[error("firmware {version} is older than the required {minimum}")]
    UnsupportedFirmware {
        /// Reported firmware version
        version: String,
        /// Minimum supported version
        minimum: String,
    },

    // ===== Handshake Errors =====
    /// Key exchange, session negotiation or framing of a handshake step failed
    #[error("handshake failed: {message}")]
    Handshake {
        /// Description of the failure
        message: String,
        /// The underlying source of the error
        #[source]
        source: Option<BoxedSource>,
    },

    /// SCRAM login was rejected or the server signature did not verify
    #[error("authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the failure
        message: String,
    },

    /// The access point sent an error response
    #[error("access point error {code}: {message}")]
    AccessPoint {
        /// Error code
        code: u32,
        /// Message from the access point
        message: String,
    },

    // ===== Transport Errors =====
    /// The underlying transport failed
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure
        message: String,
        /// The underlying source of the error
        #[source]
        source: Option<BoxedSource>,
    },

    /// The transport went offline
    #[error("access point disconnected")]
    Disconnected,

    /// The handshake did not complete in time
    #[error("connection timeout after {duration:?}")]
    ConnectionTimeout {
        /// The duration of the timeout
        duration: std::time::Duration,
    },

    // ===== Decode Errors =====
    /// A received message could not be decoded and was dropped
    #[error("decode error: {message}")]
    Decode {
        /// Description of the problem
        message: String,
        /// The underlying source of the error
        #[source]
        source: Option<BoxedSource>,
    },

    /// A pubsub message repeated an already consumed sequence number
    #[error("sequence {sequence} on stream '{stream}' rejected (expected {expected})")]
    ReplayRejected {
        /// Stream name
        stream: String,
        /// Offending sequence number
        sequence: u64,
        /// Next expected sequence number
        expected: u64,
    },

    /// Snapshot query found nothing
    #[error(transparent)]
    Lookup(#[from] LookupError),

    // ===== State Errors =====
    /// Operation not valid in current state
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the state is invalid
        message: String,
        /// The current state
        current_state: String,
    },

    // ===== I/O Errors =====
    /// Local I/O error, such as reading a configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // ===== Internal Errors =====
    /// Internal library error
    #[error("internal error: {message}")]
    Internal {
        /// Description of the error
        message: String,
    },
}

impl GatewayError {
    /// Configuration error with a message
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wrap an error raised by a handshake step
    pub fn handshake<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Handshake {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap a transport failure
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// True if the connection attempt cannot continue after this error
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Decode { .. }
                | Self::ReplayRejected { .. }
                | Self::Lookup(_)
                | Self::InvalidState { .. }
        )
    }

    /// Check if this error is recoverable by retrying
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::Transport { .. }
                | Self::Disconnected
                | Self::Io(_)
        )
    }

    /// Check if this error indicates connection loss
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::Transport { .. } | Self::ConnectionTimeout { .. }
        )
    }
}

impl From<CryptoError> for GatewayError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::ReplayRejected {
                stream,
                sequence,
                expected,
            } => Self::ReplayRejected {
                stream,
                sequence,
                expected,
            },
            other => Self::Decode {
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }
}

macro_rules! decode_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for GatewayError {
                fn from(err: $ty) -> Self {
                    Self::Decode {
                        message: err.to_string(),
                        source: Some(Box::new(err)),
                    }
                }
            }
        )*
    };
}

decode_from!(CodecError, MessageError, ModelError, XmlError, serde_json::Error);

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
