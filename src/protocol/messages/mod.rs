//! Inner protocol messages and the stanzas that carry them
//!
//! Binary payloads are framed with the codec and wrapped in XML-RPC
//! stanzas addressed to the access point's control identity.

mod payload;
mod stanza;

pub use self::payload::{
    ErrorResponse, NewSessionResult, RpcCallResult, decode_compressed, encode_compressed,
    login_sasl, request_master_data, sasl_response, set_datapoint, start_new_session,
};
pub use self::stanza::{PubSubItem, StanzaBuilder, pubsub_items, rpc_result_payload};

use crate::protocol::codec::CodecError;
use thiserror::Error;

/// Inner message type identifiers
pub mod ids {
    /// Start a session (unencrypted)
    pub const NEW_SESSION: u8 = 1;
    /// Session id, version and blob
    pub const NEW_SESSION_RESULT: u8 = 2;
    /// SASL mechanism and client-first
    pub const LOGIN_SASL: u8 = 3;
    /// SCRAM server-first
    pub const SASL_CHALLENGE: u8 = 4;
    /// SCRAM client-final
    pub const SASL_RESPONSE: u8 = 5;
    /// SCRAM server-final
    pub const SASL_LOGIN_SUCCESS: u8 = 6;
    /// JSON RPC call
    pub const RPC_CALL: u8 = 7;
    /// Result code plus compressed JSON
    pub const RPC_CALL_RESULT: u8 = 8;
    /// Encrypted container, client to access point
    pub const CRYPTED_CONTAINER_TO_SERVER: u8 = 9;
    /// Encrypted container, access point to client
    pub const CRYPTED_CONTAINER_TO_CLIENT: u8 = 10;
    /// Error code and message
    pub const ERROR_RESPONSE: u8 = 255;
}

/// Supported key exchange version
pub const KEY_EXCHANGE_VERSION: u32 = 2;
/// Inner protocol version sent in the new-session request
pub const PROTOCOL_VERSION: u32 = 0x0001_0000;
/// Authentication type for user logins
pub const AUTH_TYPE_USER: u8 = 0;
/// Success result code
pub const RESULT_OK: u32 = 0;
/// Key exchange result for an already existing session
pub const RESULT_ALREADY_EXISTS: u32 = 25;
/// Container flag: key rotation requested (outbound) or key table present (inbound)
pub const FLAG_KEY_ROTATION: u8 = 0x02;

/// Control identity of the access point
pub const CONTROL_JID: &str = "mrha@busch-jaeger.de/rpc";
/// Transport domain
pub const DOMAIN: &str = "busch-jaeger.de";
/// Transport resource
pub const RESOURCE: &str = "freeathome-api";
/// WebSocket port of the transport
pub const TRANSPORT_PORT: u16 = 5280;
/// Namespace of encrypted device updates
pub const UPDATE_NAMESPACE: &str = "http://abb.com/protocol/update_encrypted";
/// Namespace of encrypted log entries
pub const LOG_NAMESPACE: &str = "http://abb.com/protocol/log_encrypted";

/// RPC results up to this many characters are not treated as master data
///
/// This is a size heuristic: the access point marks neither kind of result.
pub const MASTER_DATA_THRESHOLD: usize = 10_240;

/// Payload decoding errors
#[derive(Debug, Error)]
pub enum MessageError {
    /// Binary framing problem
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// zlib stream could not be inflated
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// Inflated size differs from the header
    #[error("uncompressed length {actual}, header says {expected}")]
    LengthMismatch {
        /// Length from the header
        expected: usize,
        /// Inflated length
        actual: usize,
    },

    /// Inflated text is not UTF-8
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// JSON body could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-OK result code
    #[error("RPC call failed with code {code}")]
    RpcFailed {
        /// Result code
        code: u32,
    },

    /// Stanza lacks an expected part
    #[error("malformed stanza: {0}")]
    MalformedStanza(String),

    /// Base64 content could not be decoded
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}
