use super::{AUTH_TYPE_USER, MessageError, PROTOCOL_VERSION, RESULT_OK, ids};
use crate::protocol::codec::{CodecError, MessageReader, MessageWriter};
use crate::protocol::crypto::{SCRAM_MECHANISM, SessionBlob};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

#[derive(Serialize)]
struct RpcCall<'a> {
    method: &'a str,
    params: Vec<RpcParam<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
enum RpcParam<'a> {
    String(&'a str),
    Int(i64),
}

fn rpc_call(method: &str, params: Vec<RpcParam<'_>>) -> Result<Vec<u8>, MessageError> {
    let json = serde_json::to_string(&RpcCall { method, params })?;
    let mut writer = MessageWriter::new();
    writer.write_u8(ids::RPC_CALL);
    writer.write_string(&json)?;
    Ok(writer.to_bytes())
}

/// Unencrypted request opening a session with `session_id`
///
/// # Errors
///
/// Returns error if the session id exceeds the field limit
pub fn start_new_session(session_id: &str) -> Result<Vec<u8>, CodecError> {
    let mut writer = MessageWriter::new();
    writer
        .write_u8(ids::NEW_SESSION)
        .write_u32(PROTOCOL_VERSION)
        .write_u8(AUTH_TYPE_USER);
    writer.write_string(session_id)?;
    Ok(writer.to_bytes())
}

/// SASL login carrying the SCRAM client-first
///
/// # Errors
///
/// Returns error if the message exceeds the field limit
pub fn login_sasl(client_first: &str) -> Result<Vec<u8>, CodecError> {
    let mut writer = MessageWriter::new();
    writer.write_u8(ids::LOGIN_SASL);
    writer.write_string(SCRAM_MECHANISM)?;
    writer.write_string(client_first)?;
    Ok(writer.to_bytes())
}

/// SASL response carrying the SCRAM client-final
///
/// # Errors
///
/// Returns error if the message exceeds the field limit
pub fn sasl_response(client_final: &str) -> Result<Vec<u8>, CodecError> {
    let mut writer = MessageWriter::new();
    writer.write_u8(ids::SASL_RESPONSE);
    writer.write_string(client_final)?;
    Ok(writer.to_bytes())
}

/// `RemoteInterface.getAll` for the full device tree
///
/// # Errors
///
/// Returns error if serialization fails
pub fn request_master_data() -> Result<Vec<u8>, MessageError> {
    rpc_call(
        "RemoteInterface.getAll",
        vec![
            RpcParam::String("de"),
            RpcParam::Int(4),
            RpcParam::Int(0),
            RpcParam::Int(0),
        ],
    )
}

/// `RemoteInterface.setDatapoint` for `serial/channel/datapoint`
///
/// # Errors
///
/// Returns error if serialization fails
pub fn set_datapoint(
    serial: &str,
    channel: &str,
    datapoint: &str,
    value: &str,
) -> Result<Vec<u8>, MessageError> {
    let address = format!("{serial}/{channel}/{datapoint}");
    rpc_call(
        "RemoteInterface.setDatapoint",
        vec![RpcParam::String(&address), RpcParam::String(value)],
    )
}

/// Reply to the new-session request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionResult {
    /// Result code
    pub result: u32,
    /// Protocol version spoken by the access point
    pub version: u32,
    /// Session id for outgoing containers
    pub session_id: String,
    /// Nonce prefix for outgoing containers
    pub blob: SessionBlob,
}

impl NewSessionResult {
    /// Decode the fields following the message id
    ///
    /// # Errors
    ///
    /// Returns error on underrun
    pub fn decode(reader: &mut MessageReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            result: reader.read_u32()?,
            version: reader.read_u32()?,
            session_id: reader.read_string()?,
            blob: reader.read_array()?,
        })
    }

    /// Encode including the message id
    ///
    /// # Errors
    ///
    /// Returns error if the session id exceeds the field limit
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut writer = MessageWriter::new();
        writer
            .write_u8(ids::NEW_SESSION_RESULT)
            .write_u32(self.result)
            .write_u32(self.version);
        writer.write_string(&self.session_id)?;
        writer.write_blob(&self.blob)?;
        Ok(writer.to_bytes())
    }
}

/// Error frame from the access point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Error code
    pub code: u32,
    /// Human readable message
    pub message: String,
}

impl ErrorResponse {
    /// Decode the fields following the message id
    ///
    /// # Errors
    ///
    /// Returns error on underrun
    pub fn decode(reader: &mut MessageReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            code: reader.read_u32()?,
            message: reader.read_string()?,
        })
    }
}

#[derive(Deserialize)]
struct RpcResultBody {
    value: String,
}

/// Decoded RPC call result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCallResult {
    /// Inflated JSON text
    pub body: String,
}

impl RpcCallResult {
    /// Decode result code and compressed body
    ///
    /// # Errors
    ///
    /// Returns error on a non-OK code or a bad compressed body
    pub fn decode(reader: &mut MessageReader<'_>) -> Result<Self, MessageError> {
        let code = reader.read_u32()?;
        if code != RESULT_OK {
            return Err(MessageError::RpcFailed { code });
        }
        Ok(Self {
            body: decode_compressed(reader)?,
        })
    }

    /// True if the body is large enough to be the master document
    #[must_use]
    pub fn is_master_data(&self) -> bool {
        self.body.len() > super::MASTER_DATA_THRESHOLD
    }

    /// The XML string in the JSON `value` field
    ///
    /// # Errors
    ///
    /// Returns error if the body is not `{"value": "..."}`
    pub fn value(&self) -> Result<String, MessageError> {
        let body: RpcResultBody = serde_json::from_str(&self.body)?;
        Ok(body.value)
    }
}

/// Inflate `u32 BE length ‖ zlib` into a UTF-8 string
///
/// # Errors
///
/// Returns error if inflation fails, the size differs from the header or
/// the text is not UTF-8
pub fn decode_compressed(reader: &mut MessageReader<'_>) -> Result<String, MessageError> {
    let expected = reader.read_u32_be()? as usize;
    let compressed = reader.remaining();

    let mut inflated = Vec::with_capacity(expected.min(crate::protocol::codec::MAX_FIELD_LEN));
    ZlibDecoder::new(compressed)
        .take(expected as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| MessageError::Decompress(e.to_string()))?;

    if inflated.len() != expected {
        return Err(MessageError::LengthMismatch {
            expected,
            actual: inflated.len(),
        });
    }
    String::from_utf8(inflated).map_err(|_| MessageError::InvalidUtf8)
}

/// Inverse of [`decode_compressed`]
///
/// # Errors
///
/// Returns error if compression fails or the text exceeds 4 GiB
pub fn encode_compressed(text: &str) -> Result<Vec<u8>, MessageError> {
    let len = u32::try_from(text.len())
        .map_err(|_| MessageError::Decompress("payload exceeds 4 GiB".into()))?;
    let mut out = len.to_be_bytes().to_vec();
    let compress_error = |e: std::io::Error| MessageError::Decompress(e.to_string());

    let mut encoder = ZlibEncoder::new(&mut out, Compression::default());
    encoder.write_all(text.as_bytes()).map_err(compress_error)?;
    encoder.finish().map_err(compress_error)?;
    Ok(out)
}
