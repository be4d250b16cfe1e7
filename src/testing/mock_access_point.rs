//! Server half of the access point protocol for tests
//!
//! Answers the key exchange, new-session request, SCRAM login and RPC
//! calls the way the real device does, and publishes encrypted pubsub
//! items. All key material is generated per instance.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use crypto_box::aead::Aead;
use crypto_box::aead::generic_array::GenericArray;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use crypto_secretbox::XSalsa20Poly1305;
use crypto_secretbox::aead::KeyInit;
use rand::rngs::OsRng;
use serde::Deserialize;
use serde_json::json;
use zeroize::Zeroizing;

use super::fixtures;
use crate::protocol::codec::{MessageReader, MessageWriter};
use crate::protocol::crypto::{CryptoError, SessionBlob, lengths, primitives};
use crate::protocol::messages::{
    self, CONTROL_JID, KEY_EXCHANGE_VERSION, LOG_NAMESPACE, NewSessionResult, PROTOCOL_VERSION,
    RESULT_OK, UPDATE_NAMESPACE, ids,
};
use crate::protocol::xml::Element;

const RPC_NS: &str = "jabber:iq:rpc";
const SERVER_FLAGS: &str = "sysap-mock";
const SCRAM_ITERATIONS: u32 = 4096;

/// Errors raised by the mock while processing a client message
#[derive(Debug, thiserror::Error)]
pub enum MockError {
    /// Crypto failure on the server side
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// Client sent something the mock cannot parse
    #[error("unexpected client message: {0}")]
    Unexpected(String),
}

impl From<crate::protocol::codec::CodecError> for MockError {
    fn from(err: crate::protocol::codec::CodecError) -> Self {
        Self::Crypto(err.into())
    }
}

impl From<messages::MessageError> for MockError {
    fn from(err: messages::MessageError) -> Self {
        Self::Unexpected(err.to_string())
    }
}

struct ScramExchange {
    client_first_bare: String,
    server_first: String,
    combined_nonce: String,
}

#[derive(Deserialize)]
struct RpcCall {
    method: String,
    #[serde(default)]
    params: Vec<RpcParam>,
}

#[derive(Deserialize)]
struct RpcParam {
    value: serde_json::Value,
}

/// Simulated System Access Point
pub struct MockAccessPoint {
    user_name: String,
    jid_local: String,
    password: Zeroizing<String>,
    salt: Vec<u8>,
    iterations: u32,
    firmware: String,
    secret_key: SecretKey,
    shared_box: Option<SalsaBox>,
    session_id: String,
    blob: SessionBlob,
    scram: Option<ScramExchange>,
    pubsub_key: Zeroizing<[u8; lengths::SECRETBOX_KEY]>,
    sequences: HashMap<&'static str, u64>,
    master_xml: String,
    client_jid: Option<String>,
    writes: Vec<(String, String)>,
    pending_echo: Option<(String, String)>,
    reject_login: bool,
    next_id: u64,
}

impl MockAccessPoint {
    /// Access point with one enabled user and firmware 2.6.0
    #[must_use]
    pub fn new(user_name: &str, password: &str) -> Self {
        Self {
            user_name: user_name.to_string(),
            jid_local: "6a2f9e41-0b7c".to_string(),
            password: Zeroizing::new(password.to_string()),
            salt: primitives::random_bytes::<32>().to_vec(),
            iterations: SCRAM_ITERATIONS,
            firmware: "2.6.0".to_string(),
            secret_key: SecretKey::generate(&mut OsRng),
            shared_box: None,
            session_id: "mock-session".to_string(),
            blob: primitives::random_bytes::<{ lengths::SESSION_BLOB }>(),
            scram: None,
            pubsub_key: Zeroizing::new(primitives::random_bytes::<{ lengths::SECRETBOX_KEY }>()),
            sequences: HashMap::new(),
            master_xml: fixtures::master_xml(),
            client_jid: None,
            writes: Vec::new(),
            pending_echo: None,
            reject_login: false,
            next_id: 1,
        }
    }

    /// Report `version` as firmware
    #[must_use]
    pub fn with_firmware(mut self, version: &str) -> Self {
        self.firmware = version.to_string();
        self
    }

    /// Serve `xml` as master data
    #[must_use]
    pub fn with_master_xml(mut self, xml: String) -> Self {
        self.master_xml = xml;
        self
    }

    /// Sign the SCRAM final with a wrong key
    #[must_use]
    pub fn rejecting_login(mut self) -> Self {
        self.reject_login = true;
        self
    }

    /// Full jid of the configured user
    #[must_use]
    pub fn user_jid(&self) -> String {
        format!("{}@{}", self.jid_local, messages::DOMAIN)
    }

    /// Address a client binds to
    #[must_use]
    pub fn bound_jid(&self) -> String {
        format!("{}/{}", self.user_jid(), messages::RESOURCE)
    }

    /// `/settings.json` describing this access point
    #[must_use]
    pub fn settings_json(&self) -> String {
        json!({
            "flags": { "version": self.firmware },
            "users": [{
                "name": self.user_name,
                "jid": self.user_jid(),
                "enabled": true,
                "authmethods": {
                    "SCRAM-SHA-256": {
                        "iterations": self.iterations,
                        "salt": STANDARD.encode(&self.salt),
                    }
                }
            }]
        })
        .to_string()
    }

    /// `(address, value)` pairs received through `setDatapoint`
    #[must_use]
    pub fn writes(&self) -> &[(String, String)] {
        &self.writes
    }

    /// Record the address the client is bound to
    pub fn bind(&mut self, jid: impl Into<String>) {
        self.client_jid = Some(jid.into());
    }

    fn derive_secret(&self) -> Zeroizing<[u8; lengths::PASSWORD_KEY]> {
        primitives::derive_password_key(self.password.as_bytes(), &self.salt, self.iterations)
    }

    /// Answer every stanza the client sends
    ///
    /// # Errors
    ///
    /// Returns error if the client message is malformed or fails to verify
    pub fn handle_stanza(&mut self, stanza: &Element) -> Result<Vec<Element>, MockError> {
        match (stanza.name(), stanza.get_attr("type")) {
            ("iq", Some("set")) => {
                let method = stanza
                    .find_path(&["query", "methodCall", "methodName"])
                    .map(Element::text_content)
                    .ok_or_else(|| MockError::Unexpected("iq without methodName".into()))?;
                let params = rpc_params(stanza);
                let reply = match method.as_str() {
                    "RemoteInterface.cryptExchangeLocalKeys2" => {
                        let authenticator = params
                            .get(1)
                            .ok_or_else(|| MockError::Unexpected("missing authenticator".into()))?;
                        self.key_exchange_response(&decode_b64(authenticator)?)?
                    }
                    "RemoteInterface.cryptMessage" => {
                        let payload = params
                            .first()
                            .ok_or_else(|| MockError::Unexpected("missing payload".into()))?;
                        self.handle_message(&decode_b64(payload)?)?
                    }
                    other => return Err(MockError::Unexpected(other.to_string())),
                };
                let mut out = vec![self.iq_result(stanza.get_attr("id"), Some(&reply))];
                out.extend(self.follow_ups()?);
                Ok(out)
            }
            ("iq", Some("get")) => Ok(vec![self.iq_result(stanza.get_attr("id"), None)]),
            ("presence", Some("subscribe")) => Ok(vec![
                Element::new("presence")
                    .attr("type", "subscribed")
                    .attr("from", CONTROL_JID)
                    .attr("to", self.client_jid.clone().unwrap_or_default()),
            ]),
            _ => Ok(Vec::new()),
        }
    }

    /// Update published after a `setDatapoint` call
    fn follow_ups(&mut self) -> Result<Vec<Element>, MockError> {
        let Some((address, value)) = self.pending_echo.take() else {
            return Ok(Vec::new());
        };
        let mut parts = address.splitn(3, '/');
        let (Some(serial), Some(channel), Some(datapoint)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Ok(Vec::new());
        };
        let xml = fixtures::update_xml(serial, channel, datapoint, &value);
        Ok(vec![self.publish_update(&xml)?])
    }

    /// Server half of the key exchange for a 64-byte client authenticator
    ///
    /// # Errors
    ///
    /// Returns error if the authenticator is malformed or does not verify
    pub fn key_exchange_response(&mut self, authenticator: &[u8]) -> Result<Vec<u8>, MockError> {
        if authenticator.len() != lengths::AUTHENTICATOR {
            return Err(CryptoError::InvalidKeyLength {
                expected: lengths::AUTHENTICATOR,
                actual: authenticator.len(),
            }
            .into());
        }
        let mut reader = MessageReader::new(authenticator);
        let client_public = reader.read_array::<{ lengths::PUBLIC_KEY }>()?;
        let hash_key = reader.read_blob(lengths::HASH_KEY)?;
        let tag = reader.read_blob(lengths::AUTH_TAG)?;

        let secret = self.derive_secret();
        if !primitives::verify_authenticator_token(&secret[..], hash_key, tag, &client_public)? {
            return Err(CryptoError::VerificationFailed("client authenticator".into()).into());
        }
        self.shared_box = Some(SalsaBox::new(
            &PublicKey::from(client_public),
            &self.secret_key,
        ));

        let mut region = MessageWriter::new();
        region.write_string(&self.session_id)?;
        region.write_string(SERVER_FLAGS)?;
        region.write_blob(self.secret_key.public_key().as_bytes())?;
        let region = region.to_bytes();

        let hash_key = primitives::random_bytes::<{ lengths::HASH_KEY }>();
        let tag = primitives::authenticator_token(&secret[..], &hash_key, &region)?;

        let mut writer = MessageWriter::new();
        writer.write_u32(KEY_EXCHANGE_VERSION).write_u32(RESULT_OK);
        writer.write_blob(&hash_key)?;
        writer.write_blob(&tag)?;
        writer.write_blob(&region)?;
        Ok(writer.to_bytes())
    }

    fn handle_message(&mut self, data: &[u8]) -> Result<Vec<u8>, MockError> {
        let mut reader = MessageReader::new(data);
        match reader.read_u8()? {
            ids::NEW_SESSION => {
                let _version = reader.read_u32()?;
                let _auth_type = reader.read_u8()?;
                let session_id = reader.read_string()?;
                if session_id != self.session_id {
                    return Err(MockError::Unexpected(format!("session id {session_id}")));
                }
                Ok(NewSessionResult {
                    result: RESULT_OK,
                    version: PROTOCOL_VERSION,
                    session_id: self.session_id.clone(),
                    blob: self.blob,
                }
                .encode()?)
            }
            ids::CRYPTED_CONTAINER_TO_SERVER => {
                let (reply_nonce, inner) = self.open_container(&mut reader)?;
                let (reply, key_table) = self.handle_inner(&inner)?;
                self.seal_container(&reply_nonce, &reply, key_table)
            }
            other => Err(MockError::Unexpected(format!("message type {other}"))),
        }
    }

    /// Open a client container; returns the reply nonce and the inner message
    ///
    /// # Errors
    ///
    /// Returns error if the frame is malformed or does not open
    pub fn open_container(
        &self,
        reader: &mut MessageReader<'_>,
    ) -> Result<([u8; lengths::NONCE], Vec<u8>), MockError> {
        let _flags = reader.read_u8()?;
        let session_id = reader.read_string()?;
        if session_id != self.session_id {
            return Err(MockError::Unexpected(format!("session id {session_id}")));
        }
        let nonce = reader.read_array::<{ lengths::NONCE }>()?;
        let declared = reader.read_u32()? as usize;
        let ciphertext = reader.remaining();
        if ciphertext.len() != declared {
            return Err(MockError::Unexpected("container length mismatch".into()));
        }

        let shared = self
            .shared_box
            .as_ref()
            .ok_or(CryptoError::MissingKey("shared box"))?;
        let plaintext = shared
            .decrypt(GenericArray::from_slice(&nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed("client container".into()))?;

        let mut inner = MessageReader::new(&plaintext);
        let reply_nonce = inner.read_array::<{ lengths::NONCE }>()?;
        Ok((reply_nonce, inner.remaining().to_vec()))
    }

    /// Seal `inner` for the client under `reply_nonce`, optionally with the pubsub key table
    ///
    /// # Errors
    ///
    /// Returns error if no shared box exists
    pub fn seal_container(
        &self,
        reply_nonce: &[u8; lengths::NONCE],
        inner: &[u8],
        key_table: bool,
    ) -> Result<Vec<u8>, MockError> {
        let mut plaintext = MessageWriter::new();
        if key_table {
            plaintext.write_blob(&self.pubsub_key[..])?;
            plaintext.write_u16(2);
            plaintext.write_string(UPDATE_NAMESPACE)?;
            plaintext.write_u64(0);
            plaintext.write_string(LOG_NAMESPACE)?;
            plaintext.write_u64(0);
        }
        plaintext.write_blob(inner)?;

        let shared = self
            .shared_box
            .as_ref()
            .ok_or(CryptoError::MissingKey("shared box"))?;
        let ciphertext = shared
            .encrypt(GenericArray::from_slice(reply_nonce), plaintext.to_bytes().as_slice())
            .map_err(|_| CryptoError::EncryptionFailed("server container".into()))?;
        let declared = u32::try_from(ciphertext.len())
            .map_err(|_| CryptoError::PayloadTooLarge { len: ciphertext.len() })?;

        let mut writer = MessageWriter::new();
        writer
            .write_u8(ids::CRYPTED_CONTAINER_TO_CLIENT)
            .write_u8(if key_table {
                messages::FLAG_KEY_ROTATION
            } else {
                0
            })
            .write_u32(declared);
        writer.write_blob(&ciphertext)?;
        Ok(writer.to_bytes())
    }

    fn handle_inner(&mut self, inner: &[u8]) -> Result<(Vec<u8>, bool), MockError> {
        let mut reader = MessageReader::new(inner);
        match reader.read_u8()? {
            ids::LOGIN_SASL => {
                let mechanism = reader.read_string()?;
                if mechanism != crate::protocol::crypto::SCRAM_MECHANISM {
                    return Err(MockError::Unexpected(mechanism));
                }
                let client_first = reader.read_string()?;
                Ok((self.sasl_challenge(&client_first)?, false))
            }
            ids::SASL_RESPONSE => {
                let client_final = reader.read_string()?;
                Ok((self.sasl_success(&client_final)?, true))
            }
            ids::RPC_CALL => {
                let call: RpcCall = serde_json::from_str(&reader.read_string()?)
                    .map_err(|e| MockError::Unexpected(e.to_string()))?;
                Ok((self.rpc_call(&call)?, false))
            }
            other => Err(MockError::Unexpected(format!("inner message {other}"))),
        }
    }

    fn sasl_challenge(&mut self, client_first: &str) -> Result<Vec<u8>, MockError> {
        let bare = client_first
            .strip_prefix("n,,")
            .ok_or_else(|| MockError::Unexpected("missing GS2 header".into()))?;
        let client_nonce = scram_attribute(bare, 'r')
            .ok_or_else(|| MockError::Unexpected("missing client nonce".into()))?;
        let combined_nonce = format!(
            "{client_nonce}{}",
            STANDARD.encode(primitives::random_bytes::<18>())
        );
        let server_first = format!(
            "r={combined_nonce},s={},i={}",
            STANDARD.encode(&self.salt),
            self.iterations
        );

        self.scram = Some(ScramExchange {
            client_first_bare: bare.to_string(),
            server_first: server_first.clone(),
            combined_nonce,
        });

        let mut writer = MessageWriter::new();
        writer.write_u8(ids::SASL_CHALLENGE);
        writer.write_string(&server_first)?;
        Ok(writer.to_bytes())
    }

    fn sasl_success(&mut self, client_final: &str) -> Result<Vec<u8>, MockError> {
        let exchange = self
            .scram
            .take()
            .ok_or_else(|| MockError::Unexpected("SASL response before challenge".into()))?;
        if scram_attribute(client_final, 'r') != Some(exchange.combined_nonce.as_str()) {
            return Err(MockError::Unexpected("nonce mismatch".into()));
        }
        let proof = scram_attribute(client_final, 'p')
            .map(|p| STANDARD.decode(p))
            .transpose()
            .map_err(|e| MockError::Unexpected(e.to_string()))?
            .ok_or_else(|| MockError::Unexpected("missing proof".into()))?;

        let without_proof = format!("c=biws,r={}", exchange.combined_nonce);
        let auth_message = format!(
            "{},{},{without_proof}",
            exchange.client_first_bare, exchange.server_first
        );

        let salted = self.derive_secret();
        let client_key = primitives::hmac_sha256(&salted[..], b"Client Key")?;
        let stored_key = primitives::sha256(&client_key);
        let signature = primitives::hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let recovered: Vec<u8> = proof.iter().zip(signature.iter()).map(|(p, s)| p ^ s).collect();
        if proof.len() != signature.len() || primitives::sha256(&recovered) != stored_key {
            return Err(CryptoError::VerificationFailed("client proof".into()).into());
        }

        let server_key = if self.reject_login {
            primitives::hmac_sha256(b"wrong", b"Server Key")?
        } else {
            primitives::hmac_sha256(&salted[..], b"Server Key")?
        };
        let verifier = primitives::hmac_sha256(&server_key, auth_message.as_bytes())?;

        let mut writer = MessageWriter::new();
        writer.write_u8(ids::SASL_LOGIN_SUCCESS);
        writer.write_string(&format!("v={}", STANDARD.encode(verifier)))?;
        Ok(writer.to_bytes())
    }

    fn rpc_call(&mut self, call: &RpcCall) -> Result<Vec<u8>, MockError> {
        let value = match call.method.as_str() {
            "RemoteInterface.getAll" => self.master_xml.clone(),
            "RemoteInterface.setDatapoint" => {
                let text = |i: usize| {
                    call.params
                        .get(i)
                        .and_then(|p| p.value.as_str())
                        .map(ToString::to_string)
                        .ok_or_else(|| MockError::Unexpected("setDatapoint parameters".into()))
                };
                let write = (text(0)?, text(1)?);
                self.pending_echo = Some(write.clone());
                self.writes.push(write);
                "OK".to_string()
            }
            other => return Err(MockError::Unexpected(other.to_string())),
        };

        let body = json!({ "value": value }).to_string();
        let mut writer = MessageWriter::new();
        writer.write_u8(ids::RPC_CALL_RESULT).write_u32(RESULT_OK);
        writer.write_blob(&messages::encode_compressed(&body)?)?;
        Ok(writer.to_bytes())
    }

    /// Encrypt `plaintext` under the pubsub key with an explicit sequence number
    ///
    /// # Errors
    ///
    /// Returns error if encryption fails
    pub fn seal_pubsub(&self, sequence: u32, plaintext: &[u8]) -> Result<String, MockError> {
        let mut nonce = [0u8; lengths::NONCE];
        nonce[..16].copy_from_slice(&primitives::random_bytes::<16>());
        nonce[16..20].copy_from_slice(&sequence.to_le_bytes());

        let cipher = XSalsa20Poly1305::new(GenericArray::from_slice(&self.pubsub_key[..]));
        let sealed = cipher
            .encrypt(GenericArray::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed("pubsub item".into()))?;
        let mut out = nonce.to_vec();
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    /// Compress and seal `text` with the stream's next sequence number
    ///
    /// # Errors
    ///
    /// Returns error if compression fails
    pub fn seal_next(&mut self, stream: &'static str, text: &str) -> Result<String, MockError> {
        let sequence = self.sequences.entry(stream).or_insert(0);
        let current = u32::try_from(*sequence)
            .map_err(|_| MockError::Unexpected("sequence exhausted".into()))?;
        *sequence += 1;
        self.seal_pubsub(current, &messages::encode_compressed(text)?)
    }

    /// Headline message carrying an encrypted update document
    ///
    /// # Errors
    ///
    /// Returns error if compression fails
    pub fn publish_update(&mut self, xml: &str) -> Result<Element, MockError> {
        let data = self.seal_next("update", xml)?;
        Ok(headline("update", UPDATE_NAMESPACE, data))
    }

    /// Headline message carrying an encrypted log entry
    ///
    /// # Errors
    ///
    /// Returns error if compression fails
    pub fn publish_log(&mut self, text: &str) -> Result<Element, MockError> {
        let data = self.seal_next("log", text)?;
        Ok(headline("log", LOG_NAMESPACE, data))
    }

    fn iq_result(&mut self, id: Option<&str>, payload: Option<&[u8]>) -> Element {
        let id = id.map_or_else(
            || {
                self.next_id += 1;
                format!("ap{}", self.next_id)
            },
            ToString::to_string,
        );
        let iq = Element::new("iq")
            .attr("type", "result")
            .attr("from", CONTROL_JID)
            .attr("to", self.client_jid.clone().unwrap_or_default())
            .attr("id", id);
        let Some(payload) = payload else {
            return iq;
        };
        iq.child(
            Element::new("query").attr("xmlns", RPC_NS).child(
                Element::new("methodResponse").child(
                    Element::new("params").child(
                        Element::new("param").child(
                            Element::new("value")
                                .child(Element::new("base64").text(STANDARD.encode(payload))),
                        ),
                    ),
                ),
            ),
        )
    }
}

impl std::fmt::Debug for MockAccessPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAccessPoint")
            .field("user_name", &self.user_name)
            .field("firmware", &self.firmware)
            .field("session_id", &self.session_id)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

/// `<message type="headline">` with one item on `stream`
#[must_use]
pub fn headline(stream: &str, namespace: &str, data: String) -> Element {
    Element::new("message")
        .attr("type", "headline")
        .attr("from", "pubsub.busch-jaeger.de")
        .child(
            Element::new("event")
                .attr("xmlns", "http://jabber.org/protocol/pubsub#event")
                .child(
                    Element::new("items").attr("node", namespace).child(
                        Element::new("item").child(
                            Element::new(stream)
                                .attr("xmlns", namespace)
                                .child(Element::new("data").text(data)),
                        ),
                    ),
                ),
        )
}

fn rpc_params(stanza: &Element) -> Vec<String> {
    stanza
        .find_path(&["query", "methodCall", "params"])
        .map(|params| {
            params
                .children_named("param")
                .filter_map(|param| param.get_child("value"))
                .filter_map(|value| value.elements().next())
                .map(Element::text_content)
                .collect()
        })
        .unwrap_or_default()
}

fn decode_b64(text: &str) -> Result<Vec<u8>, MockError> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| MockError::Unexpected(e.to_string()))
}

fn scram_attribute(message: &str, key: char) -> Option<&str> {
    message.split(',').find_map(|field| {
        field
            .strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
    })
}
