use super::replay::ReplayWindow;
use super::scram::{ScramClient, ScramPolicy, ScramState};
use super::{CryptoError, lengths, primitives};
use crate::protocol::codec::{MessageReader, MessageWriter};
use crate::protocol::messages::{self, ids};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use crypto_box::aead::Aead;
use crypto_box::aead::generic_array::GenericArray;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use crypto_secretbox::XSalsa20Poly1305;
use crypto_secretbox::aead::KeyInit;
use rand::rngs::OsRng;
use std::collections::HashMap;
use zeroize::Zeroizing;

/// Session-scoped blob from the new-session result, prefixed to every nonce
pub type SessionBlob = [u8; lengths::SESSION_BLOB];

/// Outcome of a successful key exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExchangeResult {
    /// Session id to send in the start-new-session request
    pub session_id: String,
    /// Opaque flags string from the access point
    pub flags: String,
}

const ENCRYPTED_SUFFIX: &str = "_encrypted";

/// Holds all key material for one connection
///
/// Created per connection attempt and dropped (or [`reset`](Self::reset))
/// on disconnect. Every derived secret lives in a zeroizing buffer.
pub struct CryptoEngine {
    password: Zeroizing<String>,
    salt: Vec<u8>,
    iterations: u32,
    secret_key: Option<SecretKey>,
    public_key: Option<PublicKey>,
    shared_box: Option<SalsaBox>,
    session_id: Option<String>,
    session_blob: Option<SessionBlob>,
    message_counter: u64,
    in_flight: Vec<[u8; lengths::NONCE]>,
    pubsub_key: Option<Zeroizing<[u8; lengths::SECRETBOX_KEY]>>,
    windows: HashMap<String, ReplayWindow>,
    scram_policy: ScramPolicy,
    scram: ScramClient,
}

impl CryptoEngine {
    /// Create an engine for a password and its PBKDF2 parameters
    #[must_use]
    pub fn new(password: &str, salt: Vec<u8>, iterations: u32) -> Self {
        Self::with_scram_policy(password, salt, iterations, ScramPolicy::default())
    }

    /// Create an engine whose SCRAM client uses custom parameter bounds
    #[must_use]
    pub fn with_scram_policy(
        password: &str,
        salt: Vec<u8>,
        iterations: u32,
        scram_policy: ScramPolicy,
    ) -> Self {
        Self {
            password: Zeroizing::new(password.to_string()),
            salt,
            iterations,
            secret_key: None,
            public_key: None,
            shared_box: None,
            session_id: None,
            session_blob: None,
            message_counter: 1,
            in_flight: Vec::new(),
            pubsub_key: None,
            windows: HashMap::new(),
            scram_policy,
            scram: ScramClient::with_policy(scram_policy),
        }
    }

    /// Generate a fresh ephemeral key pair for this connection
    pub fn generate_keypair(&mut self) {
        let secret = SecretKey::generate(&mut OsRng);
        self.public_key = Some(secret.public_key());
        self.secret_key = Some(secret);
    }

    /// Our ephemeral public key, once generated
    #[must_use]
    pub fn public_key(&self) -> Option<&[u8; lengths::PUBLIC_KEY]> {
        self.public_key.as_ref().map(PublicKey::as_bytes)
    }

    fn derive_shared_secret(&self) -> Zeroizing<[u8; lengths::PASSWORD_KEY]> {
        primitives::derive_password_key(self.password.as_bytes(), &self.salt, self.iterations)
    }

    /// Build the 64-byte local authenticator: public key, hash key, tag
    ///
    /// # Errors
    ///
    /// Returns error if no key pair has been generated
    pub fn generate_local_key(&self) -> Result<[u8; lengths::AUTHENTICATOR], CryptoError> {
        let public = self
            .public_key
            .as_ref()
            .ok_or(CryptoError::MissingKey("ephemeral key pair"))?;

        let secret = self.derive_shared_secret();
        let hash_key = primitives::random_bytes::<{ lengths::HASH_KEY }>();
        let tag = primitives::authenticator_token(&secret[..], &hash_key, public.as_bytes())?;

        let mut out = [0u8; lengths::AUTHENTICATOR];
        out[..lengths::PUBLIC_KEY].copy_from_slice(public.as_bytes());
        out[lengths::PUBLIC_KEY..lengths::PUBLIC_KEY + lengths::HASH_KEY]
            .copy_from_slice(&hash_key);
        out[lengths::PUBLIC_KEY + lengths::HASH_KEY..].copy_from_slice(&tag);
        Ok(out)
    }

    /// Validate the key-exchange response and derive the shared box
    ///
    /// # Errors
    ///
    /// Returns error on a framing problem, an unsupported version or
    /// result code, or an authenticator mismatch
    pub fn complete_key_exchange(&mut self, data: &[u8]) -> Result<KeyExchangeResult, CryptoError> {
        let mut reader = MessageReader::new(data);

        let version = reader.read_u32()?;
        if version != messages::KEY_EXCHANGE_VERSION {
            return Err(CryptoError::KeyExchangeFailed(format!(
                "unexpected key exchange version {version}"
            )));
        }

        let code = reader.read_u32()?;
        if code != messages::RESULT_OK && code != messages::RESULT_ALREADY_EXISTS {
            return Err(CryptoError::KeyExchangeFailed(format!(
                "access point returned error code {code}"
            )));
        }

        let hash_key = reader.read_blob(lengths::HASH_KEY)?;
        let tag = reader.read_blob(lengths::AUTH_TAG)?;
        let region = reader.remaining();

        let secret = self.derive_shared_secret();
        if !primitives::verify_authenticator_token(&secret[..], hash_key, tag, region)? {
            return Err(CryptoError::VerificationFailed(
                "key exchange authenticator mismatch".into(),
            ));
        }
        drop(secret);

        let session_id = read_non_empty(&mut reader, "session id")?;
        let flags = read_non_empty(&mut reader, "flags")?;

        if code == messages::RESULT_ALREADY_EXISTS {
            return Err(CryptoError::KeyExchangeFailed(
                "access point reports an existing session; resuming is not supported".into(),
            ));
        }

        let remote = reader.read_array::<{ lengths::PUBLIC_KEY }>()?;
        let secret_key = self
            .secret_key
            .as_ref()
            .ok_or(CryptoError::MissingKey("ephemeral key pair"))?;
        self.shared_box = Some(SalsaBox::new(&PublicKey::from(remote), secret_key));

        Ok(KeyExchangeResult { session_id, flags })
    }

    /// Store the session id and blob from the new-session result
    pub fn install_session(&mut self, session_id: String, blob: SessionBlob) {
        self.session_id = Some(session_id);
        self.session_blob = Some(blob);
    }

    /// Per-message nonce: session blob, counter, zero word, 8 random bytes
    fn next_nonce(&mut self, blob: &SessionBlob) -> Result<[u8; lengths::NONCE], CryptoError> {
        let counter =
            u32::try_from(self.message_counter).map_err(|_| CryptoError::CounterExhausted)?;
        self.message_counter += 1;

        let mut writer = MessageWriter::new();
        writer.write_blob(blob)?;
        writer.write_u32(counter).write_u32(0);
        writer.write_blob(&primitives::random_bytes::<8>())?;

        let mut nonce = [0u8; lengths::NONCE];
        nonce.copy_from_slice(&writer.to_bytes());
        Ok(nonce)
    }

    /// Encrypt `payload` into a container frame addressed to the access point
    ///
    /// # Errors
    ///
    /// Returns error if the payload exceeds 10 MiB, the session is not
    /// established, or the message counter is exhausted
    pub fn encrypt_payload(&mut self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if payload.len() > lengths::MAX_PAYLOAD {
            return Err(CryptoError::PayloadTooLarge { len: payload.len() });
        }

        let session_id = self
            .session_id
            .clone()
            .ok_or(CryptoError::MissingKey("session id"))?;
        let blob = self
            .session_blob
            .ok_or(CryptoError::MissingKey("session blob"))?;
        if self.shared_box.is_none() {
            return Err(CryptoError::MissingKey("shared box"));
        }

        let nonce = self.next_nonce(&blob)?;
        let reply_nonce = primitives::random_bytes::<{ lengths::NONCE }>();

        let mut plaintext = Zeroizing::new(Vec::with_capacity(lengths::NONCE + payload.len()));
        plaintext.extend_from_slice(&reply_nonce);
        plaintext.extend_from_slice(payload);

        let shared = self
            .shared_box
            .as_ref()
            .ok_or(CryptoError::MissingKey("shared box"))?;
        let ciphertext = shared
            .encrypt(GenericArray::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| CryptoError::EncryptionFailed("box seal failed".into()))?;

        let declared = lengths::NONCE + lengths::MAC + payload.len();
        if ciphertext.len() != declared {
            return Err(CryptoError::EncryptionFailed(format!(
                "unexpected ciphertext length {}, expected {declared}",
                ciphertext.len()
            )));
        }
        let declared = u32::try_from(declared)
            .map_err(|_| CryptoError::PayloadTooLarge { len: payload.len() })?;

        let mut writer = MessageWriter::new();
        writer
            .write_u8(ids::CRYPTED_CONTAINER_TO_SERVER)
            .write_u8(messages::FLAG_KEY_ROTATION);
        writer.write_string(&session_id)?;
        writer.write_blob(&nonce)?;
        writer.write_u32(declared);
        writer.write_blob(&ciphertext)?;

        self.in_flight.push(reply_nonce);
        Ok(writer.to_bytes())
    }

    /// Open a container sent to us
    ///
    /// `reader` must be positioned just after the message-type byte. The
    /// returned bytes start with the inner message id. A key table carried
    /// in the container is installed before returning.
    ///
    /// # Errors
    ///
    /// Returns error if the declared length is inconsistent or no
    /// in-flight nonce opens the box
    pub fn decrypt_payload(&mut self, reader: &mut MessageReader<'_>) -> Result<Vec<u8>, CryptoError> {
        let flags = reader.read_u8()?;
        let declared = reader.read_u32()? as usize;
        let ciphertext = reader.remaining();

        if ciphertext.len() != declared {
            return Err(CryptoError::DecryptionFailed(format!(
                "declared length {declared}, have {} bytes",
                ciphertext.len()
            )));
        }
        if declared < lengths::MAC {
            return Err(CryptoError::DecryptionFailed(format!(
                "container of {declared} bytes is shorter than its MAC"
            )));
        }

        let shared = self
            .shared_box
            .as_ref()
            .ok_or(CryptoError::MissingKey("shared box"))?;
        let (index, plaintext) = self
            .in_flight
            .iter()
            .enumerate()
            .find_map(|(index, nonce)| {
                shared
                    .decrypt(GenericArray::from_slice(nonce), ciphertext)
                    .ok()
                    .map(|plaintext| (index, Zeroizing::new(plaintext)))
            })
            .ok_or_else(|| {
                CryptoError::DecryptionFailed("no pending nonce opens the container".into())
            })?;
        self.in_flight.swap_remove(index);

        let mut inner = MessageReader::new(&plaintext);
        if flags & messages::FLAG_KEY_ROTATION != 0 {
            self.install_key_table(&mut inner)?;
        }
        Ok(inner.remaining().to_vec())
    }

    fn install_key_table(&mut self, reader: &mut MessageReader<'_>) -> Result<(), CryptoError> {
        let key = Zeroizing::new(reader.read_array::<{ lengths::SECRETBOX_KEY }>()?);
        let count = reader.read_u16()?;

        for _ in 0..count {
            let topic = reader.read_string()?;
            let initial = reader.read_u64()?;
            let Some(stream) = stream_name(&topic) else {
                tracing::debug!("Ignoring pubsub topic without path: {}", topic);
                continue;
            };
            tracing::debug!("Stream '{}' starts at sequence {}", stream, initial);
            self.windows
                .insert(stream.to_string(), ReplayWindow::new(stream, initial));
        }

        self.pubsub_key = Some(key);
        tracing::info!("Installed pubsub key for {} stream(s)", count);
        Ok(())
    }

    /// Decrypt one base64 pubsub item on `stream`
    ///
    /// The replay window is only advanced once the secretbox opens.
    ///
    /// # Errors
    ///
    /// Returns error on bad base64, a replayed sequence number, a missing
    /// pubsub key, or a failed decryption
    pub fn decrypt_pubsub(&mut self, data: &str, stream: &str) -> Result<Vec<u8>, CryptoError> {
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        if bytes.len() < lengths::NONCE + lengths::MAC {
            return Err(CryptoError::DecryptionFailed(format!(
                "pubsub message of {} bytes is too short",
                bytes.len()
            )));
        }

        let (nonce, ciphertext) = bytes.split_at(lengths::NONCE);
        let sequence = MessageReader::new(&nonce[16..]).read_u64()?;

        let key = self
            .pubsub_key
            .as_ref()
            .ok_or(CryptoError::MissingKey("pubsub key"))?;
        // Unknown streams are only tracked once an item opens
        let admission = match self.windows.get(stream) {
            Some(window) => window.check(sequence)?,
            None => ReplayWindow::new(stream, 0).check(sequence)?,
        };

        let cipher = XSalsa20Poly1305::new(GenericArray::from_slice(&key[..]));
        let plaintext = cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed(format!("pubsub item on '{stream}'")))?;

        self.windows
            .entry(stream.to_string())
            .or_insert_with(|| ReplayWindow::new(stream, 0))
            .commit(sequence, admission);
        Ok(plaintext)
    }

    /// Replay window for `stream`, if one exists
    #[must_use]
    pub fn replay_window(&self, stream: &str) -> Option<&ReplayWindow> {
        self.windows.get(stream)
    }

    /// Start SCRAM and return the client-first message
    ///
    /// # Errors
    ///
    /// Returns error if a login is already in progress
    pub fn begin_login(&mut self, identity: &str) -> Result<String, CryptoError> {
        self.scram.create_client_first(identity)
    }

    /// Feed the server challenge and return the client-final message
    ///
    /// # Errors
    ///
    /// Returns error if the challenge is malformed
    pub fn answer_challenge(&mut self, server_first: &str) -> Result<String, CryptoError> {
        self.scram.set_server_first(server_first, &self.password)?;
        self.scram.create_client_final()
    }

    /// Verify the server signature from the login success message
    ///
    /// # Errors
    ///
    /// Returns error if the signature does not match
    pub fn verify_server_final(&mut self, server_final: &str) -> Result<(), CryptoError> {
        self.scram.set_server_final(server_final)
    }

    /// Progress of the SCRAM exchange
    #[must_use]
    pub fn scram_state(&self) -> ScramState {
        self.scram.state()
    }

    /// Number of sent containers still awaiting a reply
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// True once the shared box has been derived
    #[must_use]
    pub fn has_shared_key(&self) -> bool {
        self.shared_box.is_some()
    }

    /// Drop every piece of session key material
    pub fn reset(&mut self) {
        self.secret_key = None;
        self.public_key = None;
        self.shared_box = None;
        self.session_id = None;
        self.session_blob = None;
        self.message_counter = 1;
        self.in_flight.clear();
        self.pubsub_key = None;
        self.windows.clear();
        self.scram = ScramClient::with_policy(self.scram_policy);
    }

    #[cfg(test)]
    pub(crate) fn set_message_counter(&mut self, value: u64) {
        self.message_counter = value;
    }
}

impl std::fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoEngine")
            .field("iterations", &self.iterations)
            .field("has_keypair", &self.secret_key.is_some())
            .field("has_shared_key", &self.shared_box.is_some())
            .field("session_id", &self.session_id)
            .field("message_counter", &self.message_counter)
            .field("in_flight", &self.in_flight.len())
            .field("streams", &self.windows.keys().collect::<Vec<_>>())
            .field("scram", &self.scram.state())
            .finish_non_exhaustive()
    }
}

fn read_non_empty(reader: &mut MessageReader<'_>, what: &str) -> Result<String, CryptoError> {
    let value = reader.read_string()?;
    if value.is_empty() {
        return Err(CryptoError::KeyExchangeFailed(format!("empty {what}")));
    }
    Ok(value)
}

/// `…/abb/update_encrypted` → `update`; `None` for topics without a path
pub(crate) fn stream_name(topic: &str) -> Option<&str> {
    let (_, last) = topic.rsplit_once('/')?;
    Some(last.strip_suffix(ENCRYPTED_SUFFIX).unwrap_or(last))
}
