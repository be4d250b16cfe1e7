//! SCRAM-SHA-256 client (RFC 5802 / RFC 7677 message shapes)
//!
//! The access point runs the exchange inside encrypted containers. One
//! `ScramClient` handles exactly one attempt; a failed attempt leaves the
//! client in [`ScramState::Failed`].

use super::{CryptoError, primitives};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Mechanism name advertised in the login payload
pub const MECHANISM: &str = "SCRAM-SHA-256";

const NONCE_BYTES: usize = 32;
/// `n,,` GS2 header, stripped from the client-first for the auth message
const GS2_HEADER: &str = "n,,";
const CHANNEL_BINDING: &str = "c=biws";

/// Progress of one SCRAM attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScramState {
    /// Nothing sent yet
    Idle,
    /// Client-first produced
    ClientFirstSent,
    /// Server-first accepted, keys derived
    ServerFirstReceived,
    /// Client-final produced, awaiting the server signature
    ClientFinalSent,
    /// Server signature verified
    Verified,
    /// Exchange aborted
    Failed,
}

/// Bounds applied to the server-first parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScramPolicy {
    /// Minimum decoded salt length
    pub min_salt_len: usize,
    /// Lowest acceptable iteration count
    pub min_iterations: u32,
    /// Highest acceptable iteration count
    pub max_iterations: u32,
}

impl Default for ScramPolicy {
    fn default() -> Self {
        Self {
            min_salt_len: 32,
            min_iterations: 4096,
            max_iterations: 600_000,
        }
    }
}

/// Client side of a SCRAM-SHA-256 exchange
pub struct ScramClient {
    state: ScramState,
    policy: ScramPolicy,
    client_nonce: String,
    client_first: String,
    server_first: String,
    combined_nonce: String,
    auth_message: String,
    client_key: Option<Zeroizing<[u8; 32]>>,
    server_key: Option<Zeroizing<[u8; 32]>>,
}

impl ScramClient {
    /// Create a client with the default parameter bounds
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(ScramPolicy::default())
    }

    /// Create a client with custom parameter bounds
    #[must_use]
    pub fn with_policy(policy: ScramPolicy) -> Self {
        Self {
            state: ScramState::Idle,
            policy,
            client_nonce: String::new(),
            client_first: String::new(),
            server_first: String::new(),
            combined_nonce: String::new(),
            auth_message: String::new(),
            client_key: None,
            server_key: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ScramState {
        self.state
    }

    /// Build `n,,n=<identity>,r=<nonce>` with 32 random bytes as nonce
    ///
    /// # Errors
    ///
    /// Returns error if the client is not idle
    pub fn create_client_first(&mut self, identity: &str) -> Result<String, CryptoError> {
        let nonce = STANDARD.encode(primitives::random_bytes::<NONCE_BYTES>());
        self.create_client_first_with_nonce(identity, &nonce)
    }

    /// Same as [`create_client_first`](Self::create_client_first) with a caller-chosen nonce
    ///
    /// # Errors
    ///
    /// Returns error if the client is not idle
    pub fn create_client_first_with_nonce(
        &mut self,
        identity: &str,
        nonce: &str,
    ) -> Result<String, CryptoError> {
        self.expect_state(ScramState::Idle, "Idle")?;

        self.client_nonce = nonce.to_string();
        self.client_first = format!("{GS2_HEADER}n={identity},r={nonce}");
        self.state = ScramState::ClientFirstSent;
        Ok(self.client_first.clone())
    }

    /// Accept the server-first message and derive client and server keys
    ///
    /// # Errors
    ///
    /// Returns error on a missing or out-of-range parameter, or a nonce
    /// that does not extend ours
    pub fn set_server_first(&mut self, message: &str, password: &str) -> Result<(), CryptoError> {
        self.expect_state(ScramState::ClientFirstSent, "ClientFirstSent")?;

        let result = self.process_server_first(message, password);
        self.state = match result {
            Ok(()) => ScramState::ServerFirstReceived,
            Err(_) => ScramState::Failed,
        };
        result
    }

    fn process_server_first(&mut self, message: &str, password: &str) -> Result<(), CryptoError> {
        let nonce = attribute(message, 'r').unwrap_or_default();
        let salt = attribute(message, 's').unwrap_or_default();
        let iterations = attribute(message, 'i').unwrap_or_default();

        if nonce.is_empty() || salt.is_empty() || iterations.is_empty() {
            return Err(CryptoError::ScramError(
                "missing parameter in server-first".into(),
            ));
        }

        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(CryptoError::ScramError(
                "server nonce does not extend client nonce".into(),
            ));
        }

        let iterations: u32 = iterations
            .parse()
            .map_err(|_| CryptoError::ScramError(format!("invalid iteration count '{iterations}'")))?;
        if iterations < self.policy.min_iterations || iterations > self.policy.max_iterations {
            return Err(CryptoError::ScramError(format!(
                "iteration count {iterations} out of range"
            )));
        }

        let salt = STANDARD
            .decode(salt)
            .map_err(|e| CryptoError::ScramError(format!("invalid salt: {e}")))?;
        if salt.len() < self.policy.min_salt_len {
            return Err(CryptoError::ScramError(format!(
                "salt too short: {} bytes",
                salt.len()
            )));
        }

        let salted = primitives::derive_password_key(password.as_bytes(), &salt, iterations);
        let client_key = primitives::hmac_sha256(&salted[..], b"Client Key")?;
        let server_key = primitives::hmac_sha256(&salted[..], b"Server Key")?;

        self.server_first = message.to_string();
        self.combined_nonce = nonce.to_string();
        self.client_key = Some(Zeroizing::new(client_key));
        self.server_key = Some(Zeroizing::new(server_key));
        Ok(())
    }

    /// Build `c=biws,r=<nonce>,p=<proof>`
    ///
    /// # Errors
    ///
    /// Returns error if the server-first has not been accepted
    pub fn create_client_final(&mut self) -> Result<String, CryptoError> {
        self.expect_state(ScramState::ServerFirstReceived, "ServerFirstReceived")?;
        let client_key = self
            .client_key
            .as_ref()
            .ok_or(CryptoError::MissingKey("SCRAM client key"))?;

        let without_proof = format!("{CHANNEL_BINDING},r={}", self.combined_nonce);
        let bare_first = self
            .client_first
            .strip_prefix(GS2_HEADER)
            .unwrap_or(&self.client_first);
        self.auth_message = format!("{bare_first},{},{without_proof}", self.server_first);

        let stored_key = primitives::sha256(&client_key[..]);
        let mut proof = primitives::hmac_sha256(&stored_key, self.auth_message.as_bytes())?;
        for (p, k) in proof.iter_mut().zip(client_key.iter()) {
            *p ^= k;
        }

        self.state = ScramState::ClientFinalSent;
        Ok(format!("{without_proof},p={}", STANDARD.encode(proof)))
    }

    /// Verify the server signature in `v=`
    ///
    /// # Errors
    ///
    /// Returns error if the signature is missing or does not match
    pub fn set_server_final(&mut self, message: &str) -> Result<(), CryptoError> {
        self.expect_state(ScramState::ClientFinalSent, "ClientFinalSent")?;

        let result = self.verify_server_signature(message);
        self.state = match result {
            Ok(()) => ScramState::Verified,
            Err(_) => ScramState::Failed,
        };
        self.client_key = None;
        self.server_key = None;
        result
    }

    fn verify_server_signature(&self, message: &str) -> Result<(), CryptoError> {
        if let Some(error) = attribute(message, 'e') {
            return Err(CryptoError::ScramError(format!("server rejected login: {error}")));
        }

        let signature = attribute(message, 'v')
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CryptoError::ScramError("missing v parameter".into()))?;
        let signature = STANDARD
            .decode(signature)
            .map_err(|e| CryptoError::ScramError(format!("invalid server signature: {e}")))?;

        let server_key = self
            .server_key
            .as_ref()
            .ok_or(CryptoError::MissingKey("SCRAM server key"))?;
        let expected = primitives::hmac_sha256(&server_key[..], self.auth_message.as_bytes())?;

        if signature.len() != expected.len() || !bool::from(expected.ct_eq(&signature)) {
            return Err(CryptoError::VerificationFailed(
                "server SCRAM signature mismatch".into(),
            ));
        }
        Ok(())
    }

    fn expect_state(&self, expected: ScramState, name: &'static str) -> Result<(), CryptoError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CryptoError::InvalidState {
                expected: name,
                actual: format!("{:?}", self.state),
            })
        }
    }
}

impl Default for ScramClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramClient")
            .field("state", &self.state)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Value of `key=` in a comma-separated SCRAM message
fn attribute(message: &str, key: char) -> Option<&str> {
    message.split(',').find_map(|field| {
        let mut chars = field.chars();
        (chars.next() == Some(key) && chars.next() == Some('=')).then(|| &field[2..])
    })
}
