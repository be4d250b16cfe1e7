use super::{CryptoError, lengths};
use blake2::Blake2bMac;
use blake2::digest::Mac;
use blake2::digest::consts::U32;
use hmac::Hmac;
use poly1305::Poly1305;
use poly1305::universal_hash::KeyInit;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;
type Blake2bMac256 = Blake2bMac<U32>;

/// PBKDF2-HMAC-SHA256 with a 32-byte output
///
/// The returned buffer is wiped when dropped.
pub fn derive_password_key(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Zeroizing<[u8; lengths::PASSWORD_KEY]> {
    let mut key = Zeroizing::new([0u8; lengths::PASSWORD_KEY]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut key[..]);
    key
}

/// HMAC-SHA256 of `data` under `key`
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| CryptoError::KeyDerivationFailed("HMAC key rejected".into()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Plain SHA-256
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Keyed BLAKE2b with a 32-byte digest (libsodium `crypto_generichash`)
pub fn keyed_generic_hash(
    message: &[u8],
    key: &[u8],
) -> Result<Zeroizing<[u8; lengths::AUTH_KEY]>, CryptoError> {
    let mut mac = <Blake2bMac256 as Mac>::new_from_slice(key).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: lengths::HASH_KEY,
            actual: key.len(),
        }
    })?;
    mac.update(message);
    let mut out = Zeroizing::new([0u8; lengths::AUTH_KEY]);
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Poly1305 one-time authenticator (libsodium `crypto_onetimeauth`)
pub fn one_time_auth(message: &[u8], key: &[u8; lengths::AUTH_KEY]) -> [u8; lengths::AUTH_TAG] {
    let mac = Poly1305::new(poly1305::Key::from_slice(key));
    let tag = mac.compute_unpadded(message);
    let mut out = [0u8; lengths::AUTH_TAG];
    out.copy_from_slice(&tag);
    out
}

/// Constant-time check of a Poly1305 tag
pub fn one_time_auth_verify(
    tag: &[u8],
    message: &[u8],
    key: &[u8; lengths::AUTH_KEY],
) -> bool {
    let expected = one_time_auth(message, key);
    tag.len() == expected.len() && bool::from(expected.ct_eq(tag))
}

/// Fill a fixed array from the OS RNG
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

/// Build the handshake authenticator token
///
/// `hash_key` keys a generic hash of the password-derived secret; the result
/// keys a one-time authenticator over `message`.
pub fn authenticator_token(
    secret: &[u8],
    hash_key: &[u8],
    message: &[u8],
) -> Result<[u8; lengths::AUTH_TAG], CryptoError> {
    let auth_key = keyed_generic_hash(secret, hash_key)?;
    Ok(one_time_auth(message, &auth_key))
}

/// Verify a token produced by [`authenticator_token`]
pub fn verify_authenticator_token(
    secret: &[u8],
    hash_key: &[u8],
    tag: &[u8],
    message: &[u8],
) -> Result<bool, CryptoError> {
    let auth_key = keyed_generic_hash(secret, hash_key)?;
    Ok(one_time_auth_verify(tag, message, &auth_key))
}
