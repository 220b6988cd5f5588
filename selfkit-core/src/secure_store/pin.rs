//! PIN wrapping of encryption keys.
//!
//! For PIN-gated accounts the secure store record is not the raw
//! encryption key but the key sealed under a PIN-derived wrap key:
//! Argon2id turns the PIN and a random salt into 32 bytes, and
//! XChaCha20-Poly1305 seals the encryption key under them. Recovering the
//! key therefore requires both secure store access and the correct PIN,
//! and a wrong PIN fails the AEAD tag check rather than producing garbage.

use argon2::Argon2;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{Result, SelfkitError};
use crate::secure_store::EncryptionKey;

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 24;

/// Serialized form of a PIN-wrapped key record. All fields are base64.
#[derive(Serialize, Deserialize)]
struct WrappedKeyRecord {
    salt: String,
    nonce: String,
    ciphertext: String,
}

fn derive_wrap_key(pin: &SecretString, salt: &[u8]) -> Result<[u8; 32]> {
    let mut wrap_key = [0u8; 32];
    Argon2::default()
        .hash_password_into(pin.expose_secret().as_bytes(), salt, &mut wrap_key)
        .map_err(|e| {
            tracing::warn!(error = %e, "argon2 derivation failed");
            SelfkitError::EncryptionKeyUnavailable
        })?;
    Ok(wrap_key)
}

/// Wraps an encryption key under a PIN for secure store persistence.
///
/// # Errors
///
/// Returns [`SelfkitError::EncryptionKeyUnavailable`] if key derivation or
/// sealing fails.
pub fn wrap_key(key: &EncryptionKey, pin: &SecretString) -> Result<String> {
    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let mut wrap_key = derive_wrap_key(pin, &salt)?;
    let cipher = XChaCha20Poly1305::new_from_slice(&wrap_key).expect("key length is always 32");
    wrap_key.zeroize();

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), key.as_bytes().as_slice())
        .map_err(|_| SelfkitError::EncryptionKeyUnavailable)?;

    let b64 = base64::engine::general_purpose::STANDARD;
    let record = WrappedKeyRecord {
        salt: b64.encode(salt),
        nonce: b64.encode(nonce),
        ciphertext: b64.encode(ciphertext),
    };
    Ok(serde_json::to_string(&record)?)
}

/// Unwraps a PIN-wrapped key record.
///
/// # Errors
///
/// Returns [`SelfkitError::AuthenticationDenied`] when the PIN is wrong
/// (the AEAD tag check fails), and
/// [`SelfkitError::EncryptionKeyUnavailable`] when the record itself is
/// malformed.
pub fn unwrap_key(record: &str, pin: &SecretString) -> Result<EncryptionKey> {
    let record: WrappedKeyRecord =
        serde_json::from_str(record).map_err(|_| SelfkitError::EncryptionKeyUnavailable)?;

    let b64 = base64::engine::general_purpose::STANDARD;
    let salt = b64
        .decode(&record.salt)
        .map_err(|_| SelfkitError::EncryptionKeyUnavailable)?;
    let nonce = b64
        .decode(&record.nonce)
        .map_err(|_| SelfkitError::EncryptionKeyUnavailable)?;
    let ciphertext = b64
        .decode(&record.ciphertext)
        .map_err(|_| SelfkitError::EncryptionKeyUnavailable)?;
    if nonce.len() != NONCE_SIZE {
        return Err(SelfkitError::EncryptionKeyUnavailable);
    }

    let mut wrap_key = derive_wrap_key(pin, &salt)?;
    let cipher = XChaCha20Poly1305::new_from_slice(&wrap_key).expect("key length is always 32");
    wrap_key.zeroize();

    let mut plaintext = cipher
        .decrypt(XNonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| SelfkitError::AuthenticationDenied)?;

    let arr: [u8; 32] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| SelfkitError::EncryptionKeyUnavailable)?;
    plaintext.zeroize();
    Ok(EncryptionKey::from_bytes(arr))
}
