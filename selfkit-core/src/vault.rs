//! Vault codec: encrypted private-key blobs on durable storage.
//!
//! Pure serialization. The codec never performs cryptography and never
//! sees plaintext key material; it moves opaque `{ciphertext, nonce}`
//! envelopes between the sandbox and the blob store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SelfkitError};
use crate::sandbox::CipherEnvelope;
use crate::storage::AtomicBlobStore;
use crate::types::Did;

/// Filename of the encrypted private key inside an account's vault
/// directory.
pub const PRIVATE_KEY_FILENAME: &str = "private_key.enc";

/// Filename of the plaintext public-key export.
pub const PUBLIC_KEY_FILENAME: &str = "public_key.txt";

/// The durable, encrypted-at-rest record of one account's private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    /// Ciphertext with authentication tag, base64. Opaque to the codec.
    pub ciphertext: String,
    /// AEAD nonce, base64. Opaque to the codec.
    pub nonce: String,
}

impl From<CipherEnvelope> for VaultEntry {
    fn from(envelope: CipherEnvelope) -> Self {
        Self {
            ciphertext: envelope.ciphertext,
            nonce: envelope.nonce,
        }
    }
}

impl From<VaultEntry> for CipherEnvelope {
    fn from(entry: VaultEntry) -> Self {
        Self {
            ciphertext: entry.ciphertext,
            nonce: entry.nonce,
        }
    }
}

/// Serializes vault entries to and from per-account storage locations.
pub struct VaultCodec {
    store: Arc<dyn AtomicBlobStore>,
}

impl VaultCodec {
    /// Creates a codec over a blob store.
    #[must_use]
    pub fn new(store: Arc<dyn AtomicBlobStore>) -> Self {
        Self { store }
    }

    fn entry_path(did: &Did) -> String {
        format!("vault/{}/{PRIVATE_KEY_FILENAME}", did.store_key())
    }

    fn public_key_path(did: &Did) -> String {
        format!("vault/{}/{PUBLIC_KEY_FILENAME}", did.store_key())
    }

    /// Writes an account's vault entry.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::VaultWriteFailed`] if serialization or the
    /// store write fails.
    pub fn write_entry(&self, did: &Did, entry: &VaultEntry) -> Result<()> {
        let bytes = serde_json::to_vec(entry)
            .map_err(|e| SelfkitError::vault_write(format!("serialize entry: {e}")))?;
        self.store
            .write_atomic(&Self::entry_path(did), &bytes)
            .map_err(|e| SelfkitError::vault_write(format!("{did}: {e}")))
    }

    /// Reads an account's vault entry.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::VaultReadFailed`] if the entry is absent,
    /// unreadable, or malformed.
    pub fn read_entry(&self, did: &Did) -> Result<VaultEntry> {
        let bytes = self
            .store
            .read(&Self::entry_path(did))
            .map_err(|e| SelfkitError::vault_read(format!("{did}: {e}")))?
            .ok_or_else(|| SelfkitError::vault_read(format!("{did}: entry not found")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SelfkitError::vault_read(format!("{did}: malformed entry: {e}")))
    }

    /// Writes the plaintext public-key export alongside the entry.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::VaultWriteFailed`] if the write fails.
    pub fn export_public_key(&self, did: &Did, public_key: &str) -> Result<()> {
        self.store
            .write_atomic(&Self::public_key_path(did), public_key.as_bytes())
            .map_err(|e| SelfkitError::vault_write(format!("{did}: public key export: {e}")))
    }

    /// Removes an account's vault directory contents.
    ///
    /// Used for rollback when account creation fails half-way.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::VaultWriteFailed`] if deletion fails.
    pub fn delete_entry(&self, did: &Did) -> Result<()> {
        self.store
            .delete(&Self::entry_path(did))
            .and_then(|()| self.store.delete(&Self::public_key_path(did)))
            .map_err(|e| SelfkitError::vault_write(format!("{did}: delete: {e}")))
    }

    /// Whether a vault entry exists for the account.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::VaultReadFailed`] if the store cannot be
    /// read.
    pub fn has_entry(&self, did: &Did) -> Result<bool> {
        self.store
            .exists(&Self::entry_path(did))
            .map_err(|e| SelfkitError::vault_read(format!("{did}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStore;

    fn codec() -> VaultCodec {
        VaultCodec::new(Arc::new(MemoryBlobStore::new()))
    }

    fn entry() -> VaultEntry {
        VaultEntry {
            ciphertext: "Y2lwaGVydGV4dA==".into(),
            nonce: "bm9uY2U=".into(),
        }
    }

    #[test]
    fn entry_round_trip() {
        let codec = codec();
        let did = Did::derive("pk");
        codec.write_entry(&did, &entry()).unwrap();
        assert_eq!(codec.read_entry(&did).unwrap(), entry());
        assert!(codec.has_entry(&did).unwrap());
    }

    #[test]
    fn missing_entry_is_a_read_failure() {
        let codec = codec();
        let did = Did::derive("pk");
        assert!(matches!(
            codec.read_entry(&did),
            Err(SelfkitError::VaultReadFailed { .. })
        ));
    }

    #[test]
    fn delete_removes_entry_and_export() {
        let codec = codec();
        let did = Did::derive("pk");
        codec.write_entry(&did, &entry()).unwrap();
        codec.export_public_key(&did, "pk").unwrap();
        codec.delete_entry(&did).unwrap();
        assert!(!codec.has_entry(&did).unwrap());
    }

    #[test]
    fn entries_are_isolated_per_account() {
        let codec = codec();
        let a = Did::derive("pk-a");
        let b = Did::derive("pk-b");
        codec.write_entry(&a, &entry()).unwrap();
        assert!(!codec.has_entry(&b).unwrap());
    }
}
