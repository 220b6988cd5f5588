//! Identity engine: key pairs, DID derivation, account creation and login.

use std::sync::Arc;

use secrecy::SecretString;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::error::{Result, SelfkitError};
use crate::sandbox::{
    CipherEnvelope, DecryptPayload, EncryptPayload, KeyPairResponse, SandboxAction, SandboxBridge,
    SignPayload,
};
use crate::secure_store::{pin, AccessPolicy, EncryptionKey, SecureKeyStore};
use crate::types::{Account, AuthGate, Did};
use crate::vault::VaultCodec;

/// Prompt shown by the platform dialog when a biometric-gated record is
/// retrieved.
const UNLOCK_PROMPT: &str = "Unlock your account";

/// Orchestrates key generation, DID derivation, vault encryption and
/// encryption-key gating.
///
/// The engine never holds plaintext private key material: key pairs are
/// produced inside the sandbox, cross the bridge only long enough to be
/// encrypted, and are decrypted again only transiently for signing.
pub struct IdentityEngine {
    bridge: Arc<SandboxBridge>,
    vault: VaultCodec,
    secure: Arc<dyn SecureKeyStore>,
}

impl IdentityEngine {
    /// Creates an engine over a sandbox bridge, vault codec and secure
    /// store.
    #[must_use]
    pub fn new(bridge: Arc<SandboxBridge>, vault: VaultCodec, secure: Arc<dyn SecureKeyStore>) -> Self {
        Self {
            bridge,
            vault,
            secure,
        }
    }

    /// Requests a fresh asymmetric identity key pair from the sandbox.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::KeyGenerationFailed`] if the sandbox cannot
    /// produce a pair, or [`SelfkitError::SandboxTimeout`] if it does not
    /// answer.
    pub async fn generate_identity(&self) -> Result<KeyPairResponse> {
        let response = self
            .bridge
            .call(SandboxAction::GenerateKeyPair, serde_json::Value::Null)
            .await
            .map_err(|e| match e {
                SelfkitError::SandboxTimeout => SelfkitError::SandboxTimeout,
                other => SelfkitError::key_generation(other.to_string()),
            })?;
        serde_json::from_value(response)
            .map_err(|e| SelfkitError::key_generation(format!("malformed key pair: {e}")))
    }

    /// Derives the DID for a public-key export.
    ///
    /// Deterministic; see [`Did::derive`].
    #[must_use]
    pub fn derive_did(&self, public_key: &str) -> Did {
        Did::derive(public_key)
    }

    /// Creates a new account: key pair, DID, encrypted vault entry and
    /// gated encryption key record.
    ///
    /// Returns the public [`Account`] record together with the account's
    /// encryption key, which the caller may cache for the active session.
    ///
    /// Creation is all-or-nothing: if the key record cannot be stored after
    /// the vault entry was written, the vault entry is removed again.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::KeyGenerationFailed`],
    /// [`SelfkitError::VaultWriteFailed`], or a secure store error.
    pub async fn create_account(
        &self,
        display_name: &str,
        auth_gate: AuthGate,
        pin: Option<&SecretString>,
    ) -> Result<(Account, EncryptionKey)> {
        let pair = self.generate_identity().await?;
        let did = self.derive_did(&pair.public_key);
        debug!(%did, "derived identity for new account");

        let key = EncryptionKey::generate();
        let envelope = self.encrypt_with_key(&pair.private_key, &key).await?;
        let mut private_key = pair.private_key;
        private_key.zeroize();

        self.vault.write_entry(&did, &envelope.into())?;
        if let Err(e) = self.vault.export_public_key(&did, &pair.public_key) {
            let _ = self.vault.delete_entry(&did);
            return Err(e);
        }

        let account = Account {
            id: did.clone(),
            public_key: pair.public_key,
            display_name: display_name.to_string(),
            picture_url: None,
            auth_gate,
        };

        if let Err(e) = self.store_key_record(&account, &key, pin) {
            warn!(%did, "key record write failed, rolling back vault entry");
            let _ = self.vault.delete_entry(&did);
            return Err(e);
        }

        info!(%did, gate = %auth_gate, "account created");
        Ok((account, key))
    }

    /// Authenticates against an existing account by recovering its
    /// encryption key record.
    ///
    /// The private key itself is not decrypted here; decryption happens
    /// lazily when a signature or decrypt operation is requested.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::AuthenticationDenied`] on a wrong PIN or a
    /// denied platform prompt, [`SelfkitError::EncryptionKeyUnavailable`]
    /// when the record is absent or unusable.
    pub fn login(&self, account: &Account, pin: Option<&SecretString>) -> Result<EncryptionKey> {
        let key = self.retrieve_encryption_key(account, pin)?;
        info!(did = %account.id, "login succeeded");
        Ok(key)
    }

    /// Stores (or replaces) an account's encryption key record under its
    /// auth gate.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::EncryptionKeyUnavailable`] when a PIN gate
    /// is requested without a PIN, or a secure store error.
    pub fn store_key_record(
        &self,
        account: &Account,
        key: &EncryptionKey,
        pin: Option<&SecretString>,
    ) -> Result<()> {
        let store_key = account.id.store_key();
        match account.auth_gate {
            AuthGate::Pin => {
                let pin = pin.ok_or(SelfkitError::EncryptionKeyUnavailable)?;
                let wrapped = pin::wrap_key(key, pin)?;
                self.secure.put(&store_key, &wrapped, &AccessPolicy::open())
            }
            AuthGate::Biometric => self.secure.put(
                &store_key,
                &key.to_base64(),
                &AccessPolicy::authenticated(UNLOCK_PROMPT),
            ),
        }
    }

    /// Recovers an account's encryption key through its auth gate.
    ///
    /// # Errors
    ///
    /// See [`IdentityEngine::login`].
    pub fn retrieve_encryption_key(
        &self,
        account: &Account,
        pin: Option<&SecretString>,
    ) -> Result<EncryptionKey> {
        let store_key = account.id.store_key();
        match account.auth_gate {
            AuthGate::Pin => {
                let record = self
                    .secure
                    .get(&store_key, &AccessPolicy::open())
                    .map_err(map_missing_record)?;
                let pin = pin.ok_or(SelfkitError::EncryptionKeyUnavailable)?;
                pin::unwrap_key(&record, pin)
            }
            AuthGate::Biometric => {
                let record = self
                    .secure
                    .get(&store_key, &AccessPolicy::authenticated(UNLOCK_PROMPT))
                    .map_err(map_missing_record)?;
                EncryptionKey::from_base64(&record)
            }
        }
    }

    /// Removes an account's encryption key record.
    ///
    /// # Errors
    ///
    /// Returns a secure store error if deletion fails.
    pub fn delete_key_record(&self, did: &Did) -> Result<()> {
        self.secure.delete(&did.store_key())
    }

    /// Decrypts an account's private key for transient use.
    ///
    /// The caller must zeroize the returned string as soon as the
    /// operation needing it completes.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::VaultReadFailed`] if the entry cannot be
    /// read, or a sandbox error if decryption fails.
    pub async fn decrypt_private_key(&self, did: &Did, key: &EncryptionKey) -> Result<String> {
        let entry = self.vault.read_entry(did)?;
        self.decrypt_with_key(&entry.into(), key).await
    }

    /// Signs a challenge with a decrypted private key via the sandbox.
    ///
    /// # Errors
    ///
    /// Returns a sandbox error if signing fails or times out.
    pub async fn sign(&self, private_key: &str, challenge: &str) -> Result<String> {
        let payload = serde_json::to_value(SignPayload {
            private_key: private_key.to_string(),
            challenge: challenge.to_string(),
        })?;
        let response = self.bridge.call(SandboxAction::Sign, payload).await?;
        response
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| SelfkitError::sandbox("malformed signature response"))
    }

    /// Encrypts arbitrary data under an encryption key via the sandbox.
    ///
    /// # Errors
    ///
    /// Returns a sandbox error if encryption fails or times out.
    pub async fn encrypt_with_key(
        &self,
        data: &str,
        key: &EncryptionKey,
    ) -> Result<CipherEnvelope> {
        let payload = serde_json::to_value(EncryptPayload {
            data: data.to_string(),
            encryption_key: key.to_base64(),
        })?;
        let response = self.bridge.call(SandboxAction::EncryptData, payload).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Decrypts a cipher envelope under an encryption key via the sandbox.
    ///
    /// # Errors
    ///
    /// Returns a sandbox error if decryption fails or times out.
    pub async fn decrypt_with_key(
        &self,
        envelope: &CipherEnvelope,
        key: &EncryptionKey,
    ) -> Result<String> {
        let payload = serde_json::to_value(DecryptPayload {
            envelope: envelope.clone(),
            encryption_key: key.to_base64(),
        })?;
        let response = self.bridge.call(SandboxAction::DecryptData, payload).await?;
        response
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| SelfkitError::sandbox("malformed decrypt response"))
    }

    /// The vault codec backing this engine.
    #[must_use]
    pub fn vault(&self) -> &VaultCodec {
        &self.vault
    }
}

fn map_missing_record(err: SelfkitError) -> SelfkitError {
    match err {
        SelfkitError::SecretNotFound => SelfkitError::EncryptionKeyUnavailable,
        other => other,
    }
}
