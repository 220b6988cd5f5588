//! Challenge-response signing for first-party login and third-party
//! relying parties.

use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::error::Result;
use crate::session::AccountSessionManager;
use crate::types::Did;

/// Who is asking for the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Audience {
    /// The local application itself.
    FirstParty,
    /// A third-party relying party. Receives the signature and public key
    /// and nothing else.
    External,
}

/// A relying party's signing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelyingPartyRequest {
    /// The challenge to sign.
    pub challenge: String,
    /// Permissions the relying party is asking for. Recorded for the
    /// caller's consent UI; not interpreted here.
    pub permissions: Vec<String>,
    /// Caller classification.
    pub audience: Audience,
}

/// The only material that ever leaves the signer: a signature over the
/// challenge and the signing account's public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedChallenge {
    /// Base64 signature over the challenge bytes.
    pub signature: String,
    /// The account's public-key export, for verification.
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

/// Signs arbitrary challenges with an account's identity key.
///
/// The private key is decrypted in the sandbox only for the duration of
/// the signing call and discarded immediately afterwards; it is never
/// persisted in plaintext and never handed to the caller.
pub struct ChallengeSigner {
    session: Arc<AccountSessionManager>,
}

impl ChallengeSigner {
    /// Creates a signer over the session manager.
    #[must_use]
    pub fn new(session: Arc<AccountSessionManager>) -> Self {
        Self { session }
    }

    /// Signs `challenge` with the account's private key.
    ///
    /// The account must be the active session. If the session was restored
    /// without a cached encryption key, the gate is re-opened (platform
    /// prompt, or `pin` for PIN-gated accounts).
    ///
    /// # Errors
    ///
    /// Returns [`crate::SelfkitError::AccountNotCurrent`],
    /// [`crate::SelfkitError::EncryptionKeyUnavailable`],
    /// [`crate::SelfkitError::AuthenticationDenied`], or
    /// [`crate::SelfkitError::SandboxTimeout`].
    pub async fn sign_challenge(
        &self,
        account_id: &Did,
        challenge: &str,
        audience: Audience,
        pin: Option<&SecretString>,
    ) -> Result<SignedChallenge> {
        debug!(did = %account_id, ?audience, "signing challenge");
        let (account, key) = self.session.signing_context(account_id, pin).await?;

        let engine = self.session.engine();
        let mut private_key = engine.decrypt_private_key(&account.id, &key).await?;
        let result = engine.sign(&private_key, challenge).await;
        private_key.zeroize();
        let signature = result?;

        if audience == Audience::External {
            info!(did = %account_id, "issued signature to external relying party");
        }
        Ok(SignedChallenge {
            signature,
            public_key: account.public_key,
        })
    }

    /// Entry point for relying-party requests against the active session.
    ///
    /// # Errors
    ///
    /// See [`Self::sign_challenge`].
    pub async fn sign_request(
        &self,
        request: &RelyingPartyRequest,
        pin: Option<&SecretString>,
    ) -> Result<SignedChallenge> {
        let account = self
            .session
            .current_account()
            .await
            .ok_or(crate::SelfkitError::AccountNotCurrent)?;
        debug!(permissions = ?request.permissions, "relying party request");
        self.sign_challenge(&account.id, &request.challenge, request.audience, pin)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityEngine;
    use crate::sandbox::spawn_in_process_sandbox;
    use crate::secure_store::{MemorySecureStore, SecureKeyStore};
    use crate::storage::{AtomicBlobStore, MemoryBlobStore};
    use crate::types::AuthGate;
    use crate::vault::VaultCodec;
    use crate::SelfkitError;

    fn pin(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    async fn logged_in_signer() -> (ChallengeSigner, Did) {
        let store = Arc::new(MemoryBlobStore::new()) as Arc<dyn AtomicBlobStore>;
        let secure = Arc::new(MemorySecureStore::new()) as Arc<dyn SecureKeyStore>;
        let bridge = Arc::new(spawn_in_process_sandbox());
        let engine = IdentityEngine::new(bridge, VaultCodec::new(Arc::clone(&store)), secure);
        let session = Arc::new(AccountSessionManager::new(engine, store));
        session.init().await.unwrap();
        let account = session
            .create_account("Alice", AuthGate::Pin, Some(&pin("1234")))
            .await
            .unwrap();
        (ChallengeSigner::new(session), account.id)
    }

    #[tokio::test]
    async fn signs_for_the_current_account() {
        let (signer, did) = logged_in_signer().await;
        let signed = signer
            .sign_challenge(&did, "nonce-123", Audience::FirstParty, None)
            .await
            .unwrap();
        assert!(!signed.signature.is_empty());
        assert!(!signed.public_key.is_empty());
    }

    #[tokio::test]
    async fn external_response_contains_only_signature_and_public_key() {
        let (signer, did) = logged_in_signer().await;
        let signed = signer
            .sign_challenge(&did, "nonce-123", Audience::External, None)
            .await
            .unwrap();

        let json = serde_json::to_value(&signed).unwrap();
        let object = json.as_object().unwrap();
        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["publicKey", "signature"]);
    }

    #[tokio::test]
    async fn refuses_non_current_accounts() {
        let (signer, _did) = logged_in_signer().await;
        let other = Did::derive("someone else");
        assert!(matches!(
            signer
                .sign_challenge(&other, "nonce", Audience::External, None)
                .await,
            Err(SelfkitError::AccountNotCurrent)
        ));
    }

    #[tokio::test]
    async fn relying_party_request_uses_the_active_session() {
        let (signer, _did) = logged_in_signer().await;
        let request = RelyingPartyRequest {
            challenge: "nonce-123".into(),
            permissions: vec!["profile:read".into()],
            audience: Audience::External,
        };
        let signed = signer.sign_request(&request, None).await.unwrap();
        assert!(!signed.signature.is_empty());
    }
}
