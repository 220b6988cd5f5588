//! End-to-end account lifecycle tests against the public API.

use std::sync::Arc;

use secrecy::SecretString;
use selfkit_core::secure_store::{MemorySecureStore, SecureKeyStore};
use selfkit_core::storage::{AtomicBlobStore, MemoryBlobStore};
use selfkit_core::vault::VaultCodec;
use selfkit_core::{
    spawn_in_process_sandbox, Account, AccountSessionManager, Audience, AuthGate, ChallengeSigner,
    Did, IdentityEngine, SelfkitError, SessionState,
};

fn pin(s: &str) -> SecretString {
    SecretString::from(s.to_string())
}

fn build_manager() -> Arc<AccountSessionManager> {
    let store = Arc::new(MemoryBlobStore::new()) as Arc<dyn AtomicBlobStore>;
    let secure = Arc::new(MemorySecureStore::new()) as Arc<dyn SecureKeyStore>;
    let bridge = Arc::new(spawn_in_process_sandbox());
    let engine = IdentityEngine::new(bridge, VaultCodec::new(Arc::clone(&store)), secure);
    Arc::new(AccountSessionManager::new(engine, store))
}

#[tokio::test]
async fn end_to_end_account_lifecycle() {
    let manager = build_manager();
    manager.init().await.unwrap();

    // createAccount("Alice", PIN, "1234")
    let account: Account = manager
        .create_account("Alice", AuthGate::Pin, Some(&pin("1234")))
        .await
        .unwrap();
    assert_eq!(manager.list_accounts().await.len(), 1);
    assert_eq!(account.id, Did::derive(&account.public_key));
    assert_eq!(
        manager.current_account().await.unwrap().id,
        account.id
    );

    // logout(): session cleared, account list retained.
    manager.logout().await.unwrap();
    assert!(manager.current_account().await.is_none());
    assert_eq!(manager.list_accounts().await.len(), 1);

    // login(did, "1234") restores the session.
    let restored = manager
        .switch_account(&account.id, Some(&pin("1234")))
        .await
        .unwrap();
    assert_eq!(restored.id, account.id);
    assert_eq!(
        manager.state().await,
        SessionState::LoggedIn(account.id.clone())
    );

    // login(did, "0000") fails with the generic authentication error.
    manager.logout().await.unwrap();
    let err = manager
        .switch_account(&account.id, Some(&pin("0000")))
        .await
        .unwrap_err();
    assert!(matches!(err, SelfkitError::AuthenticationDenied));
    assert_eq!(format!("{err}"), "incorrect PIN or authentication failed");
}

#[tokio::test]
async fn third_party_challenge_boundary() {
    let manager = build_manager();
    manager.init().await.unwrap();
    let account = manager
        .create_account("Alice", AuthGate::Pin, Some(&pin("1234")))
        .await
        .unwrap();

    let signer = ChallengeSigner::new(Arc::clone(&manager));
    let signed = signer
        .sign_challenge(&account.id, "nonce-123", Audience::External, None)
        .await
        .unwrap();

    // The relying party receives exactly {signature, publicKey}: no DID,
    // no display name, no key material.
    let json = serde_json::to_value(&signed).unwrap();
    let object = json.as_object().unwrap();
    assert_eq!(object.len(), 2);
    assert!(object.contains_key("signature"));
    assert!(object.contains_key("publicKey"));
    assert_eq!(object["publicKey"], account.public_key);
}

#[tokio::test]
async fn did_uniqueness_over_many_keys() {
    use base64::Engine;
    use rand::RngCore;
    use std::collections::HashSet;

    let mut seen = HashSet::new();
    for _ in 0..1_000 {
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        let public_key = base64::engine::general_purpose::STANDARD.encode(key);
        let did = Did::derive(&public_key);
        assert!(seen.insert(did), "DID collision");
    }
}

#[tokio::test]
async fn dids_are_stable_across_restart() {
    let store = Arc::new(MemoryBlobStore::new());
    let secure = Arc::new(MemorySecureStore::new());

    let manager = {
        let blob = Arc::clone(&store) as Arc<dyn AtomicBlobStore>;
        let bridge = Arc::new(spawn_in_process_sandbox());
        let engine = IdentityEngine::new(
            bridge,
            VaultCodec::new(Arc::clone(&blob)),
            Arc::clone(&secure) as Arc<dyn SecureKeyStore>,
        );
        AccountSessionManager::new(engine, blob)
    };
    manager.init().await.unwrap();
    let account = manager
        .create_account("Alice", AuthGate::Pin, Some(&pin("1234")))
        .await
        .unwrap();

    // A fresh process reloads the same account and its DID still matches
    // the derivation from the stored public key.
    let restarted = {
        let blob = Arc::clone(&store) as Arc<dyn AtomicBlobStore>;
        let bridge = Arc::new(spawn_in_process_sandbox());
        let engine = IdentityEngine::new(
            bridge,
            VaultCodec::new(Arc::clone(&blob)),
            Arc::clone(&secure) as Arc<dyn SecureKeyStore>,
        );
        AccountSessionManager::new(engine, blob)
    };
    restarted.init().await.unwrap();
    let accounts = restarted.list_accounts().await;
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].id, account.id);
    assert_eq!(accounts[0].id, Did::derive(&accounts[0].public_key));
}
