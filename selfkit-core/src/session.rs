//! Account session manager: the authoritative account list and active
//! session.
//!
//! Owns the in-memory account list and the current session, and mirrors
//! both to durable storage (`accounts` JSON array, `currentAccountDid`
//! pointer). All mutations of the persisted list go through this type;
//! per-account write operations are serialized with an in-process lock so
//! concurrent updates cannot lose writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use secrecy::SecretString;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, SelfkitError};
use crate::identity::IdentityEngine;
use crate::sandbox::CipherEnvelope;
use crate::secure_store::EncryptionKey;
use crate::storage::{read_json, write_json, AtomicBlobStore};
use crate::types::{Account, AccountPatch, AuthGate, Did, SessionState};

/// Storage key of the durable account list.
pub const ACCOUNTS_KEY: &str = "accounts";

/// Storage key of the last-session pointer.
pub const SESSION_KEY: &str = "currentAccountDid";

struct ActiveSession {
    account: Account,
    /// Cached encryption key; `None` after a restart until the user
    /// re-authenticates.
    key: Option<EncryptionKey>,
}

struct Inner {
    accounts: Vec<Account>,
    current: Option<ActiveSession>,
    state: SessionState,
}

/// Process-wide owner of accounts and the active session.
///
/// Constructed at application startup, loaded with [`Self::init`], and
/// passed (shared) to the collaborators that need it.
pub struct AccountSessionManager {
    engine: IdentityEngine,
    store: Arc<dyn AtomicBlobStore>,
    inner: Mutex<Inner>,
    account_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AccountSessionManager {
    /// Creates an uninitialized manager. Call [`Self::init`] before use.
    #[must_use]
    pub fn new(engine: IdentityEngine, store: Arc<dyn AtomicBlobStore>) -> Self {
        Self {
            engine,
            store,
            inner: Mutex::new(Inner {
                accounts: Vec::new(),
                current: None,
                state: SessionState::Uninitialized,
            }),
            account_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Loads the account list and last-session pointer from durable
    /// storage.
    ///
    /// A restored session is logged in by DID only; the encryption key is
    /// not cached until the user authenticates again.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error if the persisted state
    /// cannot be read.
    pub async fn init(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.state = SessionState::Loading;

        let accounts: Vec<Account> =
            read_json(self.store.as_ref(), ACCOUNTS_KEY)?.unwrap_or_default();
        let last_did = self
            .store
            .read(SESSION_KEY)?
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|s| Did::parse(&s).ok());

        inner.current = last_did.and_then(|did| {
            accounts
                .iter()
                .find(|a| a.id == did)
                .cloned()
                .map(|account| ActiveSession { account, key: None })
        });
        inner.state = match (accounts.is_empty(), &inner.current) {
            (true, _) => SessionState::NoAccounts,
            (false, None) => SessionState::LoggedOut,
            (false, Some(session)) => SessionState::LoggedIn(session.account.id.clone()),
        };
        inner.accounts = accounts;
        info!(accounts = inner.accounts.len(), state = ?inner.state, "session manager initialized");
        Ok(())
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state.clone()
    }

    /// Snapshot of all known accounts.
    pub async fn list_accounts(&self) -> Vec<Account> {
        self.inner.lock().await.accounts.clone()
    }

    /// The active account, if any.
    pub async fn current_account(&self) -> Option<Account> {
        self.inner
            .lock()
            .await
            .current
            .as_ref()
            .map(|s| s.account.clone())
    }

    /// Creates a new account and makes it the active session.
    ///
    /// A failure to persist the session pointer is logged but not
    /// surfaced: the account is complete, only restoration after a restart
    /// is affected.
    ///
    /// # Errors
    ///
    /// See [`IdentityEngine::create_account`]; additionally returns
    /// [`SelfkitError::VaultWriteFailed`] if the account list cannot be
    /// persisted (the vault entry and key record are rolled back).
    pub async fn create_account(
        &self,
        display_name: &str,
        auth_gate: AuthGate,
        pin: Option<&SecretString>,
    ) -> Result<Account> {
        let (account, key) = self.engine.create_account(display_name, auth_gate, pin).await?;

        let mut inner = self.inner.lock().await;
        if inner.accounts.iter().any(|a| a.id == account.id) {
            let _ = self.engine.vault().delete_entry(&account.id);
            let _ = self.engine.delete_key_record(&account.id);
            return Err(SelfkitError::AccountExists {
                did: account.id.to_string(),
            });
        }

        inner.accounts.push(account.clone());
        if let Err(e) = self.persist_accounts(&inner) {
            inner.accounts.pop();
            let _ = self.engine.vault().delete_entry(&account.id);
            let _ = self.engine.delete_key_record(&account.id);
            return Err(e);
        }

        // The pointer only affects restoration after a restart; the account
        // is fully created at this point, so a pointer write failure must
        // not fail the creation.
        if let Err(e) = self.persist_session_pointer(Some(&account.id)) {
            warn!(did = %account.id, error = %e, "session pointer write failed");
        }
        inner.state = SessionState::LoggedIn(account.id.clone());
        inner.current = Some(ActiveSession {
            account: account.clone(),
            key: Some(key),
        });
        Ok(account)
    }

    /// Switches the active session to another account, authenticating
    /// through its gate.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::AccountNotFound`],
    /// [`SelfkitError::AuthenticationDenied`] or
    /// [`SelfkitError::EncryptionKeyUnavailable`].
    pub async fn switch_account(&self, did: &Did, pin: Option<&SecretString>) -> Result<Account> {
        let mut inner = self.inner.lock().await;
        let account = inner
            .accounts
            .iter()
            .find(|a| a.id == *did)
            .cloned()
            .ok_or_else(|| SelfkitError::AccountNotFound {
                did: did.to_string(),
            })?;

        let key = self.engine.login(&account, pin)?;
        if let Err(e) = self.persist_session_pointer(Some(did)) {
            warn!(%did, error = %e, "session pointer write failed");
        }
        inner.state = SessionState::LoggedIn(did.clone());
        inner.current = Some(ActiveSession {
            account: account.clone(),
            key: Some(key),
        });
        Ok(account)
    }

    /// Clears the active session. The account list is retained.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the cleared pointer cannot be persisted.
    pub async fn logout(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        // Dropping the session zeroizes the cached key.
        inner.current = None;
        self.store.delete(SESSION_KEY)?;
        inner.state = if inner.accounts.is_empty() {
            SessionState::NoAccounts
        } else {
            SessionState::LoggedOut
        };
        debug!("session cleared");
        Ok(())
    }

    /// Applies a partial update to one account and re-persists the list.
    ///
    /// An `auth_gate` change re-wraps the account's encryption key record,
    /// which requires the key: either the account is the active session
    /// with a cached key, or `pin` must open the existing gate.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::AccountNotFound`], an authentication error
    /// for gate changes, or [`SelfkitError::VaultWriteFailed`] if the list
    /// cannot be persisted.
    pub async fn update_account(
        &self,
        did: &Did,
        patch: AccountPatch,
        pin: Option<&SecretString>,
    ) -> Result<Account> {
        let lock = self.lock_for(did);
        let _guard = lock.lock().await;

        let mut inner = self.inner.lock().await;
        let index = inner
            .accounts
            .iter()
            .position(|a| a.id == *did)
            .ok_or_else(|| SelfkitError::AccountNotFound {
                did: did.to_string(),
            })?;

        let mut updated = inner.accounts[index].clone();
        if let Some(name) = patch.display_name {
            updated.display_name = name;
        }
        if let Some(picture) = patch.picture_url {
            updated.picture_url = picture;
        }

        // A gate change needs the key up front: resolving it through the
        // old gate aborts the update before anything durable moves.
        let rewrap = match patch.auth_gate {
            Some(gate) if gate != updated.auth_gate => {
                let key = self.resolve_key(&inner, &updated, pin)?;
                updated.auth_gate = gate;
                Some((gate, key))
            }
            _ => None,
        };

        let previous = std::mem::replace(&mut inner.accounts[index], updated.clone());
        if let Err(e) = self.persist_accounts(&inner) {
            inner.accounts[index] = previous;
            return Err(e);
        }

        // Re-wrap last, so a failure leaves the old record in place and the
        // list can be rolled back to the gate that still opens it.
        if let Some((gate, key)) = rewrap {
            if let Err(e) = self.engine.store_key_record(&updated, &key, pin) {
                warn!(%did, "key record re-wrap failed, restoring previous gate");
                inner.accounts[index] = previous;
                if let Err(revert) = self.persist_accounts(&inner) {
                    warn!(%did, error = %revert, "failed to re-persist rolled-back account list");
                }
                return Err(e);
            }
            debug!(%did, gate = %gate, "encryption key record re-wrapped");
        }

        if let Some(session) = inner.current.as_mut() {
            if session.account.id == *did {
                session.account = updated.clone();
            }
        }
        Ok(updated)
    }

    /// Encrypts data for the active account.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::AccountNotCurrent`] when logged out, or
    /// [`SelfkitError::EncryptionKeyUnavailable`] when the session was
    /// restored without re-authentication.
    pub async fn encrypt_data(&self, data: &str) -> Result<String> {
        let inner = self.inner.lock().await;
        let session = inner.current.as_ref().ok_or(SelfkitError::AccountNotCurrent)?;
        let key = session
            .key
            .as_ref()
            .ok_or(SelfkitError::EncryptionKeyUnavailable)?
            .clone();
        drop(inner);
        let envelope = self.engine.encrypt_with_key(data, &key).await?;
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Decrypts data previously produced by [`Self::encrypt_data`] for the
    /// active account.
    ///
    /// # Errors
    ///
    /// See [`Self::encrypt_data`]; additionally fails if the envelope is
    /// malformed or was encrypted under a different key.
    pub async fn decrypt_data(&self, data: &str) -> Result<String> {
        let inner = self.inner.lock().await;
        let session = inner.current.as_ref().ok_or(SelfkitError::AccountNotCurrent)?;
        let key = session
            .key
            .as_ref()
            .ok_or(SelfkitError::EncryptionKeyUnavailable)?
            .clone();
        drop(inner);
        let envelope: CipherEnvelope = serde_json::from_str(data)?;
        self.engine.decrypt_with_key(&envelope, &key).await
    }

    /// Resolves the account and encryption key for a signing operation.
    ///
    /// The account must be the active session. The cached key is used when
    /// present; otherwise the gate is re-opened (platform prompt or PIN)
    /// and the recovered key is cached for the rest of the session.
    pub(crate) async fn signing_context(
        &self,
        did: &Did,
        pin: Option<&SecretString>,
    ) -> Result<(Account, EncryptionKey)> {
        let mut inner = self.inner.lock().await;
        let session = inner.current.as_mut().ok_or(SelfkitError::AccountNotCurrent)?;
        if session.account.id != *did {
            return Err(SelfkitError::AccountNotCurrent);
        }
        let key = match session.key.as_ref() {
            Some(key) => key.clone(),
            None => {
                let key = self.engine.retrieve_encryption_key(&session.account, pin)?;
                session.key = Some(key.clone());
                key
            }
        };
        Ok((session.account.clone(), key))
    }

    pub(crate) fn engine(&self) -> &IdentityEngine {
        &self.engine
    }

    fn resolve_key(
        &self,
        inner: &Inner,
        account: &Account,
        pin: Option<&SecretString>,
    ) -> Result<EncryptionKey> {
        if let Some(session) = inner.current.as_ref() {
            if session.account.id == account.id {
                if let Some(key) = session.key.as_ref() {
                    return Ok(key.clone());
                }
            }
        }
        self.engine.retrieve_encryption_key(account, pin)
    }

    fn persist_accounts(&self, inner: &Inner) -> Result<()> {
        write_json(self.store.as_ref(), ACCOUNTS_KEY, &inner.accounts)
            .map_err(|e| SelfkitError::vault_write(format!("account list: {e}")))
    }

    fn persist_session_pointer(&self, did: Option<&Did>) -> Result<()> {
        match did {
            Some(did) => self
                .store
                .write_atomic(SESSION_KEY, did.as_str().as_bytes()),
            None => self.store.delete(SESSION_KEY),
        }
    }

    fn lock_for(&self, did: &Did) -> Arc<Mutex<()>> {
        let mut locks = self.account_locks.lock().expect("lock map poisoned");
        Arc::clone(locks.entry(did.store_key()).or_default())
    }
}
