//! OS-gated secure storage for encryption key records.
//!
//! The secure store holds one record per account: the account's 256-bit
//! encryption key, either raw (biometric gate) or wrapped by a PIN-derived
//! key (PIN gate, see [`pin`]). Platform implementations should map onto a
//! hardware-backed secret store where available:
//!
//! - iOS: Keychain Services with per-item biometric access control
//! - Android: Keystore-backed EncryptedSharedPreferences
//! - Development/testing: [`FsSecureStore`] (file-backed, no real gating)

pub mod pin;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use base64::Engine;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, SelfkitError};

/// A 256-bit symmetric encryption key for one account's vault entry.
///
/// Zeroized on drop. Never logged, never serialized in plaintext to durable
/// storage; its only at-rest form is the secure store record.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Generates a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Creates a key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encodes the key as standard base64 for secure store transport.
    #[must_use]
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Decodes a key from its base64 secure store form.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::EncryptionKeyUnavailable`] if the value is
    /// not valid base64 or not exactly 32 bytes.
    pub fn from_base64(value: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(value)
            .map_err(|_| SelfkitError::EncryptionKeyUnavailable)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SelfkitError::EncryptionKeyUnavailable)?;
        Ok(Self(arr))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Access requirements for a secure store operation.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    /// Whether retrieval must be gated by the platform authentication
    /// prompt (biometric or device passcode).
    pub require_auth: bool,
    /// Optional prompt text shown by the platform dialog.
    pub prompt: Option<String>,
}

impl AccessPolicy {
    /// Policy requiring the platform authentication prompt.
    #[must_use]
    pub fn authenticated(prompt: &str) -> Self {
        Self {
            require_auth: true,
            prompt: Some(prompt.to_string()),
        }
    }

    /// Policy with no platform gating (the PIN wrap is the gate instead).
    #[must_use]
    pub fn open() -> Self {
        Self::default()
    }
}

/// Platform secure secret store.
///
/// Keys passed to implementations are already sanitized to `[A-Za-z0-9._-]`
/// (see [`crate::types::Did::store_key`]).
pub trait SecureKeyStore: Send + Sync {
    /// Stores a secret value under `key`, replacing any existing record.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::SecretStoreUnavailable`] if the platform
    /// store cannot be reached.
    fn put(&self, key: &str, value: &str, policy: &AccessPolicy) -> Result<()>;

    /// Retrieves the secret stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::SecretNotFound`] if no record exists,
    /// [`SelfkitError::AuthenticationDenied`] if the user failed or
    /// cancelled the platform prompt, or
    /// [`SelfkitError::SecretStoreUnavailable`] if the store cannot be
    /// reached.
    fn get(&self, key: &str, policy: &AccessPolicy) -> Result<String>;

    /// Deletes the record under `key`. Missing records are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::SecretStoreUnavailable`] if the platform
    /// store cannot be reached.
    fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory secure store for tests.
///
/// Simulates the platform gate: when `deny_auth` is set, any `get` with
/// `require_auth` fails with [`SelfkitError::AuthenticationDenied`], which
/// is how a cancelled biometric prompt presents.
#[derive(Default)]
pub struct MemorySecureStore {
    records: Mutex<HashMap<String, String>>,
    deny_auth: AtomicBool,
    fail_puts: AtomicBool,
}

impl MemorySecureStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the user denying/cancelling the platform prompt.
    pub fn deny_auth(&self, deny: bool) {
        self.deny_auth.store(deny, Ordering::SeqCst);
    }

    /// Makes every subsequent `put` fail, for rollback tests.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

impl SecureKeyStore for MemorySecureStore {
    fn put(&self, key: &str, value: &str, _policy: &AccessPolicy) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(SelfkitError::SecretStoreUnavailable);
        }
        let mut records = self.records.lock().expect("record map poisoned");
        records.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str, policy: &AccessPolicy) -> Result<String> {
        if policy.require_auth && self.deny_auth.load(Ordering::SeqCst) {
            return Err(SelfkitError::AuthenticationDenied);
        }
        let records = self.records.lock().expect("record map poisoned");
        records
            .get(key)
            .cloned()
            .ok_or(SelfkitError::SecretNotFound)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut records = self.records.lock().expect("record map poisoned");
        records.remove(key);
        Ok(())
    }
}

/// File-backed secure store for development and the CLI.
///
/// **Not secure for production use**: values land on disk unprotected and
/// `require_auth` cannot be enforced without an OS prompt. Mirrors the
/// role of a file-backed dev keystore on platforms without a secret
/// service.
pub struct FsSecureStore {
    root: PathBuf,
}

impl FsSecureStore {
    /// Creates a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::SecretStoreUnavailable`] if the directory
    /// cannot be created.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|_| SelfkitError::SecretStoreUnavailable)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.secret"))
    }
}

impl SecureKeyStore for FsSecureStore {
    fn put(&self, key: &str, value: &str, policy: &AccessPolicy) -> Result<()> {
        if policy.require_auth {
            tracing::warn!(key, "file-backed secure store cannot enforce platform auth");
        }
        std::fs::write(self.path_for(key), value)
            .map_err(|_| SelfkitError::SecretStoreUnavailable)
    }

    fn get(&self, key: &str, _policy: &AccessPolicy) -> Result<String> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SelfkitError::SecretNotFound)
            }
            Err(_) => Err(SelfkitError::SecretStoreUnavailable),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(_) => Err(SelfkitError::SecretStoreUnavailable),
        }
    }
}
