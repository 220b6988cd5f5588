//! Core type definitions for the identity system.

use std::fmt;

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};

/// Scheme tag prefixed to every derived identifier.
pub const DID_PREFIX: &str = "did:self:";

/// A decentralized identifier derived from an account's public key.
///
/// A DID is a pure function of the public key: SHA-256 over the canonical
/// public-key export, encoded as URL-safe unpadded base64 and prefixed with
/// [`DID_PREFIX`]. It is derived exactly once, at account creation, and is
/// never recomputed or mutated afterwards.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    /// Derives the DID for a public key export.
    ///
    /// Deterministic: identical public-key bytes always produce an identical
    /// DID.
    #[must_use]
    pub fn derive(public_key: &str) -> Self {
        let digest = Sha256::digest(public_key.as_bytes());
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
        Self(format!("{DID_PREFIX}{encoded}"))
    }

    /// Parses a DID from its string form.
    ///
    /// # Errors
    ///
    /// Returns the input back if it does not carry the [`DID_PREFIX`] tag.
    pub fn parse(s: &str) -> Result<Self, String> {
        if s.starts_with(DID_PREFIX) {
            Ok(Self(s.to_string()))
        } else {
            Err(s.to_string())
        }
    }

    /// Returns the DID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the DID reduced to the secure store's allowed alphabet.
    ///
    /// Characters outside `[A-Za-z0-9._-]` are stripped. The base64url body
    /// of the DID survives untouched, so sanitized keys stay unique per
    /// account.
    #[must_use]
    pub fn store_key(&self) -> String {
        self.0
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            .collect()
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Did({})", self.0)
    }
}

/// How retrieval of an account's encryption key is gated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthGate {
    /// The key record is wrapped by a PIN-derived key; retrieval requires
    /// the correct PIN in addition to secure store access.
    Pin,
    /// The key record is stored raw; retrieval requires the platform
    /// biometric prompt.
    Biometric,
}

/// A known account, as persisted in the durable account list.
///
/// Contains only public material. The private key lives encrypted in the
/// vault and its encryption key in the secure store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The account's DID; primary key of the account list.
    pub id: Did,
    /// Canonical public-key export (base64).
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// Human-readable display name.
    #[serde(rename = "displayName")]
    pub display_name: String,
    /// Optional profile picture URL.
    #[serde(rename = "pictureUrl", skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
    /// How the encryption key record is gated.
    #[serde(rename = "authGate")]
    pub auth_gate: AuthGate,
}

/// A partial update to one account's mutable fields.
///
/// `None` fields are left untouched. Changing `auth_gate` re-wraps the
/// account's encryption key record.
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    /// New display name, if any.
    pub display_name: Option<String>,
    /// New picture URL, if any (`Some(None)` clears it).
    pub picture_url: Option<Option<String>>,
    /// New auth gate, if any.
    pub auth_gate: Option<AuthGate>,
}

/// Lifecycle state of the account session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed but not yet loaded from durable storage.
    Uninitialized,
    /// Reading the account list and last-session pointer.
    Loading,
    /// Loaded; no accounts exist on this device.
    NoAccounts,
    /// Accounts exist but none is active.
    LoggedOut,
    /// An account is active.
    LoggedIn(Did),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_derivation_is_deterministic() {
        let a = Did::derive("public-key-material");
        let b = Did::derive("public-key-material");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with(DID_PREFIX));
    }

    #[test]
    fn did_derivation_differs_for_different_keys() {
        assert_ne!(Did::derive("key-a"), Did::derive("key-b"));
    }

    #[test]
    fn did_has_no_padding_and_is_url_safe() {
        let did = Did::derive("some key");
        let body = &did.as_str()[DID_PREFIX.len()..];
        assert!(!body.contains('='));
        assert!(!body.contains('+'));
        assert!(!body.contains('/'));
    }

    #[test]
    fn store_key_strips_colons_but_stays_unique() {
        let a = Did::derive("key-a");
        let b = Did::derive("key-b");
        assert!(!a.store_key().contains(':'));
        assert_ne!(a.store_key(), b.store_key());
    }

    #[test]
    fn auth_gate_parses_from_wire_form() {
        use std::str::FromStr;
        assert_eq!(AuthGate::from_str("PIN").unwrap(), AuthGate::Pin);
        assert_eq!(AuthGate::from_str("BIOMETRIC").unwrap(), AuthGate::Biometric);
    }

    #[test]
    fn account_serializes_with_wire_field_names() {
        let account = Account {
            id: Did::derive("k"),
            public_key: "k".into(),
            display_name: "Alice".into(),
            picture_url: None,
            auth_gate: AuthGate::Pin,
        };
        let json = serde_json::to_value(&account).unwrap();
        assert!(json.get("publicKey").is_some());
        assert!(json.get("displayName").is_some());
        assert_eq!(json.get("authGate").unwrap(), "PIN");
        assert!(json.get("pictureUrl").is_none());
    }
}
