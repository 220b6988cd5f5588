//! Error types for the identity core.

use thiserror::Error;

/// Result type alias for identity-core operations.
pub type Result<T> = std::result::Result<T, SelfkitError>;

/// Errors surfaced by the identity core.
///
/// Authentication failures deliberately collapse into a single
/// [`SelfkitError::AuthenticationDenied`] variant with a fixed message: a
/// caller (or an attacker driving the UI) must not be able to distinguish a
/// wrong PIN from a cancelled biometric prompt.
#[derive(Debug, Error)]
pub enum SelfkitError {
    /// The sandbox failed to produce a key pair.
    #[error("key generation failed: {reason}")]
    KeyGenerationFailed {
        /// Description of the underlying failure.
        reason: String,
    },

    /// Writing a vault entry or the account list to durable storage failed.
    #[error("vault write failed: {context}")]
    VaultWriteFailed {
        /// Context describing the write that failed.
        context: String,
    },

    /// Reading a vault entry from durable storage failed or the blob is
    /// malformed.
    #[error("vault read failed: {context}")]
    VaultReadFailed {
        /// Context describing the read that failed.
        context: String,
    },

    /// The platform secure store is not available on this device.
    #[error("secure key store unavailable")]
    SecretStoreUnavailable,

    /// Incorrect PIN or authentication failed.
    #[error("incorrect PIN or authentication failed")]
    AuthenticationDenied,

    /// No secret exists in the secure store under the requested key.
    #[error("secret not found")]
    SecretNotFound,

    /// The account's encryption key could not be recovered.
    #[error("encryption key unavailable")]
    EncryptionKeyUnavailable,

    /// The sandbox did not answer a request before its deadline.
    #[error("operation timed out")]
    SandboxTimeout,

    /// The sandbox reported a failure while executing a primitive.
    #[error("sandbox failure: {reason}")]
    SandboxFailure {
        /// Failure description reported by the sandbox.
        reason: String,
    },

    /// No account exists under the given DID.
    #[error("account not found: {did}")]
    AccountNotFound {
        /// The DID that was looked up.
        did: String,
    },

    /// The operation requires the account to be the active session.
    #[error("account is not the current session")]
    AccountNotCurrent,

    /// An account with the same DID already exists.
    #[error("account already exists: {did}")]
    AccountExists {
        /// The colliding DID.
        did: String,
    },

    /// A record could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An underlying storage I/O operation failed.
    #[error("storage error during {context}: {source}")]
    Storage {
        /// Context describing the operation.
        context: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

impl SelfkitError {
    /// Creates a [`SelfkitError::KeyGenerationFailed`].
    pub fn key_generation<S: Into<String>>(reason: S) -> Self {
        Self::KeyGenerationFailed {
            reason: reason.into(),
        }
    }

    /// Creates a [`SelfkitError::VaultWriteFailed`].
    pub fn vault_write<S: Into<String>>(context: S) -> Self {
        Self::VaultWriteFailed {
            context: context.into(),
        }
    }

    /// Creates a [`SelfkitError::VaultReadFailed`].
    pub fn vault_read<S: Into<String>>(context: S) -> Self {
        Self::VaultReadFailed {
            context: context.into(),
        }
    }

    /// Creates a [`SelfkitError::SandboxFailure`].
    pub fn sandbox<S: Into<String>>(reason: S) -> Self {
        Self::SandboxFailure {
            reason: reason.into(),
        }
    }

    /// Creates a [`SelfkitError::Storage`] with context.
    pub fn storage<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// Creates a [`SelfkitError::Serialization`].
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization(message.into())
    }
}

impl From<serde_json::Error> for SelfkitError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_denied_message_is_generic() {
        // Wrong PIN and biometric cancellation must render identically.
        let err = SelfkitError::AuthenticationDenied;
        assert_eq!(format!("{err}"), "incorrect PIN or authentication failed");
    }

    #[test]
    fn timeout_message_has_no_internal_detail() {
        let err = SelfkitError::SandboxTimeout;
        assert_eq!(format!("{err}"), "operation timed out");
    }
}
