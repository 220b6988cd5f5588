//! Wire envelope crossing the sandbox trust boundary.
//!
//! This is the only channel into the crypto sandbox. The field names and
//! action strings are a fixed external contract; a conforming sandbox
//! implementation must reproduce them exactly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Primitive operations the sandbox executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SandboxAction {
    /// Generate a fresh asymmetric identity key pair.
    GenerateKeyPair,
    /// Sign a challenge with a supplied private key.
    Sign,
    /// Encrypt data under a supplied symmetric key.
    EncryptData,
    /// Decrypt data under a supplied symmetric key.
    DecryptData,
}

/// Outbound request: `{action, payload, requestId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxRequest {
    /// The primitive to execute.
    pub action: SandboxAction,
    /// Action-specific payload.
    pub payload: Value,
    /// Correlation id, unique per request.
    #[serde(rename = "requestId")]
    pub request_id: u64,
}

/// Inbound response: `{requestId, response}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxResponse {
    /// Correlation id copied from the request.
    #[serde(rename = "requestId")]
    pub request_id: u64,
    /// Action-specific result, or `{"error": ...}` on failure.
    pub response: Value,
}

/// Result of [`SandboxAction::GenerateKeyPair`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPairResponse {
    /// Canonical public-key export (base64).
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// Private-key export (base64). Never persisted in this form.
    #[serde(rename = "privateKey")]
    pub private_key: String,
}

/// Payload of [`SandboxAction::Sign`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignPayload {
    /// Private-key export to sign with.
    #[serde(rename = "privateKey")]
    pub private_key: String,
    /// The challenge string to sign.
    pub challenge: String,
}

/// Payload of [`SandboxAction::EncryptData`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptPayload {
    /// Plaintext to encrypt.
    pub data: String,
    /// Symmetric key, base64.
    #[serde(rename = "encryptionKey")]
    pub encryption_key: String,
}

/// An encrypted payload as produced by [`SandboxAction::EncryptData`].
///
/// Opaque to everything outside the sandbox; the vault codec stores it
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherEnvelope {
    /// Ciphertext with authentication tag, base64.
    pub ciphertext: String,
    /// AEAD nonce, base64.
    pub nonce: String,
}

/// Payload of [`SandboxAction::DecryptData`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptPayload {
    /// The envelope to decrypt.
    #[serde(flatten)]
    pub envelope: CipherEnvelope,
    /// Symmetric key, base64.
    #[serde(rename = "encryptionKey")]
    pub encryption_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_strings_match_the_wire_contract() {
        for (action, wire) in [
            (SandboxAction::GenerateKeyPair, "\"generateKeyPair\""),
            (SandboxAction::Sign, "\"sign\""),
            (SandboxAction::EncryptData, "\"encryptData\""),
            (SandboxAction::DecryptData, "\"decryptData\""),
        ] {
            assert_eq!(serde_json::to_string(&action).unwrap(), wire);
        }
    }

    #[test]
    fn request_envelope_field_names() {
        let request = SandboxRequest {
            action: SandboxAction::Sign,
            payload: serde_json::json!({"challenge": "nonce-123"}),
            request_id: 7,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["requestId"], 7);
        assert_eq!(json["action"], "sign");
        assert!(json.get("payload").is_some());
    }

    #[test]
    fn response_envelope_round_trip() {
        let raw = r#"{"requestId": 9, "response": {"publicKey": "pk", "privateKey": "sk"}}"#;
        let response: SandboxResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.request_id, 9);
        let pair: KeyPairResponse = serde_json::from_value(response.response).unwrap();
        assert_eq!(pair.public_key, "pk");
    }
}
