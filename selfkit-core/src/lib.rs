//! Self-sovereign identity core.
//!
//! Implements the key-management and authentication backbone for
//! self-sovereign accounts:
//!
//! - asymmetric identity key pairs, generated inside a crypto sandbox,
//! - stable DIDs derived deterministically from public keys,
//! - private keys encrypted at rest with a per-account 256-bit key,
//! - that key gated in OS-backed secure storage behind a PIN or biometric,
//! - challenge signing for first-party login and third-party relying
//!   parties.
//!
//! All cryptographic primitives run behind the [`sandbox`] message
//! protocol; plaintext private key material never reaches durable storage
//! and never leaves the sandbox executor.
#![deny(clippy::all)]

pub mod error;
pub mod identity;
pub mod sandbox;
pub mod secure_store;
pub mod session;
pub mod signer;
pub mod storage;
pub mod types;
pub mod vault;

pub use error::{Result, SelfkitError};
pub use identity::IdentityEngine;
pub use sandbox::{spawn_in_process_sandbox, SandboxBridge};
pub use session::AccountSessionManager;
pub use signer::{Audience, ChallengeSigner, RelyingPartyRequest, SignedChallenge};
pub use types::{Account, AccountPatch, AuthGate, Did, SessionState};
pub use vault::{VaultCodec, VaultEntry};
