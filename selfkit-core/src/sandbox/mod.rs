//! Crypto sandbox: isolated execution of cryptographic primitives.
//!
//! All primitive operations (key generation, signing, symmetric
//! encryption/decryption) run behind a message-passing boundary. The rest
//! of the crate only ever sees the request/response protocol in
//! [`envelope`]; plaintext private key material exists solely inside the
//! executor servicing a request.
//!
//! The default executor runs in-process (see [`spawn_in_process_sandbox`]),
//! but callers program against the bridge contract (asynchronous,
//! correlated by request id, timeout-bounded), so the executor can
//! later move to a WASM or out-of-process sandbox without touching callers.

mod bridge;
mod envelope;
mod executor;

pub use bridge::{SandboxBridge, SandboxResponder, SandboxTransport, DEFAULT_REQUEST_TIMEOUT};
pub use envelope::{
    CipherEnvelope, DecryptPayload, EncryptPayload, KeyPairResponse, SandboxAction,
    SandboxRequest, SandboxResponse, SignPayload,
};
pub use executor::spawn_in_process_sandbox;
