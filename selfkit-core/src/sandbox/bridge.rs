//! Request/response correlation with the crypto sandbox.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Result, SelfkitError};

use super::envelope::{SandboxAction, SandboxRequest, SandboxResponse};

/// Deadline for a sandbox request before it is rejected with
/// [`SelfkitError::SandboxTimeout`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Dispatches request envelopes into the sandbox.
///
/// `dispatch` must not block: it hands the envelope to the sandbox (e.g.
/// pushes it onto a channel) and returns. Responses come back through the
/// [`SandboxResponder`] obtained from the bridge.
pub trait SandboxTransport: Send + Sync {
    /// Sends a request envelope into the sandbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the sandbox is no longer reachable.
    fn dispatch(&self, request: SandboxRequest) -> Result<()>;
}

/// Delivery handle for sandbox responses.
///
/// The sandbox side (or a test double standing in for it) calls
/// [`SandboxResponder::deliver`] with each response envelope. Responses for
/// unknown or already-settled request ids are dropped.
#[derive(Clone)]
pub struct SandboxResponder {
    pending: PendingMap,
}

impl SandboxResponder {
    /// Delivers a response to the caller awaiting its request id.
    ///
    /// A no-op when no pending request matches: the request may have timed
    /// out already, or the sandbox may have double-fired. Either way the
    /// late response must not be applied.
    pub fn deliver(&self, response: SandboxResponse) {
        let sender = {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            pending.remove(&response.request_id)
        };
        match sender {
            Some(tx) => {
                // The receiver may have been dropped between removal and
                // send; that request is settled, so the response is dropped.
                let _ = tx.send(response.response);
            }
            None => {
                debug!(request_id = response.request_id, "dropping unmatched sandbox response");
            }
        }
    }
}

/// Correlates asynchronous sandbox calls with their responses.
///
/// Each call allocates a fresh request id, registers a pending continuation,
/// dispatches the envelope, and awaits the matching response under a fixed
/// deadline. Concurrent calls never interfere: ids come from a process-wide
/// counter and each id has at most one live pending entry.
pub struct SandboxBridge {
    transport: Arc<dyn SandboxTransport>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl SandboxBridge {
    /// Creates a bridge over a transport with the default 60 s deadline.
    #[must_use]
    pub fn new(transport: Arc<dyn SandboxTransport>) -> Self {
        Self::with_timeout(transport, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a bridge with a custom request deadline.
    #[must_use]
    pub fn with_timeout(transport: Arc<dyn SandboxTransport>, request_timeout: Duration) -> Self {
        Self {
            transport,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            request_timeout,
        }
    }

    /// Returns the delivery handle the sandbox side uses for responses.
    #[must_use]
    pub fn responder(&self) -> SandboxResponder {
        SandboxResponder {
            pending: Arc::clone(&self.pending),
        }
    }

    /// Executes one sandbox action and returns its result.
    ///
    /// # Errors
    ///
    /// Returns [`SelfkitError::SandboxTimeout`] if no response arrives
    /// before the deadline (a later response is discarded, not applied),
    /// or [`SelfkitError::SandboxFailure`] if the sandbox reports an error
    /// for the request.
    pub async fn call(&self, action: SandboxAction, payload: Value) -> Result<Value> {
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            pending.insert(request_id, tx);
        }

        debug!(request_id, ?action, "dispatching sandbox request");
        if let Err(e) = self.transport.dispatch(SandboxRequest {
            action,
            payload,
            request_id,
        }) {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            pending.remove(&request_id);
            return Err(e);
        }

        let response = match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(SelfkitError::sandbox("response channel closed")),
            Err(_) => {
                // Remove the entry so an eventual late response is dropped.
                let mut pending = self.pending.lock().expect("pending map poisoned");
                pending.remove(&request_id);
                return Err(SelfkitError::SandboxTimeout);
            }
        };

        if let Some(error) = response.get("error").and_then(Value::as_str) {
            return Err(SelfkitError::sandbox(error));
        }
        Ok(response)
    }

    /// Number of requests currently awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().expect("pending map poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    /// Transport that records dispatched envelopes without answering.
    #[derive(Default)]
    struct RecordingTransport {
        requests: StdMutex<Vec<SandboxRequest>>,
    }

    impl SandboxTransport for RecordingTransport {
        fn dispatch(&self, request: SandboxRequest) -> Result<()> {
            self.requests.lock().unwrap().push(request);
            Ok(())
        }
    }

    fn bridge_with_recorder(
        deadline: Duration,
    ) -> (Arc<RecordingTransport>, SandboxBridge) {
        let transport = Arc::new(RecordingTransport::default());
        let bridge = SandboxBridge::with_timeout(
            Arc::clone(&transport) as Arc<dyn SandboxTransport>,
            deadline,
        );
        (transport, bridge)
    }

    #[tokio::test]
    async fn concurrent_calls_get_their_own_results() {
        let (transport, bridge) = bridge_with_recorder(Duration::from_secs(5));
        let bridge = Arc::new(bridge);
        let responder = bridge.responder();

        let first = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(
                async move { bridge.call(SandboxAction::Sign, json!({"challenge": "a"})).await },
            )
        };
        let second = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(
                async move { bridge.call(SandboxAction::Sign, json!({"challenge": "b"})).await },
            )
        };

        while bridge.pending_requests() < 2 {
            tokio::task::yield_now().await;
        }

        // Answer out of dispatch order, each response matched to the
        // challenge its request carried.
        let requests: Vec<SandboxRequest> =
            transport.requests.lock().unwrap().iter().rev().cloned().collect();
        for request in requests {
            let challenge = request.payload["challenge"].as_str().unwrap().to_string();
            responder.deliver(SandboxResponse {
                request_id: request.request_id,
                response: json!(format!("sig-{challenge}")),
            });
        }

        assert_eq!(first.await.unwrap().unwrap(), json!("sig-a"));
        assert_eq!(second.await.unwrap().unwrap(), json!("sig-b"));
    }

    #[tokio::test]
    async fn timeout_rejects_and_discards_late_response() {
        let (transport, bridge) = bridge_with_recorder(Duration::from_millis(20));
        let responder = bridge.responder();

        let result = bridge.call(SandboxAction::GenerateKeyPair, Value::Null).await;
        assert!(matches!(result, Err(SelfkitError::SandboxTimeout)));
        assert_eq!(bridge.pending_requests(), 0);

        // A response arriving after the deadline fired must be a no-op.
        let request_id = transport.requests.lock().unwrap()[0].request_id;
        responder.deliver(SandboxResponse {
            request_id,
            response: json!({"publicKey": "pk", "privateKey": "sk"}),
        });
        assert_eq!(bridge.pending_requests(), 0);
    }

    #[tokio::test]
    async fn duplicate_response_is_dropped() {
        let (transport, bridge) = bridge_with_recorder(Duration::from_secs(5));
        let responder = bridge.responder();

        let call = bridge.call(SandboxAction::Sign, json!({"challenge": "x"}));
        let result = {
            let responder = responder.clone();
            let (result, ()) = tokio::join!(call, async move {
                tokio::task::yield_now().await;
                let request_id = transport.requests.lock().unwrap()[0].request_id;
                responder.deliver(SandboxResponse {
                    request_id,
                    response: json!("first"),
                });
                // Double fire: the second delivery must be silently dropped.
                responder.deliver(SandboxResponse {
                    request_id,
                    response: json!("second"),
                });
            });
            result
        };
        assert_eq!(result.unwrap(), json!("first"));
    }

    #[tokio::test]
    async fn sandbox_reported_error_becomes_typed_failure() {
        let (transport, bridge) = bridge_with_recorder(Duration::from_secs(5));
        let responder = bridge.responder();

        let (result, ()) = tokio::join!(
            bridge.call(SandboxAction::DecryptData, json!({})),
            async {
                tokio::task::yield_now().await;
                let request_id = transport.requests.lock().unwrap()[0].request_id;
                responder.deliver(SandboxResponse {
                    request_id,
                    response: json!({"error": "decryption failed"}),
                });
            }
        );
        assert!(matches!(result, Err(SelfkitError::SandboxFailure { .. })));
    }

    #[tokio::test]
    async fn failed_dispatch_unregisters_the_request() {
        struct BrokenTransport;
        impl SandboxTransport for BrokenTransport {
            fn dispatch(&self, _request: SandboxRequest) -> Result<()> {
                Err(SelfkitError::sandbox("sandbox gone"))
            }
        }
        let bridge = SandboxBridge::new(Arc::new(BrokenTransport));
        let result = bridge.call(SandboxAction::Sign, json!({})).await;
        assert!(result.is_err());
        assert_eq!(bridge.pending_requests(), 0);
    }
}
