//! In-flight get/set correlation
//!
//! Every synchronous call registers a [`PendingRequest`] before the request
//! is sent. The transport's reply is matched by request id; whichever comes
//! first (reply, deadline, cancellation, caller drop) removes the entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use vhal_core::{PropertyKey, PropertyStatus, PropertyValue, ReplyResult, RequestId, StatusCode};

use crate::error::{ClientError, ClientResult};

/// Outcome delivered to a waiting caller. Get yields a value, set yields `None`.
pub type RequestOutcome = ClientResult<Option<PropertyValue>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Get,
    Set,
}

/// A request awaiting its reply
#[derive(Debug)]
pub struct PendingRequest {
    pub key: PropertyKey,
    pub kind: RequestKind,
    /// Session the request was issued in
    pub generation: u64,
    reply: oneshot::Sender<RequestOutcome>,
}

/// Table of pending requests keyed by request id
pub struct PendingRequests {
    next_id: AtomicU64,
    entries: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a request and get the receiver its outcome arrives on
    pub fn register(
        &self,
        key: PropertyKey,
        kind: RequestKind,
        generation: u64,
    ) -> (RequestId, oneshot::Receiver<RequestOutcome>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(
            id,
            PendingRequest {
                key,
                kind,
                generation,
                reply: tx,
            },
        );
        (id, rx)
    }

    /// Resolve a request with the transport's reply
    ///
    /// Returns false when no matching request exists (already timed out or
    /// cancelled) or the reply belongs to another session.
    pub fn resolve(&self, id: RequestId, generation: u64, result: ReplyResult) -> bool {
        let request = {
            let mut entries = self.entries.lock();
            match entries.get(&id).map(|request| request.generation) {
                Some(expected) if expected != generation => {
                    debug!(
                        request_id = id,
                        generation,
                        expected,
                        "Discarding reply from another session"
                    );
                    return false;
                }
                Some(_) => entries.remove(&id),
                None => None,
            }
        };

        let Some(request) = request else {
            debug!(request_id = id, "Discarding reply for unknown request");
            return false;
        };

        if let Ok(Some(value)) = &result {
            if value.key() != request.key {
                warn!(
                    request_id = id,
                    expected = %request.key,
                    actual = %value.key(),
                    "Reply carries another property"
                );
            }
        }
        let outcome = reply_outcome(request.kind, request.key, result);
        // Caller may have gone away; its guard already cleaned up
        let _ = request.reply.send(outcome);
        true
    }

    /// Remove a request without resolving it
    pub fn remove(&self, id: RequestId) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Resolve every pending request with `error`. Returns how many were cancelled.
    pub fn cancel_all(&self, error: ClientError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, request)| request).collect()
        };
        let count = drained.len();
        for request in drained {
            let _ = request.reply.send(Err(error.clone()));
        }
        if count > 0 {
            debug!(count, %error, "Cancelled pending requests");
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a pending request when the waiting caller finishes or is dropped
pub struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    id: RequestId,
}

impl<'a> PendingGuard<'a> {
    pub fn new(pending: &'a PendingRequests, id: RequestId) -> Self {
        Self { pending, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

/// Translate a transport reply into the client's error taxonomy
fn reply_outcome(kind: RequestKind, key: PropertyKey, result: ReplyResult) -> RequestOutcome {
    match (kind, result) {
        (_, Err(code)) if code == StatusCode::NOT_AVAILABLE => Err(ClientError::Unavailable(key)),
        (_, Err(code)) => Err(ClientError::TransportError(code)),
        (RequestKind::Set, Ok(_)) => Ok(None),
        (RequestKind::Get, Ok(None)) => Err(ClientError::Unavailable(key)),
        (RequestKind::Get, Ok(Some(value))) if value.key() != key => {
            Err(ClientError::TransportError(StatusCode::INTERNAL_ERROR))
        }
        (RequestKind::Get, Ok(Some(value))) => match value.status() {
            PropertyStatus::Available => Ok(Some(value)),
            PropertyStatus::Unavailable => Err(ClientError::Unavailable(key)),
            PropertyStatus::Error => Err(ClientError::TransportError(StatusCode::INTERNAL_ERROR)),
        },
    }
}
