//! PropertyTransport trait - the seam to the out-of-process property service
//!
//! A transport only moves requests out and events in. Connection state,
//! request correlation and subscription bookkeeping live in the client.
//!
//! Outbound calls return as soon as the request is handed to the service.
//! Everything the service says back (readiness, replies, notifications)
//! arrives through the [`EventSink`] given to [`PropertyTransport::connect`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::models::{PropertyKey, PropertyValue, SampleRate, StatusCode, Value};

/// Correlates a get/set request with its reply
pub type RequestId = u64;

/// Result carried by a reply
///
/// Get replies carry `Some(value)`, set replies carry `None`.
pub type ReplyResult = Result<Option<PropertyValue>, StatusCode>;

/// Inbound event produced by the transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The service connection is usable
    Ready,
    /// The connection failed or dropped
    Lost { reason: String },
    /// Answer to an earlier get/set
    Reply {
        request_id: RequestId,
        result: ReplyResult,
    },
    /// A subscribed property changed
    Notification(PropertyValue),
    /// A subscribed property reported an error
    NotificationError { key: PropertyKey, code: StatusCode },
}

/// An inbound event tagged with the session it belongs to
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Inbound callback surface handed to a transport on connect
///
/// Each sink is bound to one connection session. Events sent after the
/// session ended are dropped by the client.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    /// Create a sink for a session and the receiver that drains it
    pub fn channel(generation: u64) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { generation, tx }, rx)
    }

    /// Session generation this sink belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the client stopped listening on this sink
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Send a raw event. Returns false when the session is gone.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn ready(&self) -> bool {
        self.send(TransportEvent::Ready)
    }

    pub fn lost(&self, reason: impl Into<String>) -> bool {
        self.send(TransportEvent::Lost {
            reason: reason.into(),
        })
    }

    pub fn reply(&self, request_id: RequestId, result: ReplyResult) -> bool {
        self.send(TransportEvent::Reply { request_id, result })
    }

    pub fn notification(&self, value: PropertyValue) -> bool {
        self.send(TransportEvent::Notification(value))
    }

    pub fn notification_error(&self, key: PropertyKey, code: StatusCode) -> bool {
        self.send(TransportEvent::NotificationError { key, code })
    }
}

/// Transport-agnostic interface to the vehicle property service
///
/// Implementations wrap an IPC runtime. All calls are fire-and-forget from
/// the transport's point of view: an `Ok` means the request was sent, not
/// that it succeeded.
#[async_trait]
pub trait PropertyTransport: Send + Sync {
    /// Start connecting. Readiness or failure is reported through `sink`.
    async fn connect(&self, sink: EventSink) -> Result<(), TransportError>;

    /// Tear the connection down. Must be safe to call at any time.
    async fn disconnect(&self);

    /// Request the current value of `key`
    async fn send_get(
        &self,
        key: PropertyKey,
        request_id: RequestId,
    ) -> Result<(), TransportError>;

    /// Request a write of `value` to `key`
    async fn send_set(
        &self,
        key: PropertyKey,
        value: Value,
        request_id: RequestId,
    ) -> Result<(), TransportError>;

    /// Ask the service to start (or retune) change notifications for `key`
    async fn send_subscribe(
        &self,
        key: PropertyKey,
        rate: SampleRate,
    ) -> Result<(), TransportError>;

    /// Ask the service to stop change notifications for `key`
    async fn send_unsubscribe(&self, key: PropertyKey) -> Result<(), TransportError>;
}
