//! Mock transport for testing
//!
//! Behaves like an echoing property service backed by an in-memory store.
//! Test code drives the failure cases through the control methods.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use vhal_core::{
    EventSink, PropertyKey, PropertyTransport, PropertyValue, RequestId, SampleRate, StatusCode,
    TransportError, TransportEvent, Value,
};

use crate::config::MockConfig;

/// A call the client made on the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Connect { generation: u64 },
    Disconnect,
    Get { key: PropertyKey, request_id: RequestId },
    Set { key: PropertyKey, value: Value, request_id: RequestId },
    Subscribe { key: PropertyKey, rate: SampleRate },
    Unsubscribe { key: PropertyKey },
}

/// In-memory property service
pub struct MockTransport {
    config: MockConfig,
    sink: Mutex<Option<EventSink>>,
    store: RwLock<HashMap<PropertyKey, Value>>,
    subscribed: RwLock<HashMap<PropertyKey, SampleRate>>,
    /// Status code returned instead of a value, per property
    forced_status: RwLock<HashMap<PropertyKey, StatusCode>>,
    ready_on_connect: AtomicBool,
    fail_connect: AtomicBool,
    /// Accept requests but never reply
    silent: AtomicBool,
    fail_subscribe: Mutex<Option<StatusCode>>,
    calls: Mutex<Vec<TransportCall>>,
}

impl MockTransport {
    pub fn new(config: &MockConfig) -> Self {
        let store = config
            .initial_values
            .iter()
            .map(|initial| (PropertyKey::new(initial.id, initial.area), initial.value.clone()))
            .collect();
        Self {
            config: config.clone(),
            sink: Mutex::new(None),
            store: RwLock::new(store),
            subscribed: RwLock::new(HashMap::new()),
            forced_status: RwLock::new(HashMap::new()),
            ready_on_connect: AtomicBool::new(config.ready_on_connect),
            fail_connect: AtomicBool::new(false),
            silent: AtomicBool::new(false),
            fail_subscribe: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sink of the current connection, if any
    pub fn sink(&self) -> Option<EventSink> {
        self.sink.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Report readiness on the current connection
    pub fn emit_ready(&self) -> bool {
        self.sink().map(|sink| sink.ready()).unwrap_or(false)
    }

    /// Simulate the service dying. The connection is dropped.
    pub fn emit_lost(&self, reason: &str) -> bool {
        let sink = self.sink.lock().take();
        self.subscribed.write().clear();
        sink.map(|sink| sink.lost(reason)).unwrap_or(false)
    }

    /// Change a value on the service side, notifying subscribers
    pub fn push_value(&self, key: PropertyKey, value: impl Into<Value>) {
        let value = value.into();
        self.store.write().insert(key, value.clone());
        if self.is_subscribed(&key) {
            if let Some(sink) = self.sink() {
                let event = TransportEvent::Notification(PropertyValue::new(key, value));
                self.deliver(sink, vec![event]);
            }
        }
    }

    /// Send a notification regardless of subscriptions
    pub fn inject_notification(&self, value: PropertyValue) -> bool {
        self.sink()
            .map(|sink| sink.notification(value))
            .unwrap_or(false)
    }

    /// Send an error event for `key`
    pub fn inject_error(&self, key: PropertyKey, code: StatusCode) -> bool {
        self.sink()
            .map(|sink| sink.notification_error(key, code))
            .unwrap_or(false)
    }

    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_ready_on_connect(&self, ready: bool) {
        self.ready_on_connect.store(ready, Ordering::SeqCst);
    }

    /// Answer every get/set for `key` with `code`
    pub fn force_status(&self, key: PropertyKey, code: StatusCode) {
        self.forced_status.write().insert(key, code);
    }

    pub fn clear_status(&self, key: &PropertyKey) {
        self.forced_status.write().remove(key);
    }

    /// Reject subscribe calls with `code`
    pub fn set_fail_subscribe(&self, code: Option<StatusCode>) {
        *self.fail_subscribe.lock() = code;
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn is_subscribed(&self, key: &PropertyKey) -> bool {
        self.subscribed.read().contains_key(key)
    }

    pub fn subscription_rate(&self, key: &PropertyKey) -> Option<SampleRate> {
        self.subscribed.read().get(key).copied()
    }

    pub fn stored(&self, key: &PropertyKey) -> Option<Value> {
        self.store.read().get(key).cloned()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }

    fn connected_sink(&self) -> Result<EventSink, TransportError> {
        self.sink().ok_or(TransportError::ConnectionClosed)
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(self.config.latency_ms)
    }

    /// Send events on `sink`, after the configured latency
    fn deliver(&self, sink: EventSink, events: Vec<TransportEvent>) {
        let latency = self.latency();
        if latency.is_zero() {
            for event in events {
                sink.send(event);
            }
            return;
        }
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            for event in events {
                sink.send(event);
            }
        });
    }
}

#[async_trait]
impl PropertyTransport for MockTransport {
    async fn connect(&self, sink: EventSink) -> Result<(), TransportError> {
        self.record(TransportCall::Connect {
            generation: sink.generation(),
        });
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "mock service unavailable".to_string(),
            ));
        }

        *self.sink.lock() = Some(sink.clone());
        debug!(generation = sink.generation(), "Mock transport: connected");

        if self.ready_on_connect.load(Ordering::SeqCst) {
            let delay = Duration::from_millis(self.config.ready_delay_ms);
            if delay.is_zero() {
                sink.ready();
            } else {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    sink.ready();
                });
            }
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.record(TransportCall::Disconnect);
        self.sink.lock().take();
        self.subscribed.write().clear();
    }

    async fn send_get(
        &self,
        key: PropertyKey,
        request_id: RequestId,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::Get { key, request_id });
        let sink = self.connected_sink()?;
        if self.silent.load(Ordering::SeqCst) {
            return Ok(());
        }

        let forced = self.forced_status.read().get(&key).copied();
        let result = match forced {
            Some(code) => Err(code),
            None => match self.stored(&key) {
                Some(value) => Ok(Some(PropertyValue::new(key, value))),
                None => Err(StatusCode::NOT_AVAILABLE),
            },
        };
        self.deliver(sink, vec![TransportEvent::Reply { request_id, result }]);
        Ok(())
    }

    async fn send_set(
        &self,
        key: PropertyKey,
        value: Value,
        request_id: RequestId,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::Set {
            key,
            value: value.clone(),
            request_id,
        });
        let sink = self.connected_sink()?;
        if self.silent.load(Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(code) = self.forced_status.read().get(&key).copied() {
            let reply = TransportEvent::Reply {
                request_id,
                result: Err(code),
            };
            self.deliver(sink, vec![reply]);
            return Ok(());
        }

        self.store.write().insert(key, value.clone());
        let mut events = vec![TransportEvent::Reply {
            request_id,
            result: Ok(None),
        }];
        if self.is_subscribed(&key) {
            events.push(TransportEvent::Notification(PropertyValue::new(key, value)));
        }
        self.deliver(sink, events);
        Ok(())
    }

    async fn send_subscribe(
        &self,
        key: PropertyKey,
        rate: SampleRate,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::Subscribe { key, rate });
        self.connected_sink()?;
        if let Some(code) = *self.fail_subscribe.lock() {
            return Err(TransportError::Status(code));
        }
        self.subscribed.write().insert(key, rate);
        Ok(())
    }

    async fn send_unsubscribe(&self, key: PropertyKey) -> Result<(), TransportError> {
        self.record(TransportCall::Unsubscribe { key });
        self.connected_sink()?;
        self.subscribed.write().remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitialValue;
    use vhal_core::{AreaId, PropertyId, SessionEvent};

    fn key() -> PropertyKey {
        PropertyKey::global(0x2140_0001)
    }

    fn next(rx: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>) -> TransportEvent {
        rx.try_recv().unwrap().event
    }

    #[tokio::test]
    async fn test_connect_reports_ready() {
        let transport = MockTransport::new(&MockConfig::default());
        let (sink, mut rx) = EventSink::channel(1);
        transport.connect(sink).await.unwrap();

        assert!(transport.is_connected());
        assert!(matches!(next(&mut rx), TransportEvent::Ready));
        assert_eq!(transport.calls(), vec![TransportCall::Connect { generation: 1 }]);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let transport = MockTransport::new(&MockConfig::default());
        transport.set_fail_connect(true);
        let (sink, _rx) = EventSink::channel(1);
        assert!(matches!(
            transport.connect(sink).await,
            Err(TransportError::ConnectionFailed(_))
        ));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_get_initial_value_and_missing_value() {
        let config = MockConfig {
            initial_values: vec![InitialValue {
                id: PropertyId(0x2140_0001),
                area: AreaId::GLOBAL,
                value: Value::Int32(10),
            }],
            ..Default::default()
        };
        let transport = MockTransport::new(&config);
        let (sink, mut rx) = EventSink::channel(1);
        transport.connect(sink).await.unwrap();
        next(&mut rx);

        transport.send_get(key(), 1).await.unwrap();
        match next(&mut rx) {
            TransportEvent::Reply {
                request_id: 1,
                result: Ok(Some(value)),
            } => assert_eq!(value.value(), &Value::Int32(10)),
            other => panic!("unexpected event {:?}", other),
        }

        transport.send_get(PropertyKey::global(7), 2).await.unwrap();
        assert!(matches!(
            next(&mut rx),
            TransportEvent::Reply {
                request_id: 2,
                result: Err(StatusCode::NOT_AVAILABLE)
            }
        ));
    }

    #[tokio::test]
    async fn test_set_notifies_subscribers() {
        let transport = MockTransport::new(&MockConfig::default());
        let (sink, mut rx) = EventSink::channel(1);
        transport.connect(sink).await.unwrap();
        next(&mut rx);

        transport.send_subscribe(key(), SampleRate::NORMAL).await.unwrap();
        transport.send_set(key(), Value::Int32(4), 9).await.unwrap();

        assert!(matches!(
            next(&mut rx),
            TransportEvent::Reply {
                request_id: 9,
                result: Ok(None)
            }
        ));
        assert!(matches!(next(&mut rx), TransportEvent::Notification(_)));
        assert_eq!(transport.stored(&key()), Some(Value::Int32(4)));
    }

    #[tokio::test]
    async fn test_requests_fail_when_not_connected() {
        let transport = MockTransport::new(&MockConfig::default());
        assert_eq!(
            transport.send_get(key(), 1).await,
            Err(TransportError::ConnectionClosed)
        );
    }

    #[tokio::test]
    async fn test_silent_and_forced_status() {
        let transport = MockTransport::new(&MockConfig::default());
        let (sink, mut rx) = EventSink::channel(1);
        transport.connect(sink).await.unwrap();
        next(&mut rx);

        transport.set_silent(true);
        transport.send_get(key(), 1).await.unwrap();
        assert!(rx.try_recv().is_err());

        transport.set_silent(false);
        transport.force_status(key(), StatusCode::ACCESS_DENIED);
        transport.send_set(key(), Value::Int32(1), 2).await.unwrap();
        assert!(matches!(
            next(&mut rx),
            TransportEvent::Reply {
                request_id: 2,
                result: Err(StatusCode::ACCESS_DENIED)
            }
        ));
        assert_eq!(transport.stored(&key()), None);
    }

    #[tokio::test]
    async fn test_emit_lost_drops_connection() {
        let transport = MockTransport::new(&MockConfig::default());
        let (sink, mut rx) = EventSink::channel(3);
        transport.connect(sink).await.unwrap();
        next(&mut rx);
        transport.send_subscribe(key(), SampleRate::UI).await.unwrap();

        assert!(transport.emit_lost("killed"));
        assert!(matches!(next(&mut rx), TransportEvent::Lost { .. }));
        assert!(!transport.is_connected());
        assert!(!transport.is_subscribed(&key()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_replies() {
        let config = MockConfig {
            latency_ms: 50,
            ..Default::default()
        };
        let transport = MockTransport::new(&config);
        let (sink, mut rx) = EventSink::channel(1);
        transport.connect(sink).await.unwrap();
        next(&mut rx);

        transport.send_set(key(), Value::Int32(1), 1).await.unwrap();
        assert!(rx.try_recv().is_err());

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.event, TransportEvent::Reply { request_id: 1, .. }));
    }
}
