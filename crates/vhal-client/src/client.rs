//! PropertyClient - the facade applications talk to
//!
//! The client owns the connection state machine, the subscription registry,
//! the pending-request table and the event dispatcher. Transport events for
//! a session arrive on one channel and are handled by a single delivery task;
//! listener callbacks run on the dispatcher's per-key workers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vhal_core::{
    EventSink, PropertyId, PropertyKey, PropertyTransport, PropertyValue, SampleRate,
    SessionEvent, StatusCode, TransportEvent, Value, ValueType,
};

use crate::config::ClientConfig;
use crate::connection::{ConnectionMachine, ConnectionState, ConnectionStatus, LifecycleEvent};
use crate::dispatch::{DeliveryStatsSnapshot, EventDispatcher, FailureHook, ListenerFailure};
use crate::error::{ClientError, ClientResult};
use crate::listener::{ChannelListener, PropertyEvent, PropertyListener};
use crate::pending::{PendingGuard, PendingRequests, RequestKind, RequestOutcome};
use crate::subscription::{KeyChange, SubscriptionHandle, SubscriptionRegistry};
use crate::transport::create_transport;

/// Client for an out-of-process vehicle property service
///
/// Cheap to clone; clones share the same connection and subscriptions.
#[derive(Clone)]
pub struct PropertyClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn PropertyTransport>,
    connection: ConnectionMachine,
    registry: SubscriptionRegistry,
    pending: PendingRequests,
    dispatcher: EventDispatcher,
    declared: RwLock<HashMap<PropertyId, ValueType>>,
    /// Serializes registry edits and the matching transport call per key
    key_locks: Mutex<HashMap<PropertyKey, Arc<AsyncMutex<()>>>>,
    tasks: Mutex<SessionTasks>,
    reconnect_attempt: AtomicU32,
}

#[derive(Default)]
struct SessionTasks {
    delivery: Option<JoinHandle<()>>,
    connect_deadline: Option<JoinHandle<()>>,
    /// Scheduled reconnect, only present while it is still backing off
    reconnect: Option<ReconnectTask>,
    next_reconnect_id: u64,
}

struct ReconnectTask {
    id: u64,
    handle: JoinHandle<()>,
}

enum Outbound {
    Get,
    Set(Value),
}

impl Outbound {
    fn kind(&self) -> RequestKind {
        match self {
            Outbound::Get => RequestKind::Get,
            Outbound::Set(_) => RequestKind::Set,
        }
    }
}

impl PropertyClient {
    /// Create a client over `transport`. The client starts Disconnected.
    pub fn new(config: ClientConfig, transport: Arc<dyn PropertyTransport>) -> Self {
        let declared = config.declared_types();
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                connection: ConnectionMachine::new(),
                registry: SubscriptionRegistry::new(),
                pending: PendingRequests::new(),
                dispatcher: EventDispatcher::new(),
                declared: RwLock::new(declared),
                key_locks: Mutex::new(HashMap::new()),
                tasks: Mutex::new(SessionTasks::default()),
                reconnect_attempt: AtomicU32::new(0),
            }),
        }
    }

    /// Create a client with the transport named in the configuration
    pub fn from_config(config: ClientConfig) -> Self {
        let transport = create_transport(&config.transport);
        Self::new(config, transport)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Start a new session
    ///
    /// Returns once the transport accepted the connect request; readiness is
    /// reported later (see [`PropertyClient::wait_ready`]). A no-op while a
    /// session is connecting or ready.
    pub async fn connect(&self) -> ClientResult<()> {
        self.inner.cancel_reconnect();
        let Some(generation) = self.inner.connection.begin_connect() else {
            return Ok(());
        };
        self.inner.start_session(generation).await
    }

    /// End the current session
    ///
    /// Pending requests fail with `TransportError(TRY_AGAIN)`. Subscriptions
    /// are kept and re-armed by the next successful connect. Idempotent.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.cancel_reconnect();
        inner.reconnect_attempt.store(0, Ordering::Relaxed);
        if inner.connection.disconnect().is_none() {
            return;
        }
        inner.abort_session_tasks();
        inner.session_ended();
        inner.transport.disconnect().await;
    }

    /// Disconnect and drop every subscription
    pub async fn shutdown(&self) {
        self.disconnect().await;
        let keys = self.inner.registry.clear();
        self.inner.dispatcher.shutdown();
        info!(keys = keys.len(), "Property client shut down");
    }

    /// Wait until the client is Ready
    ///
    /// Fails with `NotReady` when the client is (or falls back to)
    /// Disconnected and `Timeout` when `timeout` elapses while connecting.
    pub async fn wait_ready(&self, timeout: Duration) -> ClientResult<()> {
        self.inner
            .connection
            .wait_ready(Instant::now() + timeout)
            .await
            .map(|_| ())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.connection.status()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Lifecycle transitions (Connecting, Ready, Lost, Disconnected)
    pub fn lifecycle_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.connection.subscribe_events()
    }

    /// Latest connection status, for callers that only care about the current value
    pub fn state_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.connection.watch()
    }

    // =========================================================================
    // Property access
    // =========================================================================

    /// Read the current value of `key`
    pub async fn get(&self, key: PropertyKey) -> ClientResult<PropertyValue> {
        self.inner
            .call(key, Outbound::Get)
            .await?
            .ok_or(ClientError::Unavailable(key))
    }

    /// Write `value` to `key`
    ///
    /// A value whose type differs from the property's declared type is
    /// rejected with `InvalidValue` before anything is sent.
    pub async fn set(&self, key: PropertyKey, value: impl Into<Value>) -> ClientResult<()> {
        let value = value.into();
        self.inner.validate(key, &value)?;
        self.inner.call(key, Outbound::Set(value)).await.map(|_| ())
    }

    pub async fn get_i32(&self, key: PropertyKey) -> ClientResult<i32> {
        let value = self.get(key).await?;
        value
            .value()
            .as_i32()
            .ok_or_else(|| mismatch(ValueType::Int32, &value))
    }

    pub async fn set_i32(&self, key: PropertyKey, value: i32) -> ClientResult<()> {
        self.set(key, Value::Int32(value)).await
    }

    pub async fn get_bool(&self, key: PropertyKey) -> ClientResult<bool> {
        let value = self.get(key).await?;
        value
            .value()
            .as_bool()
            .ok_or_else(|| mismatch(ValueType::Bool, &value))
    }

    pub async fn set_bool(&self, key: PropertyKey, value: bool) -> ClientResult<()> {
        self.set(key, Value::Bool(value)).await
    }

    pub async fn get_f32(&self, key: PropertyKey) -> ClientResult<f32> {
        let value = self.get(key).await?;
        value
            .value()
            .as_f32()
            .ok_or_else(|| mismatch(ValueType::Float, &value))
    }

    pub async fn set_f32(&self, key: PropertyKey, value: f32) -> ClientResult<()> {
        self.set(key, Value::Float(value)).await
    }

    /// Declare the value type writes to `id` must carry
    pub fn declare_property(&self, id: impl Into<PropertyId>, value_type: ValueType) {
        let id = id.into();
        debug!(property_id = %id, %value_type, "Declared property type");
        self.inner.declared.write().insert(id, value_type);
    }

    pub fn declared_type(&self, id: impl Into<PropertyId>) -> Option<ValueType> {
        self.inner.declared.read().get(&id.into()).copied()
    }

    /// Number of get/set calls waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Register `listener` for change and error events of `key`
    ///
    /// Only allowed while Ready. The subscription survives disconnects and is
    /// re-armed with the service whenever a new session becomes ready.
    pub async fn subscribe(
        &self,
        key: PropertyKey,
        listener: Arc<dyn PropertyListener>,
        rate: SampleRate,
    ) -> ClientResult<SubscriptionHandle> {
        let inner = &self.inner;
        inner.connection.ready_generation().ok_or(ClientError::NotReady)?;

        let _key_guard = inner.lock_key(key).await;
        let generation = inner
            .connection
            .ready_generation()
            .ok_or(ClientError::NotReady)?;

        let (handle, change) = inner.registry.insert(key, listener, rate);
        let send_rate = match change {
            KeyChange::Subscribe(effective) => Some(effective),
            // Joined a key the current session has not re-armed yet
            KeyChange::Unchanged if !inner.registry.is_key_armed(&key, generation) => {
                inner.registry.effective_rate(&key)
            }
            _ => None,
        };
        if let Some(effective) = send_rate {
            if let Err(e) = inner.transport.send_subscribe(key, effective).await {
                warn!(property = %key, error = %e, "Subscribe failed");
                if let Some(KeyChange::Unsubscribe) = inner.registry.remove(handle) {
                    inner.dispatcher.retire(&key);
                }
                return Err(e.into());
            }
            info!(property = %key, rate = %effective, "Subscribed");
        }

        inner.connection.with_ready(|current| {
            if current == generation {
                inner.registry.mark_handle_armed(&handle, current);
            }
        });
        Ok(handle)
    }

    /// Subscribe with a listener that forwards events into a channel
    pub async fn subscribe_channel(
        &self,
        key: PropertyKey,
        rate: SampleRate,
    ) -> ClientResult<(SubscriptionHandle, mpsc::UnboundedReceiver<PropertyEvent>)> {
        let (listener, rx) = ChannelListener::new();
        let handle = self.subscribe(key, Arc::new(listener), rate).await?;
        Ok((handle, rx))
    }

    /// Remove a subscription. Unknown or already removed handles are ignored.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) {
        let inner = &self.inner;
        let key = handle.key();
        let _key_guard = inner.lock_key(key).await;
        let Some(change) = inner.registry.remove(handle) else {
            debug!(property = %key, "Ignoring stale subscription handle");
            return;
        };

        let ready = inner.connection.ready_generation().is_some();
        match change {
            KeyChange::Unsubscribe => {
                inner.dispatcher.retire(&key);
                if ready {
                    if let Err(e) = inner.transport.send_unsubscribe(key).await {
                        warn!(property = %key, error = %e, "Unsubscribe failed");
                    }
                }
                info!(property = %key, "Unsubscribed");
            }
            KeyChange::Subscribe(rate) => {
                if ready {
                    if let Err(e) = inner.transport.send_subscribe(key, rate).await {
                        warn!(property = %key, error = %e, "Failed to lower sample rate");
                    }
                }
            }
            KeyChange::Unchanged => {}
        }
    }

    /// Whether the subscription is registered with the service in the current session
    pub fn is_armed(&self, handle: &SubscriptionHandle) -> bool {
        let armed = self.inner.registry.armed_session(handle);
        armed.is_some() && armed == self.inner.connection.ready_generation()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn subscribed_keys(&self) -> Vec<PropertyKey> {
        self.inner.registry.keys()
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    pub fn delivery_stats(&self) -> DeliveryStatsSnapshot {
        self.inner.dispatcher.stats()
    }

    /// Install a hook called whenever a listener panics
    pub fn set_failure_hook<F>(&self, hook: F)
    where
        F: Fn(&ListenerFailure) + Send + Sync + 'static,
    {
        let hook: FailureHook = Arc::new(hook);
        self.inner.dispatcher.set_failure_hook(Some(hook));
    }

    pub fn clear_failure_hook(&self) {
        self.inner.dispatcher.set_failure_hook(None);
    }

    /// Wait until every event received so far has reached its listeners
    pub async fn flush_deliveries(&self) {
        self.inner.dispatcher.flush().await;
    }
}

fn mismatch(expected: ValueType, value: &PropertyValue) -> ClientError {
    ClientError::InvalidValue {
        expected,
        actual: value.value().value_type(),
    }
}

impl Inner {
    async fn start_session(self: &Arc<Self>, generation: u64) -> ClientResult<()> {
        let (sink, rx) = EventSink::channel(generation);
        let delivery = tokio::spawn(run_delivery(Arc::downgrade(self), rx));
        let deadline = tokio::spawn(run_connect_deadline(
            Arc::downgrade(self),
            generation,
            self.config.connect_timeout(),
        ));
        {
            let mut tasks = self.tasks.lock();
            if let Some(old) = tasks.delivery.replace(delivery) {
                old.abort();
            }
            if let Some(old) = tasks.connect_deadline.replace(deadline) {
                old.abort();
            }
        }

        match self.transport.connect(sink).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(generation, error = %e, "Connect failed");
                if self.connection.mark_connect_failed(generation, &e.to_string()) {
                    self.session_ended();
                    self.schedule_reconnect();
                }
                Err(e.into())
            }
        }
    }

    fn handle_event(self: &Arc<Self>, event: SessionEvent) {
        let SessionEvent { generation, event } = event;
        let status = self.connection.status();
        if status.generation != generation || status.state == ConnectionState::Disconnected {
            debug!(
                generation,
                current = status.generation,
                "Discarding event from a closed session"
            );
            return;
        }

        match event {
            TransportEvent::Ready => {
                if self.connection.mark_ready(generation) {
                    if let Some(deadline) = self.tasks.lock().connect_deadline.take() {
                        deadline.abort();
                    }
                    self.reconnect_attempt.store(0, Ordering::Relaxed);
                    self.spawn_rearm(generation);
                }
            }
            TransportEvent::Lost { reason } => {
                if self.connection.mark_lost(generation, &reason) {
                    self.session_ended();
                    self.schedule_reconnect();
                }
            }
            TransportEvent::Reply { request_id, result } => {
                self.pending.resolve(request_id, generation, result);
            }
            TransportEvent::Notification(value) => {
                let key = value.key();
                let targets = self.registry.listeners(&key);
                self.dispatcher
                    .dispatch(key, PropertyEvent::Change(value), targets);
            }
            TransportEvent::NotificationError { key, code } => {
                debug!(property = %key, %code, "Property error event");
                let targets = self.registry.listeners(&key);
                self.dispatcher
                    .dispatch(key, PropertyEvent::Error { key, code }, targets);
            }
        }
    }

    /// Cleanup once the machine left a session
    fn session_ended(&self) {
        self.pending
            .cancel_all(ClientError::TransportError(StatusCode::TRY_AGAIN));
        self.registry.disarm_all();
    }

    fn abort_session_tasks(&self) {
        let mut tasks = self.tasks.lock();
        for task in [tasks.delivery.take(), tasks.connect_deadline.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }

    /// Abort a scheduled reconnect that is still waiting out its backoff
    fn cancel_reconnect(&self) {
        if let Some(task) = self.tasks.lock().reconnect.take() {
            task.handle.abort();
        }
    }

    /// Take ownership of the reconnect slot before connecting
    ///
    /// Returns false when the task was superseded or cancelled.
    fn claim_reconnect(&self, id: u64) -> bool {
        let mut tasks = self.tasks.lock();
        match &tasks.reconnect {
            Some(task) if task.id == id => {
                tasks.reconnect = None;
                true
            }
            _ => false,
        }
    }

    async fn lock_key(&self, key: PropertyKey) -> OwnedMutexGuard<()> {
        let lock = self.key_locks.lock().entry(key).or_default().clone();
        lock.lock_owned().await
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let policy = &self.config.reconnect;
        if !policy.enabled {
            return;
        }
        let attempt = self.reconnect_attempt.fetch_add(1, Ordering::Relaxed);
        let delay = policy.backoff(attempt);
        info!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        let weak = Arc::downgrade(self);
        // Spawned under the lock so the task cannot claim before it is stored
        let mut tasks = self.tasks.lock();
        tasks.next_reconnect_id += 1;
        let id = tasks.next_reconnect_id;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.claim_reconnect(id) {
                return;
            }
            let Some(generation) = inner.connection.begin_connect() else {
                return;
            };
            if let Err(e) = inner.start_session(generation).await {
                debug!(generation, error = %e, "Reconnect attempt failed");
            }
        });
        if let Some(old) = tasks.reconnect.replace(ReconnectTask { id, handle }) {
            old.handle.abort();
        }
    }

    fn spawn_rearm(self: &Arc<Self>, generation: u64) {
        let keys: Vec<PropertyKey> = self
            .registry
            .live_keys()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        if keys.is_empty() {
            return;
        }
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            if let Some(inner) = weak.upgrade() {
                inner.rearm(generation, keys).await;
            }
        });
    }

    /// Register every live key with the service for the given session
    async fn rearm(&self, generation: u64, keys: Vec<PropertyKey>) {
        let mut armed = 0usize;
        for key in keys {
            let _key_guard = self.lock_key(key).await;
            if !self.connection.is_ready_in(generation) {
                debug!(generation, "Session ended during re-arm");
                return;
            }
            // Listeners may have come or gone since the re-arm was scheduled
            let Some(rate) = self.registry.effective_rate(&key) else {
                continue;
            };
            if let Err(e) = self.transport.send_subscribe(key, rate).await {
                warn!(property = %key, error = %e, "Failed to re-arm subscription");
                continue;
            }
            let applied = self
                .connection
                .with_ready(|current| {
                    if current == generation {
                        self.registry.mark_armed(&key, current);
                    }
                    current == generation
                })
                .unwrap_or(false);
            if !applied {
                debug!(property = %key, generation, "Discarding stale re-arm completion");
                return;
            }
            armed += 1;
        }
        info!(generation, armed, "Subscriptions re-armed");
    }

    fn validate(&self, key: PropertyKey, value: &Value) -> ClientResult<()> {
        let expected = self.declared.read().get(&key.property_id).copied();
        match expected {
            Some(expected) if expected != value.value_type() => {
                debug!(property = %key, %expected, actual = %value.value_type(), "Rejected write");
                Err(ClientError::InvalidValue {
                    expected,
                    actual: value.value_type(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Wait out a Connecting state. NotReady if the deadline passes first.
    async fn await_ready_until(&self, deadline: Instant) -> ClientResult<()> {
        match self.connection.state() {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Disconnected => Err(ClientError::NotReady),
            ConnectionState::Connecting => match self.connection.wait_ready(deadline).await {
                Ok(_) => Ok(()),
                Err(ClientError::Timeout) => Err(ClientError::NotReady),
                Err(e) => Err(e),
            },
        }
    }

    async fn call(&self, key: PropertyKey, op: Outbound) -> RequestOutcome {
        let deadline = Instant::now() + self.config.request_timeout();
        self.await_ready_until(deadline).await?;

        let kind = op.kind();
        let (request_id, rx) = self
            .connection
            .with_ready(|generation| self.pending.register(key, kind, generation))
            .ok_or(ClientError::NotReady)?;
        let _guard = PendingGuard::new(&self.pending, request_id);

        // Cancelled between registration and send; the outcome is already queued
        if self.pending.contains(request_id) {
            debug!(property = %key, request_id, ?kind, "Sending request");
            let sent = match op {
                Outbound::Get => self.transport.send_get(key, request_id).await,
                Outbound::Set(value) => self.transport.send_set(key, value, request_id).await,
            };
            if let Err(e) = sent {
                warn!(property = %key, request_id, error = %e, "Request send failed");
                return Err(e.into());
            }
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::NotReady),
            Err(_) => {
                debug!(property = %key, request_id, "Request timed out");
                Err(ClientError::Timeout)
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut();
        for task in [
            tasks.delivery.take(),
            tasks.connect_deadline.take(),
            tasks.reconnect.take().map(|task| task.handle),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

/// Drain one session's inbound events
async fn run_delivery(weak: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        inner.handle_event(event);
    }
}

/// Fail the session if it is still connecting after `timeout`
async fn run_connect_deadline(weak: Weak<Inner>, generation: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let Some(inner) = weak.upgrade() else {
        return;
    };
    if inner
        .connection
        .mark_connect_failed(generation, "connect timed out")
    {
        warn!(
            generation,
            timeout_ms = timeout.as_millis() as u64,
            "Property service did not become ready"
        );
        inner.session_ended();
        inner.transport.disconnect().await;
        inner.schedule_reconnect();
    }
}
