//! Connection state machine

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::ConnectionState;
use crate::error::{ClientError, ClientResult};

/// Snapshot of the machine: state plus the session it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Session generation, incremented by every connect that starts a session
    pub generation: u64,
}

/// Lifecycle signal broadcast to interested observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connecting { generation: u64 },
    Ready { generation: u64 },
    /// Connect failure, connect timeout or unsolicited drop
    Lost { generation: u64, reason: String },
    /// Explicit teardown
    Disconnected { generation: u64 },
}

/// Owns ConnectionState and the session generation
///
/// Transitions happen under a short-held lock and are published on a watch
/// channel (for waiters) and a broadcast channel (for observers).
pub struct ConnectionMachine {
    status: Mutex<ConnectionStatus>,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: broadcast::Sender<LifecycleEvent>,
}

impl ConnectionMachine {
    pub fn new() -> Self {
        let initial = ConnectionStatus {
            state: ConnectionState::Disconnected,
            generation: 0,
        };
        let (status_tx, _) = watch::channel(initial);
        let (events_tx, _) = broadcast::channel(64);
        Self {
            status: Mutex::new(initial),
            status_tx,
            events_tx,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.lock().state
    }

    /// Generation of the current session if it is Ready
    pub fn ready_generation(&self) -> Option<u64> {
        let status = self.status.lock();
        (status.state == ConnectionState::Ready).then_some(status.generation)
    }

    /// Whether the machine is Ready in the given session
    pub fn is_ready_in(&self, generation: u64) -> bool {
        self.ready_generation() == Some(generation)
    }

    /// Run `f` under the state lock, only while Ready
    ///
    /// Used to register work that a later Lost must see: anything registered
    /// here happens-before the Disconnected transition.
    pub fn with_ready<R>(&self, f: impl FnOnce(u64) -> R) -> Option<R> {
        let status = self.status.lock();
        if status.state == ConnectionState::Ready {
            Some(f(status.generation))
        } else {
            None
        }
    }

    /// Disconnected → Connecting. Returns the new session generation, or
    /// `None` when a session is already connecting or ready.
    pub fn begin_connect(&self) -> Option<u64> {
        let next = {
            let mut status = self.status.lock();
            if status.state != ConnectionState::Disconnected {
                debug!(state = %status.state, "connect ignored, session already active");
                return None;
            }
            status.state = ConnectionState::Connecting;
            status.generation += 1;
            *status
        };
        self.publish(
            next,
            LifecycleEvent::Connecting {
                generation: next.generation,
            },
        );
        info!(generation = next.generation, "Connecting to property service");
        Some(next.generation)
    }

    /// Connecting → Ready for the given session
    pub fn mark_ready(&self, generation: u64) -> bool {
        let next = {
            let mut status = self.status.lock();
            if status.generation != generation || status.state != ConnectionState::Connecting {
                debug!(
                    generation,
                    current = status.generation,
                    state = %status.state,
                    "Ignoring ready signal"
                );
                return false;
            }
            status.state = ConnectionState::Ready;
            *status
        };
        self.publish(next, LifecycleEvent::Ready { generation });
        info!(generation, "Property service ready");
        true
    }

    /// Connecting/Ready → Disconnected after a drop
    pub fn mark_lost(&self, generation: u64, reason: &str) -> bool {
        self.lose(generation, reason, false)
    }

    /// Connecting → Disconnected when the session never became ready
    pub fn mark_connect_failed(&self, generation: u64, reason: &str) -> bool {
        self.lose(generation, reason, true)
    }

    fn lose(&self, generation: u64, reason: &str, only_connecting: bool) -> bool {
        let next = {
            let mut status = self.status.lock();
            if status.generation != generation
                || status.state == ConnectionState::Disconnected
                || (only_connecting && status.state != ConnectionState::Connecting)
            {
                return false;
            }
            status.state = ConnectionState::Disconnected;
            *status
        };
        self.publish(
            next,
            LifecycleEvent::Lost {
                generation,
                reason: reason.to_string(),
            },
        );
        warn!(generation, reason, "Property service connection lost");
        true
    }

    /// Any → Disconnected on explicit request. Returns the generation of the
    /// session that ended, or `None` when already disconnected.
    pub fn disconnect(&self) -> Option<u64> {
        let next = {
            let mut status = self.status.lock();
            if status.state == ConnectionState::Disconnected {
                return None;
            }
            status.state = ConnectionState::Disconnected;
            *status
        };
        self.publish(
            next,
            LifecycleEvent::Disconnected {
                generation: next.generation,
            },
        );
        info!(generation = next.generation, "Disconnected from property service");
        Some(next.generation)
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events_tx.subscribe()
    }

    /// Wait until the current session is Ready
    ///
    /// Returns the session generation. Fails with `NotReady` when the machine
    /// is (or falls back to) Disconnected, and `Timeout` at `deadline`.
    pub async fn wait_ready(&self, deadline: Instant) -> ClientResult<u64> {
        let mut rx = self.status_tx.subscribe();
        let wait = rx.wait_for(|s| s.state != ConnectionState::Connecting);
        let status = match tokio::time::timeout_at(deadline, wait).await {
            Ok(Ok(status)) => *status,
            Ok(Err(_)) => return Err(ClientError::NotReady),
            Err(_) => return Err(ClientError::Timeout),
        };
        if status.state == ConnectionState::Ready {
            Ok(status.generation)
        } else {
            Err(ClientError::NotReady)
        }
    }

    fn publish(&self, status: ConnectionStatus, event: LifecycleEvent) {
        self.status_tx.send_replace(status);
        // No observers is fine
        let _ = self.events_tx.send(event);
    }
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_connect_ready_disconnect() {
        let machine = ConnectionMachine::new();
        assert_eq!(machine.state(), ConnectionState::Disconnected);

        let generation = machine.begin_connect().unwrap();
        assert_eq!(generation, 1);
        assert_eq!(machine.state(), ConnectionState::Connecting);

        assert!(machine.mark_ready(generation));
        assert_eq!(machine.ready_generation(), Some(1));

        assert_eq!(machine.disconnect(), Some(1));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_is_noop_while_active() {
        let machine = ConnectionMachine::new();
        let generation = machine.begin_connect().unwrap();
        assert_eq!(machine.begin_connect(), None);
        machine.mark_ready(generation);
        assert_eq!(machine.begin_connect(), None);
        assert_eq!(machine.status().generation, generation);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let machine = ConnectionMachine::new();
        assert_eq!(machine.disconnect(), None);
        machine.begin_connect();
        assert!(machine.disconnect().is_some());
        assert_eq!(machine.disconnect(), None);
    }

    #[test]
    fn test_ready_only_from_connecting_same_generation() {
        let machine = ConnectionMachine::new();
        assert!(!machine.mark_ready(0));

        let first = machine.begin_connect().unwrap();
        machine.disconnect();
        let second = machine.begin_connect().unwrap();
        assert!(!machine.mark_ready(first));
        assert!(machine.mark_ready(second));
        assert!(!machine.mark_ready(second));
    }

    #[test]
    fn test_lost_ignores_stale_generation() {
        let machine = ConnectionMachine::new();
        let first = machine.begin_connect().unwrap();
        machine.disconnect();
        let second = machine.begin_connect().unwrap();
        machine.mark_ready(second);

        assert!(!machine.mark_lost(first, "late drop"));
        assert_eq!(machine.state(), ConnectionState::Ready);
        assert!(machine.mark_lost(second, "drop"));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_failure_only_while_connecting() {
        let machine = ConnectionMachine::new();
        let generation = machine.begin_connect().unwrap();
        machine.mark_ready(generation);
        assert!(!machine.mark_connect_failed(generation, "late deadline"));
        assert_eq!(machine.state(), ConnectionState::Ready);

        machine.disconnect();
        let generation = machine.begin_connect().unwrap();
        assert!(machine.mark_connect_failed(generation, "timed out"));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_lifecycle_events_are_broadcast() {
        let machine = ConnectionMachine::new();
        let mut events = machine.subscribe_events();

        let generation = machine.begin_connect().unwrap();
        machine.mark_ready(generation);
        machine.mark_lost(generation, "service died");

        assert_eq!(
            events.try_recv().unwrap(),
            LifecycleEvent::Connecting { generation }
        );
        assert_eq!(events.try_recv().unwrap(), LifecycleEvent::Ready { generation });
        assert_eq!(
            events.try_recv().unwrap(),
            LifecycleEvent::Lost {
                generation,
                reason: "service died".to_string()
            }
        );
    }

    #[test]
    fn test_with_ready_runs_only_when_ready() {
        let machine = ConnectionMachine::new();
        assert_eq!(machine.with_ready(|g| g), None);
        let generation = machine.begin_connect().unwrap();
        assert_eq!(machine.with_ready(|g| g), None);
        machine.mark_ready(generation);
        assert_eq!(machine.with_ready(|g| g), Some(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_resolves_on_ready() {
        let machine = std::sync::Arc::new(ConnectionMachine::new());
        let generation = machine.begin_connect().unwrap();

        let waiter = {
            let machine = machine.clone();
            tokio::spawn(async move {
                machine
                    .wait_ready(Instant::now() + Duration::from_secs(1))
                    .await
            })
        };
        tokio::task::yield_now().await;
        machine.mark_ready(generation);

        assert_eq!(waiter.await.unwrap(), Ok(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_fails_when_disconnected() {
        let machine = ConnectionMachine::new();
        let result = machine
            .wait_ready(Instant::now() + Duration::from_secs(1))
            .await;
        assert_eq!(result, Err(ClientError::NotReady));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_fails_when_connect_fails() {
        let machine = std::sync::Arc::new(ConnectionMachine::new());
        let generation = machine.begin_connect().unwrap();

        let waiter = {
            let machine = machine.clone();
            tokio::spawn(async move {
                machine
                    .wait_ready(Instant::now() + Duration::from_secs(1))
                    .await
            })
        };
        tokio::task::yield_now().await;
        machine.mark_connect_failed(generation, "refused");

        assert_eq!(waiter.await.unwrap(), Err(ClientError::NotReady));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_times_out_while_connecting() {
        let machine = ConnectionMachine::new();
        machine.begin_connect();
        let start = Instant::now();
        let result = machine.wait_ready(start + Duration::from_millis(300)).await;
        assert_eq!(result, Err(ClientError::Timeout));
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }
}
