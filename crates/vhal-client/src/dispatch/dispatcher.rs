//! Per-key delivery workers

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};
use vhal_core::PropertyKey;

use crate::listener::PropertyEvent;
use crate::subscription::{ListenerRef, SubscriptionHandle};

/// A listener that panicked while handling an event
#[derive(Debug, Clone)]
pub struct ListenerFailure {
    pub handle: SubscriptionHandle,
    pub key: PropertyKey,
    pub message: String,
}

/// Called for every listener panic
pub type FailureHook = Arc<dyn Fn(&ListenerFailure) + Send + Sync>;

/// Delivery counters
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    listener_failures: AtomicU64,
    unmatched: AtomicU64,
    skipped: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStatsSnapshot {
    /// Listener calls that returned normally
    pub delivered: u64,
    /// Listener calls that panicked
    pub listener_failures: u64,
    /// Events for keys without any listener
    pub unmatched: u64,
    /// Deliveries skipped because the subscription went away after queueing
    pub skipped: u64,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

enum DeliveryJob {
    Deliver {
        event: PropertyEvent,
        targets: Vec<ListenerRef>,
    },
    /// Acknowledged once every job queued before it has run
    Barrier(oneshot::Sender<()>),
}

struct Worker {
    tx: mpsc::UnboundedSender<DeliveryJob>,
    task: JoinHandle<()>,
}

struct Shared {
    stats: DeliveryStats,
    failure_hook: RwLock<Option<FailureHook>>,
}

/// Routes events to per-key workers
pub struct EventDispatcher {
    workers: Mutex<HashMap<PropertyKey, Worker>>,
    /// Workers that were retired but may still be draining
    retired: Mutex<HashMap<PropertyKey, JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            retired: Mutex::new(HashMap::new()),
            shared: Arc::new(Shared {
                stats: DeliveryStats::default(),
                failure_hook: RwLock::new(None),
            }),
        }
    }

    /// Queue `event` for the listeners in `targets`
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, key: PropertyKey, event: PropertyEvent, targets: Vec<ListenerRef>) {
        if targets.is_empty() {
            self.shared.stats.unmatched.fetch_add(1, Ordering::Relaxed);
            debug!(property = %key, "No listener for event");
            return;
        }
        self.enqueue(key, DeliveryJob::Deliver { event, targets });
    }

    /// Stop the worker for `key` once its queue is drained
    pub fn retire(&self, key: &PropertyKey) {
        let Some(worker) = self.workers.lock().remove(key) else {
            return;
        };
        // Dropping the sender ends the worker after its last queued job
        drop(worker.tx);
        self.retired.lock().insert(*key, worker.task);
        debug!(property = %key, "Delivery worker retired");
    }

    /// Retire every worker
    pub fn shutdown(&self) {
        let workers: Vec<(PropertyKey, Worker)> = self.workers.lock().drain().collect();
        let mut retired = self.retired.lock();
        for (key, worker) in workers {
            drop(worker.tx);
            retired.insert(key, worker.task);
        }
        retired.retain(|_, task| !task.is_finished());
    }

    /// Wait until every event queued so far has been delivered
    pub async fn flush(&self) {
        let barriers: Vec<oneshot::Receiver<()>> = {
            let workers = self.workers.lock();
            workers
                .values()
                .filter_map(|worker| {
                    let (tx, rx) = oneshot::channel();
                    worker.tx.send(DeliveryJob::Barrier(tx)).ok().map(|_| rx)
                })
                .collect()
        };
        for barrier in barriers {
            let _ = barrier.await;
        }
    }

    pub fn set_failure_hook(&self, hook: Option<FailureHook>) {
        *self.shared.failure_hook.write() = hook;
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Number of keys with a running worker
    pub fn active_workers(&self) -> usize {
        self.workers.lock().len()
    }

    fn enqueue(&self, key: PropertyKey, job: DeliveryJob) {
        let mut workers = self.workers.lock();
        let job = match workers.get(&key) {
            Some(worker) => match worker.tx.send(job) {
                Ok(()) => return,
                // Worker is gone; start a fresh one with the same job
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let previous = self.retired.lock().remove(&key);
        let (tx, rx) = mpsc::unbounded_channel();
        // A fresh receiver cannot be closed yet
        let _ = tx.send(job);
        let task = tokio::spawn(run_worker(key, rx, self.shared.clone(), previous));
        if let Some(old) = workers.insert(key, Worker { tx, task }) {
            old.task.abort();
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(
    key: PropertyKey,
    mut rx: mpsc::UnboundedReceiver<DeliveryJob>,
    shared: Arc<Shared>,
    previous: Option<JoinHandle<()>>,
) {
    // A retired worker for the same key finishes its queue first
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    while let Some(job) = rx.recv().await {
        match job {
            DeliveryJob::Deliver { event, targets } => shared.deliver(&event, &targets),
            DeliveryJob::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(property = %key, "Delivery worker stopped");
}

impl Shared {
    fn deliver(&self, event: &PropertyEvent, targets: &[ListenerRef]) {
        for target in targets {
            if !target.is_live() {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let result = catch_unwind(AssertUnwindSafe(|| match event {
                PropertyEvent::Change(value) => target.listener.on_change_event(value),
                PropertyEvent::Error { key, code } => target.listener.on_error_event(*key, *code),
            }));

            match result {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(payload) => {
                    let failure = ListenerFailure {
                        handle: target.handle,
                        key: event.key(),
                        message: panic_message(payload.as_ref()),
                    };
                    error!(
                        property = %failure.key,
                        error = %failure.message,
                        "Listener panicked"
                    );
                    self.stats.listener_failures.fetch_add(1, Ordering::Relaxed);
                    let hook = self.failure_hook.read().clone();
                    if let Some(hook) = hook {
                        hook(&failure);
                    }
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "listener panicked".to_string()
    }
}
