//! Subscription registry
//!
//! Subscriptions live in a slot arena. A handle carries the slot index and
//! the slot's generation at insertion time, so a handle to a removed
//! subscription can never reach whatever reuses the slot later.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use vhal_core::{PropertyKey, SampleRate};

use crate::listener::PropertyListener;

/// Opaque reference to a live subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    index: u32,
    generation: u32,
    key: PropertyKey,
}

impl SubscriptionHandle {
    pub fn key(&self) -> PropertyKey {
        self.key
    }
}

/// What the transport must be told after a registry change
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyChange {
    /// Transport registration for the key is still correct
    Unchanged,
    /// Subscribe (or retune) the key at this rate
    Subscribe(SampleRate),
    /// No listeners remain for the key
    Unsubscribe,
}

/// A listener as seen by the dispatcher
#[derive(Clone)]
pub struct ListenerRef {
    pub handle: SubscriptionHandle,
    pub listener: Arc<dyn PropertyListener>,
    live: Arc<AtomicBool>,
}

impl ListenerRef {
    /// False once the subscription was removed
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

struct Entry {
    key: PropertyKey,
    listener: Arc<dyn PropertyListener>,
    rate: SampleRate,
    live: Arc<AtomicBool>,
    /// Session this entry is registered with the transport in
    armed_session: Option<u64>,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_key: HashMap<PropertyKey, Vec<u32>>,
}

impl Arena {
    fn entry(&self, handle: &SubscriptionHandle) -> Option<&Entry> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn effective_rate(&self, key: &PropertyKey) -> Option<SampleRate> {
        let indices = self.by_key.get(key)?;
        indices
            .iter()
            .filter_map(|&i| self.slots[i as usize].entry.as_ref())
            .map(|entry| entry.rate)
            .reduce(SampleRate::max)
    }
}

/// Maps property keys to their live listeners
#[derive(Default)]
pub struct SubscriptionRegistry {
    arena: RwLock<Arena>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription. The returned change says whether the transport
    /// needs a (re)subscribe for the key.
    pub fn insert(
        &self,
        key: PropertyKey,
        listener: Arc<dyn PropertyListener>,
        rate: SampleRate,
    ) -> (SubscriptionHandle, KeyChange) {
        let mut arena = self.arena.write();
        let previous_rate = arena.effective_rate(&key);

        let index = match arena.free.pop() {
            Some(index) => index,
            None => {
                arena.slots.push(Slot::default());
                (arena.slots.len() - 1) as u32
            }
        };

        let slot = &mut arena.slots[index as usize];
        slot.entry = Some(Entry {
            key,
            listener,
            rate,
            live: Arc::new(AtomicBool::new(true)),
            armed_session: None,
        });
        let handle = SubscriptionHandle {
            index,
            generation: slot.generation,
            key,
        };
        arena.by_key.entry(key).or_default().push(index);

        let change = match previous_rate {
            None => KeyChange::Subscribe(rate),
            Some(previous) if rate > previous => KeyChange::Subscribe(rate),
            Some(_) => KeyChange::Unchanged,
        };
        (handle, change)
    }

    /// Remove a subscription
    ///
    /// Returns `None` when the handle is stale (already removed).
    pub fn remove(&self, handle: SubscriptionHandle) -> Option<KeyChange> {
        let mut arena = self.arena.write();
        arena.entry(&handle)?;
        let previous_rate = arena.effective_rate(&handle.key);

        let slot = &mut arena.slots[handle.index as usize];
        let entry = slot.entry.take()?;
        entry.live.store(false, Ordering::Release);
        slot.generation = slot.generation.wrapping_add(1);
        arena.free.push(handle.index);

        let now_empty = match arena.by_key.get_mut(&entry.key) {
            Some(indices) => {
                indices.retain(|&i| i != handle.index);
                indices.is_empty()
            }
            None => true,
        };
        if now_empty {
            arena.by_key.remove(&entry.key);
            return Some(KeyChange::Unsubscribe);
        }

        match (previous_rate, arena.effective_rate(&entry.key)) {
            (Some(before), Some(after)) if after < before => Some(KeyChange::Subscribe(after)),
            _ => Some(KeyChange::Unchanged),
        }
    }

    pub fn is_live(&self, handle: &SubscriptionHandle) -> bool {
        self.arena.read().entry(handle).is_some()
    }

    /// Snapshot of the live listeners for `key`
    pub fn listeners(&self, key: &PropertyKey) -> Vec<ListenerRef> {
        let arena = self.arena.read();
        let Some(indices) = arena.by_key.get(key) else {
            return Vec::new();
        };
        indices
            .iter()
            .filter_map(|&index| {
                let slot = &arena.slots[index as usize];
                slot.entry.as_ref().map(|entry| ListenerRef {
                    handle: SubscriptionHandle {
                        index,
                        generation: slot.generation,
                        key: entry.key,
                    },
                    listener: entry.listener.clone(),
                    live: entry.live.clone(),
                })
            })
            .collect()
    }

    /// Highest rate hint among the listeners of `key`
    pub fn effective_rate(&self, key: &PropertyKey) -> Option<SampleRate> {
        self.arena.read().effective_rate(key)
    }

    /// Every key with listeners and the rate to register it at
    pub fn live_keys(&self) -> Vec<(PropertyKey, SampleRate)> {
        let arena = self.arena.read();
        arena
            .by_key
            .keys()
            .filter_map(|key| arena.effective_rate(key).map(|rate| (*key, rate)))
            .collect()
    }

    /// Record that every subscription of `key` is registered in `session`
    pub fn mark_armed(&self, key: &PropertyKey, session: u64) {
        let mut guard = self.arena.write();
        let arena = &mut *guard;
        if let Some(indices) = arena.by_key.get(key) {
            for &index in indices {
                if let Some(entry) = arena.slots[index as usize].entry.as_mut() {
                    entry.armed_session = Some(session);
                }
            }
        }
    }

    /// Record that one subscription is registered in `session`
    pub fn mark_handle_armed(&self, handle: &SubscriptionHandle, session: u64) -> bool {
        let mut arena = self.arena.write();
        match arena.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation => match slot.entry.as_mut() {
                Some(entry) => {
                    entry.armed_session = Some(session);
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Whether any subscription of `key` is registered in `session`
    pub fn is_key_armed(&self, key: &PropertyKey, session: u64) -> bool {
        let arena = self.arena.read();
        arena.by_key.get(key).is_some_and(|indices| {
            indices.iter().any(|&index| {
                arena.slots[index as usize]
                    .entry
                    .as_ref()
                    .is_some_and(|entry| entry.armed_session == Some(session))
            })
        })
    }

    /// Forget transport registration for every subscription
    pub fn disarm_all(&self) {
        let mut arena = self.arena.write();
        for entry in arena.slots.iter_mut().filter_map(|s| s.entry.as_mut()) {
            entry.armed_session = None;
        }
    }

    /// Session a subscription is registered in, if any
    pub fn armed_session(&self, handle: &SubscriptionHandle) -> Option<u64> {
        self.arena.read().entry(handle)?.armed_session
    }

    /// Remove everything. Returns the keys that had listeners.
    pub fn clear(&self) -> Vec<PropertyKey> {
        let mut arena = self.arena.write();
        let keys: Vec<PropertyKey> = arena.by_key.keys().copied().collect();
        for slot in arena.slots.iter_mut() {
            if let Some(entry) = slot.entry.take() {
                entry.live.store(false, Ordering::Release);
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        let count = arena.slots.len() as u32;
        arena.free = (0..count).rev().collect();
        arena.by_key.clear();
        keys
    }

    pub fn len(&self) -> usize {
        let arena = self.arena.read();
        arena.by_key.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.read().by_key.is_empty()
    }

    pub fn keys(&self) -> Vec<PropertyKey> {
        self.arena.read().by_key.keys().copied().collect()
    }
}
