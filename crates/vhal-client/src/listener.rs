//! Subscriber callbacks

use tokio::sync::mpsc;
use vhal_core::{PropertyKey, PropertyValue, StatusCode};

/// Event delivered to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyEvent {
    /// The property changed
    Change(PropertyValue),
    /// The service reported an error for the property
    Error { key: PropertyKey, code: StatusCode },
}

impl PropertyEvent {
    pub fn key(&self) -> PropertyKey {
        match self {
            PropertyEvent::Change(value) => value.key(),
            PropertyEvent::Error { key, .. } => *key,
        }
    }
}

/// Receives change and error events for one subscription
///
/// Calls for the same key never overlap. A panicking listener is isolated;
/// other listeners still get the event.
pub trait PropertyListener: Send + Sync {
    fn on_change_event(&self, value: &PropertyValue);

    fn on_error_event(&self, key: PropertyKey, code: StatusCode) {
        let _ = (key, code);
    }
}

impl<F> PropertyListener for F
where
    F: Fn(&PropertyEvent) + Send + Sync,
{
    fn on_change_event(&self, value: &PropertyValue) {
        self(&PropertyEvent::Change(value.clone()))
    }

    fn on_error_event(&self, key: PropertyKey, code: StatusCode) {
        self(&PropertyEvent::Error { key, code })
    }
}

/// Listener that forwards events into a channel
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<PropertyEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PropertyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PropertyListener for ChannelListener {
    fn on_change_event(&self, value: &PropertyValue) {
        // Receiver dropped means the caller stopped caring
        let _ = self.tx.send(PropertyEvent::Change(value.clone()));
    }

    fn on_error_event(&self, key: PropertyKey, code: StatusCode) {
        let _ = self.tx.send(PropertyEvent::Error { key, code });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_closure_listener() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listener = {
            let seen = seen.clone();
            move |event: &PropertyEvent| seen.lock().push(event.clone())
        };

        let key = PropertyKey::global(1);
        listener.on_change_event(&PropertyValue::new(key, 3));
        listener.on_error_event(key, StatusCode::INTERNAL_ERROR);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], PropertyEvent::Change(_)));
        assert_eq!(
            seen[1],
            PropertyEvent::Error {
                key,
                code: StatusCode::INTERNAL_ERROR
            }
        );
    }

    #[test]
    fn test_channel_listener() {
        let (listener, mut rx) = ChannelListener::new();
        let key = PropertyKey::global(1);
        listener.on_change_event(&PropertyValue::new(key, 9));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.key(), key);
    }
}
