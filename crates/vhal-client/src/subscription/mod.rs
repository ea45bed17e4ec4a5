//! Subscription management
//!
//! Tracks which listeners want which property keys and what the transport
//! must be told when that set changes.

mod registry;

pub use registry::{KeyChange, ListenerRef, SubscriptionHandle, SubscriptionRegistry};
