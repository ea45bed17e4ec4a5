//! Event delivery to subscribers
//!
//! Notifications for one property key are delivered in transport order by a
//! dedicated worker task. Keys never wait on each other.

mod dispatcher;

pub use dispatcher::{
    DeliveryStats, DeliveryStatsSnapshot, EventDispatcher, FailureHook, ListenerFailure,
};
