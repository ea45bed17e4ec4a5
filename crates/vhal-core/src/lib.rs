//! vhal-core - Core types and transport trait for vehicle property clients
//!
//! This crate provides the data model (property keys, values, status codes)
//! and the [`PropertyTransport`] abstraction that connects a client to an
//! out-of-process vehicle property service.

pub mod error;
pub mod models;
pub mod transport;

pub use error::TransportError;
pub use models::*;
pub use transport::{
    EventSink, PropertyTransport, ReplyResult, RequestId, SessionEvent, TransportEvent,
};
