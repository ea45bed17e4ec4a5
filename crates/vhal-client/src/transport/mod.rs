//! Transport implementations
//!
//! The client only depends on [`vhal_core::PropertyTransport`]. This module
//! holds the implementations that ship with it:
//! - Mock transport backed by an in-memory store, for tests and the demo
//!
//! # Example
//!
//! ```ignore
//! use vhal_client::config::TransportConfig;
//! use vhal_client::transport::create_transport;
//!
//! let transport = create_transport(&TransportConfig::default());
//! let client = PropertyClient::new(config, transport);
//! ```

pub mod mock;

pub use mock::{MockTransport, TransportCall};

use std::sync::Arc;

use vhal_core::PropertyTransport;

use crate::config::TransportConfig;

/// Create a transport based on configuration
pub fn create_transport(config: &TransportConfig) -> Arc<dyn PropertyTransport> {
    match config {
        TransportConfig::Mock(cfg) => Arc::new(MockTransport::new(cfg)),
    }
}
