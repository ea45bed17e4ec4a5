//! vhal-client - Client core for an out-of-process vehicle property service
//!
//! Owns connection lifecycle, request/reply correlation, subscription
//! bookkeeping and ordered event delivery on top of a
//! [`vhal_core::PropertyTransport`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PropertyClient                         │
//! │        get / set / subscribe / unsubscribe / connect        │
//! │                                                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ Connection   │  │ Pending      │  │ Subscription     │  │
//! │  │ Machine      │  │ Requests     │  │ Registry         │  │
//! │  │ (state, gen) │  │ (req ids)    │  │ (arena, by key)  │  │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘  │
//! │          ▲                ▲                   │             │
//! │          │      delivery task (per session)   ▼             │
//! │          └────────────────┴──────────  EventDispatcher      │
//! │                           ▲           (worker per key)      │
//! │                  ┌────────┴─────────┐                       │
//! │                  │PropertyTransport │                       │
//! │                  │  (mock / IPC)    │                       │
//! │                  └──────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use vhal_client::{ClientConfig, PropertyClient, PropertyKey};
//!
//! let client = PropertyClient::from_config(ClientConfig::default());
//! client.connect().await?;
//! client.wait_ready(Duration::from_secs(5)).await?;
//!
//! let key = PropertyKey::global(0x2140_0001);
//! let value = client.get_i32(key).await?;
//! client.set_i32(key, value + 1).await?;
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod pending;
pub mod subscription;
pub mod transport;

pub use client::PropertyClient;
pub use config::{ClientConfig, MockConfig, PropertyConfig, ReconnectConfig, TransportConfig};
pub use connection::{ConnectionState, ConnectionStatus, LifecycleEvent};
pub use dispatch::{DeliveryStatsSnapshot, FailureHook, ListenerFailure};
pub use error::{ClientError, ClientResult, ConfigError};
pub use listener::{ChannelListener, PropertyEvent, PropertyListener};
pub use subscription::{KeyChange, SubscriptionHandle};
pub use transport::{create_transport, MockTransport, TransportCall};

// Re-export for convenience
pub use vhal_core::{
    AreaId, PropertyId, PropertyKey, PropertyStatus, PropertyTransport, PropertyValue,
    SampleRate, StatusCode, Value, ValueType,
};
