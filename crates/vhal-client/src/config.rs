//! Client configuration
//!
//! Configuration is read from TOML. Every field has a default, so an empty
//! file yields a usable client backed by the mock transport.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vhal_core::{AreaId, PropertyId, Value, ValueType};

use crate::error::ConfigError;

/// Configuration for a property client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Deadline for a single get/set, in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// How long a connect attempt may stay in Connecting, in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Automatic reconnection after an unsolicited drop
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,
    /// Declared property types, used to validate writes
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            reconnect: ReconnectConfig::default(),
            transport: TransportConfig::default(),
            properties: Vec::new(),
        }
    }
}

fn default_request_timeout() -> u64 {
    2000
}

fn default_connect_timeout() -> u64 {
    5000
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Declared types keyed by property id. Later entries win.
    pub fn declared_types(&self) -> HashMap<PropertyId, ValueType> {
        self.properties
            .iter()
            .map(|p| (p.id, p.value_type))
            .collect()
    }
}

/// Declared type of one property
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyConfig {
    /// Property identifier (TOML accepts hex, e.g. `0x21400001`)
    pub id: PropertyId,
    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Value type every write must carry
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

// =============================================================================
// Reconnection
// =============================================================================

/// Reconnection policy after the service drops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default)]
    pub enabled: bool,
    /// First retry delay in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Upper bound for the doubling retry delay
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_initial_backoff() -> u64 {
    200
}

fn default_max_backoff() -> u64 {
    5000
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms.max(self.initial_backoff_ms));
        Duration::from_millis(ms)
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// In-memory echo transport
    Mock(MockConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Mock(MockConfig::default())
    }
}

/// Mock transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    /// Simulated reply latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// Report readiness as soon as connect is called
    #[serde(default = "default_true")]
    pub ready_on_connect: bool,
    /// Delay before readiness is reported, in milliseconds
    #[serde(default)]
    pub ready_delay_ms: u64,
    /// Values present in the store at startup
    #[serde(default)]
    pub initial_values: Vec<InitialValue>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            ready_on_connect: default_true(),
            ready_delay_ms: 0,
            initial_values: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Seed value for the mock store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialValue {
    pub id: PropertyId,
    #[serde(default)]
    pub area: AreaId,
    pub value: Value,
}
