//! Connection lifecycle for the property service
//!
//! The connection state machine is the single source of truth for whether
//! property operations may be attempted.
//!
//! ```text
//!                connect()             ready
//! Disconnected ───────────▶ Connecting ───────▶ Ready
//!      ▲                        │                 │
//!      └──── lost / timeout ────┴─────────────────┘
//!      └──────────────── disconnect() ────────────┘
//! ```

mod machine;

pub use machine::{ConnectionMachine, ConnectionStatus, LifecycleEvent};

use std::fmt;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
        };
        f.write_str(s)
    }
}
