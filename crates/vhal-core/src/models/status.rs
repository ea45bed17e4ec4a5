//! Service status codes

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status code reported by the property service
///
/// Codes are passed through verbatim. Unknown codes are preserved and
/// displayed numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(0);
    /// Service is temporarily unable to handle the request
    pub const TRY_AGAIN: StatusCode = StatusCode(1);
    pub const INVALID_ARG: StatusCode = StatusCode(2);
    /// Property exists but currently has no value
    pub const NOT_AVAILABLE: StatusCode = StatusCode(3);
    pub const ACCESS_DENIED: StatusCode = StatusCode(4);
    pub const INTERNAL_ERROR: StatusCode = StatusCode(5);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    fn name(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("OK"),
            1 => Some("TRY_AGAIN"),
            2 => Some("INVALID_ARG"),
            3 => Some("NOT_AVAILABLE"),
            4 => Some("ACCESS_DENIED"),
            5 => Some("INTERNAL_ERROR"),
            _ => None,
        }
    }
}

impl From<i32> for StatusCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "status {}", self.0),
        }
    }
}
