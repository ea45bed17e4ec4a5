//! Property and area identifiers

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque 32-bit property identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub i32);

impl PropertyId {
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub const fn value(self) -> i32 {
        self.0
    }
}

impl From<i32> for PropertyId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Opaque 32-bit area (zone) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AreaId(pub i32);

impl AreaId {
    /// Whole-vehicle scope, no zone subdivision
    pub const GLOBAL: AreaId = AreaId(0);

    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub const fn value(self) -> i32 {
        self.0
    }

    pub fn is_global(self) -> bool {
        self == Self::GLOBAL
    }
}

impl Default for AreaId {
    fn default() -> Self {
        Self::GLOBAL
    }
}

impl From<i32> for AreaId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            f.write_str("global")
        } else {
            write!(f, "0x{:08X}", self.0)
        }
    }
}

/// A property scoped to one area
///
/// Keys are the unit of addressing for reads, writes and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyKey {
    pub property_id: PropertyId,
    pub area_id: AreaId,
}

impl PropertyKey {
    pub fn new(property_id: impl Into<PropertyId>, area_id: impl Into<AreaId>) -> Self {
        Self {
            property_id: property_id.into(),
            area_id: area_id.into(),
        }
    }

    /// Key for a property in the global area
    pub fn global(property_id: impl Into<PropertyId>) -> Self {
        Self::new(property_id, AreaId::GLOBAL)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.property_id, self.area_id)
    }
}

/// Sampling-rate hint in Hz
///
/// Zero means on-change delivery. The service is free to deliver at a
/// different rate; the hint only expresses what the subscriber wants.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleRate(pub f32);

impl SampleRate {
    pub const ON_CHANGE: SampleRate = SampleRate(0.0);
    pub const NORMAL: SampleRate = SampleRate(1.0);
    pub const UI: SampleRate = SampleRate(5.0);
    pub const FAST: SampleRate = SampleRate(10.0);
    pub const FASTEST: SampleRate = SampleRate(100.0);

    pub fn hz(self) -> f32 {
        self.0
    }

    /// The higher of two rates; NaN loses against any real rate
    pub fn max(self, other: SampleRate) -> SampleRate {
        if other.0 > self.0 || self.0.is_nan() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz", self.0)
    }
}
