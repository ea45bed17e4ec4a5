//! Data models shared by transports and clients

mod property;
mod status;
mod value;

pub use property::{AreaId, PropertyId, PropertyKey, SampleRate};
pub use status::StatusCode;
pub use value::{PropertyStatus, PropertyValue, Value, ValueType};
