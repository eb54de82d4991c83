//! Domain models - core business types
//!
//! - `sensor` - RFID readers, their roles and antenna aliases
//! - `tag` - tag movement events and the recording trigger they produce
//! - `frame` - owned video frames and region geometry

pub mod frame;
pub mod sensor;
pub mod tag;

use std::time::{SystemTime, UNIX_EPOCH};

pub use frame::{Color, Frame, Rect};
pub use sensor::{Personality, Sensor};
pub use tag::{DataPayload, LocationEntry, RecordTrigger, TagMovementEvent};

/// Current time as epoch milliseconds
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
