//! Services - business logic and state management
//!
//! - `sensor_registry` - antenna alias to sensor lookup
//! - `trigger` - decides when a tag batch should start a recording
//! - `detector` - configured region detectors and their high-water marks
//! - `recorder` - single-flight recording sessions
//! - `record_worker` - async trigger to recording worker

pub mod detector;
pub mod record_worker;
pub mod recorder;
pub mod sensor_registry;
pub mod trigger;

// Re-export commonly used types
pub use detector::DetectorSet;
pub use record_worker::{create_record_worker, RecordWorker};
pub use recorder::{Providers, RecordOutcome, RecordRequest, SessionCoordinator, SessionState};
pub use sensor_registry::SensorRegistry;
pub use trigger::TriggerClassifier;
