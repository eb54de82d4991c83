//! Infrastructure - configuration, metrics, and errors
//!
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `error` - Recording session error taxonomy

pub mod config;
pub mod error;
pub mod metrics;

pub use config::{Config, DetectParams, DetectorSettings, RecordingConfig, TagFilter};
pub use error::RecordingError;
pub use metrics::Metrics;
