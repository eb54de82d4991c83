//! IO modules - external system interfaces
//!
//! - `mqtt` - MQTT client for tag batches and sensor snapshots
//! - `capture` - capture device seam
//! - `video_writer` - video output seam
//! - `ffmpeg` - ffmpeg subprocess capture and video backends
//! - `artifact` - background still image writes
//! - `detection` - region detection engine seam
//! - `preview` - live preview window seam
//! - `notification` - loss-prevention notifications over HTTP

pub mod artifact;
pub mod capture;
pub mod detection;
pub mod ffmpeg;
pub mod mqtt;
pub mod notification;
pub mod preview;
pub mod video_writer;

// Re-export commonly used types
pub use artifact::{ArtifactWriter, ImageFileWriter, PendingWrites, StillWriter};
pub use capture::{CaptureDevice, CaptureProperty, CaptureProvider};
pub use detection::{Cascade, DetectRequest, DetectionEngine};
pub use ffmpeg::{FfmpegCaptureProvider, FfmpegVideoWriterProvider};
pub use mqtt::{start_mqtt_client, Ingest};
pub use notification::{HttpNotifier, LogNotifier, Notifier};
pub use preview::{PreviewProvider, PreviewWindow, TextLabel};
pub use video_writer::{VideoWriter, VideoWriterProvider};
