//! Recording session error types

use std::path::PathBuf;
use thiserror::Error;

/// Why a recording session did not complete
///
/// Contention on the single-flight guard is not an error; it is reported as
/// `RecordOutcome { recorded: false, error: None }`.
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("error opening video capture device {device}: {reason:#}")]
    DeviceOpen { device: String, reason: anyhow::Error },

    #[error("error creating output folder {}: {source}", .path.display())]
    OutputFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error opening video writer {}: {reason:#}", .path.display())]
    VideoWriter { path: PathBuf, reason: anyhow::Error },

    #[error("unable to read from capture device, device closed: {device}")]
    DeviceClosed { device: String },

    #[error("recording session faulted: {0}")]
    Fault(String),
}

impl RecordingError {
    /// Short stable code for structured logs
    pub fn code(&self) -> &'static str {
        match self {
            RecordingError::DeviceOpen { .. } => "device_open",
            RecordingError::OutputFolder { .. } => "output_folder",
            RecordingError::VideoWriter { .. } => "video_writer",
            RecordingError::DeviceClosed { .. } => "device_closed",
            RecordingError::Fault(_) => "fault",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RecordingError::DeviceOpen {
            device: "/dev/video9".to_string(),
            reason: anyhow::anyhow!("no such device"),
        };
        assert_eq!(err.to_string(), "error opening video capture device /dev/video9: no such device");
        assert_eq!(err.code(), "device_open");

        let err = RecordingError::OutputFolder {
            path: PathBuf::from("/recordings/x"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().starts_with("error creating output folder /recordings/x"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
