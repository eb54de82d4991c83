//! Capture device seam
//!
//! The recorder drives a device through `CaptureDevice` and never sees the
//! backend. `configure_device` applies the configured properties in the order
//! devices tolerate: pixel format first, then geometry and rate.

use crate::domain::frame::Frame;
use crate::infra::config::RecordingConfig;
use tracing::{debug, warn};

/// A property that can be requested from a capture device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CaptureProperty {
    /// Packed four character code, see [`fourcc`]
    FourCc(u32),
    Width(u32),
    Height(u32),
    Fps(f64),
    BufferSize(u32),
}

/// An opened capture device, exclusively owned by one session
pub trait CaptureDevice: Send {
    /// Request a property. Backends may ignore what they do not support.
    fn set(&mut self, property: CaptureProperty) -> anyhow::Result<()>;

    /// Begin streaming with the properties set so far. Returns once the
    /// device has produced a frame; an error means it never will.
    fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Grab and discard up to `count` buffered frames
    fn grab(&mut self, count: u32) -> anyhow::Result<()>;

    /// Read the next frame into `frame`. An empty frame is a valid result.
    fn read_into(&mut self, frame: &mut Frame) -> anyhow::Result<()>;

    fn is_opened(&self) -> bool;

    fn close(&mut self) -> anyhow::Result<()>;
}

/// Opens capture devices by reference (a path such as `/dev/video0`)
pub trait CaptureProvider: Send + Sync {
    fn open(&self, device: &str) -> anyhow::Result<Box<dyn CaptureDevice>>;
}

/// Pack a four character code little-endian, the way V4L2 and most codecs
/// expect it. None unless `code` is exactly four ASCII characters.
pub fn fourcc(code: &str) -> Option<u32> {
    let bytes = code.as_bytes();
    if bytes.len() != 4 || !code.is_ascii() {
        return None;
    }
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Inverse of [`fourcc`]
pub fn fourcc_to_string(value: u32) -> String {
    value.to_le_bytes().iter().map(|&b| b as char).collect()
}

/// Properties to apply for a recording, pixel format first
///
/// Zero or empty values are left at the device default.
pub fn capture_properties(recording: &RecordingConfig) -> Vec<CaptureProperty> {
    let mut properties = Vec::with_capacity(5);

    if !recording.capture_fourcc.is_empty() {
        match fourcc(&recording.capture_fourcc) {
            Some(code) => properties.push(CaptureProperty::FourCc(code)),
            None => warn!(fourcc = %recording.capture_fourcc, "capture_fourcc_invalid"),
        }
    }
    if recording.width > 0 {
        properties.push(CaptureProperty::Width(recording.width));
    }
    if recording.height > 0 {
        properties.push(CaptureProperty::Height(recording.height));
    }
    if recording.fps > 0.0 {
        properties.push(CaptureProperty::Fps(recording.fps));
    }
    if recording.capture_buffer_size > 0 {
        properties.push(CaptureProperty::BufferSize(recording.capture_buffer_size));
    }

    properties
}

/// Apply properties in order. A rejected property is logged and skipped.
pub fn configure_device(device: &mut dyn CaptureDevice, properties: &[CaptureProperty]) {
    for property in properties {
        match device.set(*property) {
            Ok(()) => debug!(property = ?property, "capture_property_set"),
            Err(e) => warn!(property = ?property, error = %e, "capture_property_rejected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::Config;

    #[test]
    fn test_fourcc_packing() {
        let mjpg = fourcc("MJPG").unwrap();
        assert_eq!(mjpg, 0x47504a4d);
        assert_eq!(fourcc_to_string(mjpg), "MJPG");
        assert!(fourcc("MJP").is_none());
        assert!(fourcc("MJPEG").is_none());
    }

    #[test]
    fn test_properties_fourcc_first() {
        let recording = Config::default().recording().clone();
        let properties = capture_properties(&recording);
        assert_eq!(properties[0], CaptureProperty::FourCc(fourcc("MJPG").unwrap()));
        assert_eq!(properties[1], CaptureProperty::Width(1280));
        assert_eq!(properties[2], CaptureProperty::Height(720));
        assert_eq!(properties[3], CaptureProperty::Fps(15.0));
        assert_eq!(properties[4], CaptureProperty::BufferSize(3));
    }

    #[test]
    fn test_zero_values_skipped() {
        let mut recording = Config::default().recording().clone();
        recording.capture_fourcc.clear();
        recording.width = 0;
        recording.capture_buffer_size = 0;
        let properties = capture_properties(&recording);
        assert_eq!(properties, vec![CaptureProperty::Height(720), CaptureProperty::Fps(15.0)]);
    }
}
