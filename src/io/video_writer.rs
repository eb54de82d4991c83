//! Video writer seam

use crate::domain::frame::Frame;
use std::path::Path;

/// An open output video stream
pub trait VideoWriter: Send {
    fn append(&mut self, frame: &Frame) -> anyhow::Result<()>;

    /// Finish the stream. The file is complete only after this returns.
    fn close(&mut self) -> anyhow::Result<()>;
}

pub trait VideoWriterProvider: Send + Sync {
    fn open(
        &self,
        path: &Path,
        codec: &str,
        fps: f64,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Box<dyn VideoWriter>>;
}
