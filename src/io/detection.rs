//! Detection engine seam
//!
//! The engine's detection algorithm is external. The recorder only loads
//! cascade definitions, asks for regions on a frame and releases handles.

use crate::domain::frame::{Frame, Rect};
use std::path::Path;

/// Arguments for one detection call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectRequest {
    pub scale_factor: f64,
    pub min_neighbors: u32,
    pub flags: u32,
    /// Minimum and maximum window as `(width, height)` pairs, in pixels of the
    /// frame passed to `detect`. None leaves window bounds to the engine.
    pub window: Option<((u32, u32), (u32, u32))>,
}

/// A loaded cascade
pub trait Cascade: Send {
    /// Regions found on `frame`, in that frame's coordinates
    fn detect(&mut self, frame: &Frame, request: &DetectRequest) -> Vec<Rect>;

    fn release(&mut self) -> anyhow::Result<()>;
}

pub trait DetectionEngine: Send + Sync {
    fn load(&self, source_file: &Path) -> anyhow::Result<Box<dyn Cascade>>;
}
