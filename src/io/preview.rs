//! Live preview seam

use crate::domain::frame::{Color, Frame};

/// Text drawn on the preview at a pixel position
#[derive(Debug, Clone, PartialEq)]
pub struct TextLabel {
    pub text: String,
    pub x: u32,
    pub y: u32,
    pub color: Color,
}

impl TextLabel {
    pub fn new(text: impl Into<String>, x: u32, y: u32, color: Color) -> Self {
        Self { text: text.into(), x, y, color }
    }
}

pub trait PreviewWindow: Send {
    fn show(&mut self, frame: &Frame, labels: &[TextLabel]) -> anyhow::Result<()>;

    /// Poll for a key press for at most `millis`
    fn wait_key(&mut self, millis: u32) -> Option<i32>;

    fn close(&mut self) -> anyhow::Result<()>;
}

pub trait PreviewProvider: Send + Sync {
    fn open(&self, title: &str, fullscreen: bool) -> anyhow::Result<Box<dyn PreviewWindow>>;
}

/// Escape, `q` or `Q`
pub fn is_cancel_key(key: i32) -> bool {
    key == 27 || key == 'q' as i32 || key == 'Q' as i32
}
