//! Video frame buffers and region geometry
//!
//! `Frame` owns its pixels. Cloning a frame is a deep copy, which is what the
//! recorder relies on when it hands a frame to a background writer.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Axis-aligned region in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    #[inline]
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Multiply every coordinate by `factor`, mapping a region found on a
    /// downscaled buffer back onto the full resolution frame
    pub fn scaled(&self, factor: u32) -> Rect {
        Rect {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    /// Intersect with a `width` x `height` frame. None when nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let right = self.right().min(width);
        let bottom = self.bottom().min(height);
        if right <= x || bottom <= y {
            return None;
        }
        Some(Rect { x, y, width: right - x, height: bottom - y })
    }
}

/// RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const RED: Color = Color::new(255, 0, 0);
    pub const GREEN: Color = Color::new(0, 255, 0);
    pub const BLUE: Color = Color::new(0, 0, 255);
    pub const WHITE: Color = Color::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Decode a packed `0xRRGGBB` value
    pub const fn from_rgb_u32(value: u32) -> Self {
        Self {
            r: ((value >> 16) & 0xff) as u8,
            g: ((value >> 8) & 0xff) as u8,
            b: (value & 0xff) as u8,
        }
    }

    fn pixel(&self) -> Rgb<u8> {
        Rgb([self.r, self.g, self.b])
    }
}

/// An owned RGB frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Black frame of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self { image: RgbImage::new(width, height) }
    }

    /// Zero-sized frame, what an empty device read produces
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    /// Wrap packed rgb24 bytes. None if the length does not match.
    pub fn from_rgb24(width: u32, height: u32, bytes: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(width, height, bytes).map(Self::from_image)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn fill(&mut self, color: Color) {
        for pixel in self.image.pixels_mut() {
            *pixel = color.pixel();
        }
    }

    pub fn fill_rect(&mut self, rect: Rect, color: Color) {
        let Some(rect) = rect.clamp_to(self.width(), self.height()) else {
            return;
        };
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                self.image.put_pixel(x, y, color.pixel());
            }
        }
    }

    /// Linear downscale by an integer factor on both axes
    pub fn downscale(&self, factor: u32) -> Frame {
        let factor = factor.max(1);
        if factor == 1 || self.is_empty() {
            return self.clone();
        }
        let width = (self.width() / factor).max(1);
        let height = (self.height() / factor).max(1);
        Frame { image: imageops::resize(&self.image, width, height, FilterType::Triangle) }
    }

    /// Resize to `height`, keeping the aspect ratio
    pub fn resize_to_height(&self, height: u32) -> Frame {
        if self.is_empty() || height == 0 {
            return Frame::empty();
        }
        let width = (height as f64 * self.width() as f64 / self.height() as f64).round() as u32;
        Frame { image: imageops::resize(&self.image, width.max(1), height, FilterType::Triangle) }
    }

    /// Copy of a region, clamped to the frame bounds
    pub fn crop(&self, rect: Rect) -> Option<Frame> {
        let rect = rect.clamp_to(self.width(), self.height())?;
        let region = imageops::crop_imm(&self.image, rect.x, rect.y, rect.width, rect.height);
        Some(Frame { image: region.to_image() })
    }

    /// Rectangle outline, growing inward with `thickness`
    pub fn draw_rect(&mut self, rect: Rect, color: Color, thickness: u32) {
        let Some(rect) = rect.clamp_to(self.width(), self.height()) else {
            return;
        };
        let t = thickness.max(1).min(rect.width).min(rect.height);
        self.fill_rect(Rect::new(rect.x, rect.y, rect.width, t), color);
        self.fill_rect(Rect::new(rect.x, rect.bottom() - t, rect.width, t), color);
        self.fill_rect(Rect::new(rect.x, rect.y, t, rect.height), color);
        self.fill_rect(Rect::new(rect.right() - t, rect.y, t, rect.height), color);
    }

    /// Circle outline centered on `(cx, cy)`
    pub fn draw_circle(&mut self, cx: u32, cy: u32, radius: u32, color: Color, thickness: u32) {
        if self.is_empty() {
            return;
        }
        let half = thickness.max(1) as f64 / 2.0;
        let r = radius as f64;
        let reach = radius + thickness.max(1);
        let x0 = cx.saturating_sub(reach);
        let y0 = cy.saturating_sub(reach);
        let x1 = (cx + reach).min(self.width() - 1);
        let y1 = (cy + reach).min(self.height() - 1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let dx = x as f64 - cx as f64;
                let dy = y as f64 - cy as f64;
                let distance = (dx * dx + dy * dy).sqrt();
                if (distance - r).abs() <= half {
                    self.image.put_pixel(x, y, color.pixel());
                }
            }
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        self.image.get_pixel_checked(x, y).map(|p| Color::new(p[0], p[1], p[2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_scaled_and_clamped() {
        let rect = Rect::new(10, 20, 30, 40).scaled(2);
        assert_eq!(rect, Rect::new(20, 40, 60, 80));
        assert_eq!(rect.clamp_to(50, 100), Some(Rect::new(20, 40, 30, 60)));
        assert_eq!(rect.clamp_to(10, 10), None);
    }

    #[test]
    fn test_color_from_packed() {
        assert_eq!(Color::from_rgb_u32(0xff8000), Color::new(255, 128, 0));
        assert_eq!(Color::from_rgb_u32(0x00ff00), Color::GREEN);
    }

    #[test]
    fn test_empty_frame() {
        assert!(Frame::empty().is_empty());
        assert!(!Frame::new(2, 2).is_empty());
        assert!(Frame::from_rgb24(2, 2, vec![0; 11]).is_none());
        assert!(Frame::from_rgb24(2, 2, vec![0; 12]).is_some());
    }

    #[test]
    fn test_downscale_dimensions() {
        let frame = Frame::new(640, 480);
        let small = frame.downscale(4);
        assert_eq!((small.width(), small.height()), (160, 120));
        assert_eq!(frame.downscale(1), frame);
    }

    #[test]
    fn test_resize_to_height_keeps_aspect() {
        let thumb = Frame::new(1280, 720).resize_to_height(150);
        assert_eq!(thumb.height(), 150);
        assert_eq!(thumb.width(), 267);
    }

    #[test]
    fn test_crop_is_independent_copy() {
        let mut frame = Frame::new(100, 100);
        frame.fill_rect(Rect::new(10, 10, 20, 20), Color::WHITE);

        let crop = frame.crop(Rect::new(10, 10, 20, 20)).unwrap();
        assert_eq!((crop.width(), crop.height()), (20, 20));

        frame.fill(Color::RED);
        assert_eq!(crop.pixel(0, 0), Some(Color::WHITE));
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let frame = Frame::new(100, 50);
        let crop = frame.crop(Rect::new(90, 40, 50, 50)).unwrap();
        assert_eq!((crop.width(), crop.height()), (10, 10));
        assert!(frame.crop(Rect::new(200, 200, 5, 5)).is_none());
    }

    #[test]
    fn test_draw_rect_outline() {
        let mut frame = Frame::new(50, 50);
        frame.draw_rect(Rect::new(10, 10, 20, 20), Color::GREEN, 2);
        assert_eq!(frame.pixel(10, 10), Some(Color::GREEN));
        assert_eq!(frame.pixel(29, 29), Some(Color::GREEN));
        assert_eq!(frame.pixel(20, 20), Some(Color::default()));
    }

    #[test]
    fn test_draw_circle_outline() {
        let mut frame = Frame::new(50, 50);
        frame.draw_circle(25, 25, 10, Color::BLUE, 1);
        assert_eq!(frame.pixel(35, 25), Some(Color::BLUE));
        assert_eq!(frame.pixel(25, 25), Some(Color::default()));
    }
}
