//! Live preview composition
//!
//! Overlays are drawn on a copy of the full resolution frame, so nothing
//! drawn here reaches the video file or the saved stills.

use super::stats::SessionStats;
use crate::domain::frame::{Color, Frame, Rect};
use crate::io::preview::TextLabel;
use crate::services::detector::DrawStyle;

const TEXT_PADDING: u32 = 5;
const LINE_HEIGHT: u32 = 35;
const MIN_MAX_COLUMN_X: u32 = 230;
const AVERAGE_COLUMN_X: u32 = 480;
const LABEL_OFFSET_Y: u32 = 10;
const STATS_COLOR: Color = Color::GREEN;

/// A detected region and how to draw it
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub rect: Rect,
    pub style: DrawStyle,
}

/// Draw `overlays` on a copy of `frame`, returning it with the text labels
/// the preview window should render
pub fn compose(frame: &Frame, overlays: &[Overlay], stats: Option<&SessionStats>) -> (Frame, Vec<TextLabel>) {
    let mut canvas = frame.clone();
    let mut labels = stats.map(stats_labels).unwrap_or_default();

    for overlay in overlays {
        let rect = overlay.rect;
        let style = &overlay.style;
        if style.render_as_circle {
            let radius = rect.width / 2;
            let cx = rect.right().saturating_sub(radius);
            let cy = rect.bottom().saturating_sub(radius);
            canvas.draw_circle(cx, cy, radius, style.color, style.thickness);
        } else {
            canvas.draw_rect(rect, style.color, style.thickness);
        }
        if !style.annotation.is_empty() {
            labels.push(TextLabel::new(
                style.annotation.clone(),
                rect.x,
                rect.y.saturating_sub(LABEL_OFFSET_Y),
                style.color,
            ));
        }
    }

    (canvas, labels)
}

fn stats_labels(stats: &SessionStats) -> Vec<TextLabel> {
    let line = |n: u32| LINE_HEIGHT * n;
    let label = |text: String, x: u32, n: u32| TextLabel::new(text, x, line(n), STATS_COLOR);
    let (read, process, interval) = (&stats.read, &stats.process, &stats.interval);

    vec![
        label(format!("   Read: {}", read.current() as i64), TEXT_PADDING, 1),
        label(format!("Process: {}", process.current() as i64), TEXT_PADDING, 2),
        label(format!("    FPS: {:.1}", interval.fps()), TEXT_PADDING, 3),
        label(format!("   Min Read: {}", read.min() as i64), MIN_MAX_COLUMN_X, 1),
        label(format!("   Max Read: {}", read.max() as i64), MIN_MAX_COLUMN_X, 2),
        label(format!("Min Process: {}", process.min() as i64), MIN_MAX_COLUMN_X, 3),
        label(format!("Max Process: {}", process.max() as i64), MIN_MAX_COLUMN_X, 4),
        label(format!("   Avg Read: {:.1}", read.average()), AVERAGE_COLUMN_X, 1),
        label(format!("Avg Process: {:.1}", process.average()), AVERAGE_COLUMN_X, 2),
        label(format!("    Avg FPS: {:.1}", interval.average_fps()), AVERAGE_COLUMN_X, 3),
    ]
}
