//! One recording session: open, frame loop, close
//!
//! A session owns every resource it opens. Release happens once, resource by
//! resource, each step isolated so an error or panic in one release is logged
//! and the rest still run. `Drop` performs the same release if the session is
//! abandoned by an early return or a panic.

use super::overlay::{self, Overlay};
use super::stats::SessionStats;
use super::{RecordRequest, SessionContext, SessionState};
use crate::domain::frame::Frame;
use crate::infra::error::RecordingError;
use crate::io::capture::{capture_properties, configure_device, CaptureDevice};
use crate::io::preview::{is_cancel_key, PreviewWindow};
use crate::io::video_writer::VideoWriter;
use crate::services::detector::ActiveDetector;
use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const FIRST_FRAME: &str = "frame.first.jpg";
const MIDDLE_FRAME: &str = "frame.middle.jpg";
const LAST_FRAME: &str = "frame.last.jpg";
const THUMBNAIL: &str = "thumb.jpg";
const PREVIEW_TITLE: &str = "Loss Prevention";

/// Number of loop iterations for a clip of `seconds` at `fps`
pub fn frame_count(fps: f64, seconds: f64) -> usize {
    let frames = (fps * seconds).round();
    if frames.is_finite() && frames > 0.0 {
        frames as usize
    } else {
        0
    }
}

/// Still to save at iteration `i`. The first matching slot wins when the
/// clip is too short for all three to be distinct.
pub fn keyframe_name(i: usize, frame_count: usize) -> Option<&'static str> {
    if i == 0 {
        Some(FIRST_FRAME)
    } else if i == frame_count / 2 {
        Some(MIDDLE_FRAME)
    } else if i + 1 == frame_count {
        Some(LAST_FRAME)
    } else {
        None
    }
}

/// Counters reported when a session finishes its frame budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub iterations: usize,
    pub frames_read: usize,
    pub frames_skipped: usize,
}

pub(crate) struct RecordingSession<'a> {
    ctx: &'a SessionContext,
    device_ref: String,
    output_folder: PathBuf,
    device: Option<Box<dyn CaptureDevice>>,
    writer: Option<Box<dyn VideoWriter>>,
    detectors: Vec<ActiveDetector>,
    preview: Option<Box<dyn PreviewWindow>>,
    frame: Frame,
    working: Frame,
    overlays: Vec<Overlay>,
    stats: SessionStats,
    released: bool,
}

impl<'a> RecordingSession<'a> {
    /// Acquire every resource in order. On failure, whatever was acquired is
    /// released before the error is returned.
    pub(crate) fn open(ctx: &'a SessionContext, request: &RecordRequest) -> Result<Self, RecordingError> {
        let mut session = RecordingSession {
            ctx,
            device_ref: request.video_device.clone(),
            output_folder: request.output_folder.clone(),
            device: None,
            writer: None,
            detectors: Vec::new(),
            preview: None,
            frame: Frame::empty(),
            working: Frame::empty(),
            overlays: Vec::new(),
            stats: SessionStats::default(),
            released: false,
        };

        match session.acquire(request) {
            Ok(()) => Ok(session),
            Err(e) => {
                error!(device = %session.device_ref, code = %e.code(), error = %e, "recording_open_failed");
                session.release_all();
                Err(e)
            }
        }
    }

    fn acquire(&mut self, request: &RecordRequest) -> Result<(), RecordingError> {
        let ctx = self.ctx;
        let recording = &ctx.recording;
        debug!(device = %self.device_ref, folder = %self.output_folder.display(), "recording_opening");

        let mut device = ctx
            .providers
            .capture
            .open(&self.device_ref)
            .map_err(|reason| RecordingError::DeviceOpen { device: self.device_ref.clone(), reason })?;
        if !device.is_opened() {
            self.device = Some(device);
            return Err(RecordingError::DeviceOpen {
                device: self.device_ref.clone(),
                reason: anyhow::anyhow!("device did not open"),
            });
        }

        configure_device(device.as_mut(), &capture_properties(recording));
        self.device = Some(device);

        self.detectors = ctx.detectors.load(ctx.providers.detection.as_deref());

        if let Some(device) = self.device.as_mut() {
            device
                .start()
                .map_err(|reason| RecordingError::DeviceOpen { device: self.device_ref.clone(), reason })?;

            // the first buffered frames are stale and slow to read
            if recording.capture_buffer_size > 0 {
                if let Err(e) = device.grab(recording.capture_buffer_size) {
                    if !device.is_opened() {
                        return Err(RecordingError::DeviceOpen { device: self.device_ref.clone(), reason: e });
                    }
                    warn!(device = %self.device_ref, error = %e, "capture_grab_failed");
                }
            }
        }

        fs::create_dir_all(&self.output_folder).map_err(|source| RecordingError::OutputFolder {
            path: self.output_folder.clone(),
            source,
        })?;

        let video_path = self.output_folder.join(&ctx.video_file_name);
        let writer = ctx
            .providers
            .video
            .open(&video_path, &recording.output_codec, recording.fps, recording.width, recording.height)
            .map_err(|reason| RecordingError::VideoWriter { path: video_path.clone(), reason })?;
        self.writer = Some(writer);

        if request.live_view {
            self.open_preview();
        }

        info!(
            device = %self.device_ref,
            folder = %self.output_folder.display(),
            detectors = %self.detectors.len(),
            live_view = %self.preview.is_some(),
            "recording_opened"
        );
        Ok(())
    }

    fn open_preview(&mut self) {
        let Some(provider) = self.ctx.providers.preview.as_ref() else {
            warn!("live_view_unavailable");
            return;
        };
        match provider.open(PREVIEW_TITLE, self.ctx.recording.fullscreen_view) {
            Ok(window) => self.preview = Some(window),
            Err(e) => warn!(error = %e, "live_view_open_failed"),
        }
    }

    /// Run exactly `frame_count(fps, seconds)` iterations
    pub(crate) fn run(&mut self, seconds: f64) -> Result<SessionSummary, RecordingError> {
        let ctx = self.ctx;
        let recording = &ctx.recording;
        let total = frame_count(recording.fps, seconds);
        let scale = recording.image_process_scale.max(1);
        let mut summary = SessionSummary::default();

        self.ctx.set_state(SessionState::Recording);

        for i in 0..total {
            summary.iterations += 1;

            let started = Instant::now();
            let read = match self.device.as_mut() {
                Some(device) => device.read_into(&mut self.frame),
                None => Err(anyhow::anyhow!("capture device released")),
            };
            let read_at = Instant::now();

            if let Err(e) = read {
                if !self.device.as_ref().is_some_and(|d| d.is_opened()) {
                    return Err(RecordingError::DeviceClosed { device: self.device_ref.clone() });
                }
                debug!(iteration = %i, error = %e, "frame_read_failed");
                self.ctx.metrics.record_frame_skipped();
                summary.frames_skipped += 1;
                continue;
            }
            if self.frame.is_empty() {
                debug!(iteration = %i, "frame_empty_skipped");
                self.ctx.metrics.record_frame_skipped();
                summary.frames_skipped += 1;
                continue;
            }
            self.ctx.metrics.record_frame_read(millis(read_at - started));
            summary.frames_read += 1;

            if let Some(writer) = self.writer.as_mut() {
                if let Err(e) = writer.append(&self.frame) {
                    self.ctx.metrics.record_video_append_failure();
                    warn!(iteration = %i, error = %e, "video_append_failed");
                }
            }

            self.write_keyframe(i, total);

            if !self.detectors.is_empty() {
                self.detect(scale);
            }

            if self.preview.is_some() {
                let processed_at = Instant::now();
                if self.ctx.recording.show_debug_stats {
                    self.stats.record(
                        (read_at - started).as_secs_f64() * 1000.0,
                        (processed_at - read_at).as_secs_f64() * 1000.0,
                        processed_at,
                    );
                }
                self.render();
            }
        }

        Ok(summary)
    }

    fn write_keyframe(&self, i: usize, total: usize) {
        let Some(name) = keyframe_name(i, total) else {
            return;
        };
        debug!(name = %name, "writing_keyframe");
        let artifacts = &self.ctx.artifacts;
        artifacts.persist(self.output_folder.join(name), self.frame.clone());

        if name == FIRST_FRAME {
            let thumb = self.frame.resize_to_height(self.ctx.recording.thumbnail_height);
            artifacts.persist(self.output_folder.join(THUMBNAIL), thumb);
        }
    }

    fn detect(&mut self, scale: u32) {
        self.working = self.frame.downscale(scale);
        self.overlays.clear();
        let save = self.ctx.recording.save_detections;
        let collect_overlays = self.preview.is_some();

        for detector in &mut self.detectors {
            let found = detector.process(&self.working, scale, save);

            if let Some(start) = found.write_from {
                for (j, rect) in found.regions.iter().enumerate() {
                    let name = format!("{}.{}.jpg", detector.name(), start + j);
                    match self.frame.crop(*rect) {
                        Some(crop) => self.ctx.artifacts.persist(self.output_folder.join(name), crop),
                        None => debug!(name = %name, rect = ?rect, "detection_outside_frame"),
                    }
                }
            }

            if collect_overlays {
                self.overlays.extend(
                    found.regions.iter().map(|&rect| Overlay { rect, style: detector.style().clone() }),
                );
            }
        }
    }

    fn render(&mut self) {
        let stats = self.ctx.recording.show_debug_stats.then_some(&self.stats);
        let (canvas, labels) = overlay::compose(&self.frame, &self.overlays, stats);

        let Some(window) = self.preview.as_mut() else {
            return;
        };
        if let Err(e) = window.show(&canvas, &labels) {
            warn!(error = %e, "live_view_show_failed");
        }
        if window.wait_key(1).is_some_and(is_cancel_key) {
            info!("live_view_stopped");
            if let Some(window) = self.preview.take() {
                release_window(window);
            }
        }
    }

    /// Release every resource, each in isolation
    pub(crate) fn release_all(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        debug!(device = %self.device_ref, "recording_releasing");

        let frame = std::mem::take(&mut self.frame);
        release("frame", move || {
            drop(frame);
            Ok(())
        });
        let working = std::mem::take(&mut self.working);
        release("working_frame", move || {
            drop(working);
            Ok(())
        });

        if let Some(mut device) = self.device.take() {
            release("capture_device", move || device.close());
        }
        if let Some(mut writer) = self.writer.take() {
            release("video_writer", move || writer.close());
        }
        for mut detector in self.detectors.drain(..) {
            release("cascade", move || detector.release());
        }
        if let Some(window) = self.preview.take() {
            release_window(window);
        }

        debug!(device = %self.device_ref, "recording_released");
    }
}

impl Drop for RecordingSession<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn release_window(mut window: Box<dyn PreviewWindow>) {
    release("preview_window", move || window.close());
}

/// Run one release step, logging instead of propagating errors and panics
fn release<F>(resource: &'static str, step: F)
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(Ok(())) => debug!(resource = %resource, "resource_released"),
        Ok(Err(e)) => error!(resource = %resource, error = %e, "resource_release_failed"),
        Err(payload) => {
            error!(resource = %resource, panic = %panic_message(payload.as_ref()), "resource_release_panicked")
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}
