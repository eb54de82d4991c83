//! Recording orchestrator
//!
//! `SessionCoordinator` is the one process-wide owner of the capture device.
//! It admits a single session at a time through a non-blocking guard: a start
//! attempt while a session is open or recording is rejected immediately, never
//! queued, because a queued clip would be filmed at the wrong time.
//!
//! Lifecycle: Idle -> Opening -> Recording -> Closing -> Idle, or
//! Opening -> Failed when setup fails. The session itself runs on the blocking
//! pool; any panic inside it is caught there and reported as a failure.

mod overlay;
mod session;
mod stats;

pub use overlay::{compose, Overlay};
pub use session::{frame_count, keyframe_name, SessionSummary};
pub use stats::{DebugStats, SessionStats};

use crate::infra::config::{Config, RecordingConfig};
use crate::infra::error::RecordingError;
use crate::infra::metrics::Metrics;
use crate::io::artifact::{ArtifactWriter, PendingWrites, StillWriter};
use crate::io::capture::CaptureProvider;
use crate::io::detection::DetectionEngine;
use crate::io::preview::PreviewProvider;
use crate::io::video_writer::VideoWriterProvider;
use crate::services::detector::DetectorSet;
use parking_lot::RwLock;
use session::{panic_message, RecordingSession};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Where the orchestrator is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Opening,
    Recording,
    Closing,
    /// The last attempt failed. Cleared by the next attempt.
    Failed,
}

/// External collaborators a session drives
#[derive(Clone)]
pub struct Providers {
    pub capture: Arc<dyn CaptureProvider>,
    pub video: Arc<dyn VideoWriterProvider>,
    pub still: Arc<dyn StillWriter>,
    /// Without an engine no detector runs
    pub detection: Option<Arc<dyn DetectionEngine>>,
    /// Without a preview provider live view is unavailable
    pub preview: Option<Arc<dyn PreviewProvider>>,
}

/// What to record and where
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRequest {
    pub video_device: String,
    pub seconds: f64,
    pub output_folder: PathBuf,
    pub live_view: bool,
}

impl RecordRequest {
    pub fn new(video_device: impl Into<String>, seconds: f64, output_folder: impl Into<PathBuf>) -> Self {
        Self {
            video_device: video_device.into(),
            seconds,
            output_folder: output_folder.into(),
            live_view: false,
        }
    }

    pub fn with_live_view(mut self, live_view: bool) -> Self {
        self.live_view = live_view;
        self
    }
}

/// Definitive result of a start attempt
#[derive(Debug)]
pub struct RecordOutcome {
    pub recorded: bool,
    pub error: Option<RecordingError>,
}

impl RecordOutcome {
    pub fn recorded() -> Self {
        Self { recorded: true, error: None }
    }

    /// Rejected by the single-flight guard. Not an error.
    pub fn busy() -> Self {
        Self { recorded: false, error: None }
    }

    pub fn failed(error: RecordingError) -> Self {
        Self { recorded: false, error: Some(error) }
    }
}

/// Everything a running session reads, shared with the blocking task
pub(crate) struct SessionContext {
    pub(crate) recording: RecordingConfig,
    pub(crate) video_file_name: String,
    pub(crate) detectors: DetectorSet,
    pub(crate) providers: Providers,
    pub(crate) artifacts: ArtifactWriter,
    pub(crate) metrics: Arc<Metrics>,
    state: Arc<RwLock<SessionState>>,
}

impl SessionContext {
    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
        debug!(state = ?state, "recording_state");
    }
}

pub struct SessionCoordinator {
    recording: RecordingConfig,
    video_file_name: String,
    detectors: DetectorSet,
    providers: Providers,
    guard: Arc<Semaphore>,
    state: Arc<RwLock<SessionState>>,
    pending: PendingWrites,
    metrics: Arc<Metrics>,
}

impl SessionCoordinator {
    pub fn new(config: &Config, providers: Providers, metrics: Arc<Metrics>) -> Self {
        let detectors = DetectorSet::from_config(config);
        if !detectors.is_empty() && providers.detection.is_none() {
            warn!(detectors = %detectors.len(), "detection_engine_unavailable");
        }
        if config.recording().live_view && providers.preview.is_none() {
            warn!("live_view_unavailable");
        }

        Self {
            recording: config.recording().clone(),
            video_file_name: config.video_file_name(),
            detectors,
            providers,
            guard: Arc::new(Semaphore::new(1)),
            state: Arc::new(RwLock::new(SessionState::Idle)),
            pending: PendingWrites::default(),
            metrics,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// True while a session holds the guard
    pub fn is_busy(&self) -> bool {
        self.guard.available_permits() == 0
    }

    pub fn recording(&self) -> &RecordingConfig {
        &self.recording
    }

    /// Record one clip. Returns immediately with `recorded = false` and no
    /// error when a session is already active.
    pub async fn record(&self, request: RecordRequest) -> RecordOutcome {
        let Ok(permit) = self.guard.clone().try_acquire_owned() else {
            self.metrics.record_session_rejected();
            warn!(device = %request.video_device, "recording_rejected_busy");
            return RecordOutcome::busy();
        };

        self.metrics.record_session_started();
        let ctx = SessionContext {
            recording: self.recording.clone(),
            video_file_name: self.video_file_name.clone(),
            detectors: self.detectors.clone(),
            providers: self.providers.clone(),
            artifacts: ArtifactWriter::new(
                self.providers.still.clone(),
                Handle::current(),
                self.pending.clone(),
                self.metrics.clone(),
            ),
            metrics: self.metrics.clone(),
            state: self.state.clone(),
        };
        ctx.set_state(SessionState::Opening);

        let folder = request.output_folder.clone();
        let begin = Instant::now();

        // The permit moves into the task so the guard outlives the session
        // even if this future is dropped.
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let result = match panic::catch_unwind(AssertUnwindSafe(|| run_session(&ctx, &request))) {
                Ok(result) => result,
                Err(payload) => Err(RecordingError::Fault(panic_message(payload.as_ref()))),
            };
            ctx.set_state(if result.is_ok() { SessionState::Idle } else { SessionState::Failed });
            result
        })
        .await
        .unwrap_or_else(|e| {
            *self.state.write() = SessionState::Failed;
            Err(RecordingError::Fault(e.to_string()))
        });

        match result {
            Ok(summary) => {
                self.metrics.record_session_completed();
                info!(
                    folder = %folder.display(),
                    iterations = %summary.iterations,
                    frames_read = %summary.frames_read,
                    frames_skipped = %summary.frames_skipped,
                    elapsed_ms = %begin.elapsed().as_millis(),
                    "recording_completed"
                );
                RecordOutcome::recorded()
            }
            Err(e) => {
                self.metrics.record_session_failed();
                error!(folder = %folder.display(), code = %e.code(), error = %e, "recording_failed");
                RecordOutcome::failed(e)
            }
        }
    }

    /// Wait until every still and crop handed off so far has been written
    pub async fn flush_artifacts(&self) {
        let pending = self.pending.count();
        if pending > 0 {
            debug!(pending = %pending, "artifacts_flushing");
        }
        self.pending.drained().await;
    }
}

fn run_session(ctx: &SessionContext, request: &RecordRequest) -> Result<SessionSummary, RecordingError> {
    let mut session = RecordingSession::open(ctx, request)?;
    let result = session.run(request.seconds);
    ctx.set_state(SessionState::Closing);
    session.release_all();
    result
}
