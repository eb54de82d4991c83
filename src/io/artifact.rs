//! Still image artifacts and the background writer
//!
//! The frame loop never waits on disk. It hands an owned frame to
//! `ArtifactWriter::persist`, which moves it into a blocking task that writes
//! and then drops it. Because `persist` takes the frame by value the caller
//! must clone before handing off, so the written image is frozen at hand-off.

use crate::domain::frame::Frame;
use crate::infra::metrics::Metrics;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

pub trait StillWriter: Send + Sync {
    fn write(&self, path: &Path, frame: &Frame) -> anyhow::Result<()>;
}

/// Writes stills with the `image` crate, format chosen from the extension
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFileWriter;

impl StillWriter for ImageFileWriter {
    fn write(&self, path: &Path, frame: &Frame) -> anyhow::Result<()> {
        if frame.is_empty() {
            anyhow::bail!("refusing to write empty frame");
        }
        frame
            .image()
            .save(path)
            .with_context(|| format!("Failed to write image {}", path.display()))
    }
}

/// Count of writes handed off but not finished
#[derive(Debug, Clone)]
pub struct PendingWrites(Arc<watch::Sender<usize>>);

impl Default for PendingWrites {
    fn default() -> Self {
        Self(Arc::new(watch::Sender::new(0)))
    }
}

impl PendingWrites {
    pub fn count(&self) -> usize {
        *self.0.borrow()
    }

    /// Resolve once every handed off write has finished
    pub async fn drained(&self) {
        let mut rx = self.0.subscribe();
        // the sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }

    fn begin(&self) -> PendingGuard {
        self.0.send_modify(|pending| *pending += 1);
        PendingGuard(self.0.clone())
    }
}

struct PendingGuard(Arc<watch::Sender<usize>>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.send_modify(|pending| *pending = pending.saturating_sub(1));
    }
}

/// Fire-and-forget writer for stills and detection crops
#[derive(Clone)]
pub struct ArtifactWriter {
    still: Arc<dyn StillWriter>,
    runtime: Handle,
    pending: PendingWrites,
    metrics: Arc<Metrics>,
}

impl ArtifactWriter {
    pub fn new(
        still: Arc<dyn StillWriter>,
        runtime: Handle,
        pending: PendingWrites,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { still, runtime, pending, metrics }
    }

    /// Write `frame` to `path` in the background, taking ownership of it
    pub fn persist(&self, path: PathBuf, frame: Frame) {
        let guard = self.pending.begin();
        let still = self.still.clone();
        let metrics = self.metrics.clone();

        self.runtime.spawn_blocking(move || {
            let _guard = guard;
            match still.write(&path, &frame) {
                Ok(()) => {
                    metrics.record_artifact_written();
                    debug!(path = %path.display(), "artifact_written");
                }
                Err(e) => {
                    metrics.record_artifact_failed();
                    warn!(path = %path.display(), error = %e, "artifact_write_failed");
                }
            }
        });
    }

    pub fn pending(&self) -> &PendingWrites {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::frame::Color;

    fn writer(metrics: Arc<Metrics>) -> ArtifactWriter {
        ArtifactWriter::new(
            Arc::new(ImageFileWriter),
            Handle::current(),
            PendingWrites::default(),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_persist_writes_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(Metrics::new());
        let writer = writer(metrics.clone());

        let path = dir.path().join("frame.first.jpg");
        writer.persist(path.clone(), Frame::new(64, 48));
        writer.pending().drained().await;

        let image = image::open(&path).unwrap();
        assert_eq!((image.width(), image.height()), (64, 48));
        assert_eq!(metrics.artifacts_written(), 1);
        assert_eq!(writer.pending().count(), 0);
    }

    #[tokio::test]
    async fn test_artifact_frozen_at_handoff() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(Arc::new(Metrics::new()));

        let mut frame = Frame::new(8, 8);
        frame.fill(Color::GREEN);
        let path = dir.path().join("crop.png");
        writer.persist(path.clone(), frame.clone());
        frame.fill(Color::RED);
        writer.pending().drained().await;

        let image = image::open(&path).unwrap().to_rgb8();
        assert_eq!(image.get_pixel(4, 4).0, [0, 255, 0]);
    }

    #[tokio::test]
    async fn test_failed_write_is_counted_and_released() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(Metrics::new());
        let writer = writer(metrics.clone());

        writer.persist(dir.path().join("missing").join("x.jpg"), Frame::new(4, 4));
        writer.persist(dir.path().join("empty.jpg"), Frame::empty());
        writer.pending().drained().await;

        assert_eq!(metrics.artifacts_written(), 0);
        assert_eq!(metrics.report().artifacts_failed, 2);
        assert_eq!(writer.pending().count(), 0);
    }
}
