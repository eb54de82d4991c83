//! Record worker - turns triggers into recording sessions off the ingest path
//!
//! The classifier enqueues triggers via an mpsc channel and never waits on a
//! camera. The worker spawns one task per trigger, so a trigger that arrives
//! while a clip is being filmed reaches the coordinator at once and is
//! rejected there instead of queuing behind the active session.

use crate::domain::tag::RecordTrigger;
use crate::infra::config::RecordingConfig;
use crate::infra::metrics::Metrics;
use crate::io::notification::Notifier;
use crate::services::recorder::{RecordOutcome, RecordRequest, SessionCoordinator};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub struct RecordWorker {
    coordinator: Arc<SessionCoordinator>,
    notifier: Arc<dyn Notifier>,
    trigger_rx: mpsc::Receiver<RecordTrigger>,
    metrics: Arc<Metrics>,
}

impl RecordWorker {
    pub fn new(
        coordinator: Arc<SessionCoordinator>,
        notifier: Arc<dyn Notifier>,
        trigger_rx: mpsc::Receiver<RecordTrigger>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { coordinator, notifier, trigger_rx, metrics }
    }

    /// Run until the trigger channel closes, then wait for running sessions
    pub async fn run(mut self) {
        info!("record_worker_started");
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                trigger = self.trigger_rx.recv() => {
                    let Some(trigger) = trigger else { break };
                    let coordinator = self.coordinator.clone();
                    let notifier = self.notifier.clone();
                    let metrics = self.metrics.clone();
                    sessions.spawn(async move {
                        record_trigger(&coordinator, notifier.as_ref(), &metrics, trigger).await
                    });
                }
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        while sessions.join_next().await.is_some() {}
        info!("record_worker_stopped");
    }
}

/// Request for a trigger: `{output_root}/{timestamp}_{product_id}_{epc}`
pub fn request_for(recording: &RecordingConfig, trigger: &RecordTrigger) -> RecordRequest {
    let folder = Path::new(&recording.output_root).join(trigger.folder_name());
    RecordRequest::new(recording.video_device.clone(), recording.duration_secs, folder)
        .with_live_view(recording.live_view)
}

/// Record one trigger and notify if a clip was saved
pub async fn record_trigger(
    coordinator: &SessionCoordinator,
    notifier: &dyn Notifier,
    metrics: &Metrics,
    trigger: RecordTrigger,
) -> RecordOutcome {
    let request = request_for(coordinator.recording(), &trigger);
    let folder = request.output_folder.clone();
    let start = Instant::now();

    let outcome = coordinator.record(request).await;
    if !outcome.recorded {
        return outcome;
    }

    info!(
        epc = %trigger.epc,
        sku = %trigger.product_id,
        folder = %folder.display(),
        total_ms = %start.elapsed().as_millis(),
        "trigger_recorded"
    );

    match notifier.notify(&trigger.notification_text()).await {
        Ok(()) => metrics.record_notification(true),
        Err(e) => {
            metrics.record_notification(false);
            warn!(epc = %trigger.epc, error = %e, "notification_failed");
        }
    }

    outcome
}

/// Create a trigger channel and worker
///
/// Returns the sender (for the classifier) and the worker (to be spawned)
pub fn create_record_worker(
    coordinator: Arc<SessionCoordinator>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (mpsc::Sender<RecordTrigger>, RecordWorker) {
    let (trigger_tx, trigger_rx) = mpsc::channel(buffer_size);
    let worker = RecordWorker::new(coordinator, notifier, trigger_rx, metrics);
    (trigger_tx, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::Config;

    #[test]
    fn test_request_for_trigger() {
        let mut recording = Config::default().recording().clone();
        recording.output_root = "/recordings".to_string();
        recording.duration_secs = 12.5;
        recording.live_view = true;

        let trigger = RecordTrigger {
            product_id: "SKU".to_string(),
            epc: "EPC".to_string(),
            timestamp: 42,
        };
        let request = request_for(&recording, &trigger);
        assert_eq!(request.output_folder, Path::new("/recordings/42_SKU_EPC"));
        assert_eq!(request.seconds, 12.5);
        assert_eq!(request.video_device, "/dev/video0");
        assert!(request.live_view);
    }
}
