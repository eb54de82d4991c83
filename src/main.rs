//! Loss-prevention recorder
//!
//! Watches RFID tag movement for items leaving through an exit sensor and
//! films a short clip of each one.
//!
//! Module structure:
//! - `domain/` - Core types (Sensor, TagMovementEvent, Frame)
//! - `io/` - External interfaces (MQTT, ffmpeg, stills, notifications)
//! - `services/` - Business logic (TriggerClassifier, SessionCoordinator)
//! - `infra/` - Infrastructure (Config, Metrics, errors)

use clap::Parser;
use loss_prevention::infra::{Config, Metrics};
use loss_prevention::io::{
    FfmpegCaptureProvider, FfmpegVideoWriterProvider, HttpNotifier, ImageFileWriter, Ingest, LogNotifier,
    Notifier,
};
use loss_prevention::services::{
    create_record_worker, Providers, RecordRequest, SensorRegistry, SessionCoordinator, TriggerClassifier,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Loss-prevention recorder - films items leaving through exit sensors
#[derive(Parser, Debug)]
#[command(name = "loss-prevention", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

/// Bounded trigger queue between ingestion and the record worker
const TRIGGER_BUFFER: usize = 16;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default INFO level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "loss-prevention starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);
    let recording = config.recording();

    info!(
        config_file = %config.config_file(),
        service = %config.service_name(),
        mqtt_host = %config.mqtt().host,
        mqtt_port = %config.mqtt().port,
        video_device = %recording.video_device,
        duration_secs = %recording.duration_secs,
        output_root = %recording.output_root,
        fps = %recording.fps,
        live_view = %recording.live_view,
        detectors = %config.detectors().len(),
        sensors = %config.sensors().len(),
        notifications = %config.notification().enabled,
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    let providers = Providers {
        capture: Arc::new(FfmpegCaptureProvider::default()),
        video: Arc::new(FfmpegVideoWriterProvider::default()),
        still: Arc::new(ImageFileWriter),
        detection: None,
        preview: None,
    };
    let coordinator = Arc::new(SessionCoordinator::new(&config, providers, metrics.clone()));

    if recording.startup_self_test {
        run_self_test(&coordinator, &config).await;
    }

    let notifier: Arc<dyn Notifier> = if config.notification().enabled {
        Arc::new(HttpNotifier::new(config.notification().clone())?)
    } else {
        Arc::new(LogNotifier)
    };

    let (trigger_tx, worker) = create_record_worker(coordinator.clone(), notifier, metrics.clone(), TRIGGER_BUFFER);
    let worker_handle = tokio::spawn(worker.run());

    let registry = Arc::new(SensorRegistry::new(config.sensors().to_vec()));
    let classifier = TriggerClassifier::from_config(&config, registry.clone());
    let ingest = Ingest::new(config.mqtt(), classifier, registry, trigger_tx, metrics.clone());

    let mqtt_config = config.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = loss_prevention::io::start_mqtt_client(&mqtt_config, ingest, mqtt_shutdown).await {
            error!(error = %e, "mqtt_client_error");
        }
    });

    // Metrics reporter (lock-free reads)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    // The ingest side owns the only trigger sender, so the worker stops once
    // the MQTT task is gone and any running session has finished.
    let _ = mqtt_handle.await;
    let _ = worker_handle.await;
    coordinator.flush_artifacts().await;
    metrics.report().log();

    info!("loss-prevention shutdown complete");
    Ok(())
}

/// Record three frames to a scratch folder to prove the camera pipeline works
async fn run_self_test(coordinator: &SessionCoordinator, config: &Config) {
    let fps = config.recording().fps;
    if fps <= 0.0 {
        warn!(fps = %fps, "self_test_skipped");
        return;
    }

    let folder = std::env::temp_dir().join(format!(
        "{}-self-test-{}",
        config.service_name(),
        loss_prevention::domain::epoch_ms()
    ));
    let request = RecordRequest::new(config.recording().video_device.clone(), 3.0 / fps, &folder);

    let outcome = coordinator.record(request).await;
    coordinator.flush_artifacts().await;
    match outcome.error {
        None if outcome.recorded => info!(folder = %folder.display(), "self_test_passed"),
        None => warn!("self_test_not_run"),
        Some(e) => error!(code = %e.code(), error = %e, "self_test_failed"),
    }

    if let Err(e) = std::fs::remove_dir_all(&folder) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(folder = %folder.display(), error = %e, "self_test_cleanup_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // CONFIG_FILE is process-wide, so every case runs in one test
    #[test]
    fn test_config_path_precedence() {
        std::env::remove_var("CONFIG_FILE");
        let args = Args::try_parse_from(["loss-prevention"]).unwrap();
        assert_eq!(args.config, "config/dev.toml");

        std::env::set_var("CONFIG_FILE", "config/store.toml");
        let args = Args::try_parse_from(["loss-prevention"]).unwrap();
        assert_eq!(args.config, "config/store.toml");

        let args = Args::try_parse_from(["loss-prevention", "--config", "config/lab.toml"]).unwrap();
        assert_eq!(args.config, "config/lab.toml");
        std::env::remove_var("CONFIG_FILE");
    }
}
