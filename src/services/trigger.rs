//! Movement trigger classifier
//!
//! Decides whether a batch of tag events contains an item leaving through an
//! exit sensor. At most one trigger fires per batch, for the first qualifying
//! event in batch order.

use crate::domain::epoch_ms;
use crate::domain::tag::{RecordTrigger, TagMovementEvent};
use crate::infra::config::{Config, TagFilter};
use crate::infra::metrics::Metrics;
use crate::services::sensor_registry::SensorRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

pub struct TriggerClassifier {
    registry: Arc<SensorRegistry>,
    sku_filter: TagFilter,
    epc_filter: TagFilter,
}

impl TriggerClassifier {
    pub fn new(registry: Arc<SensorRegistry>, sku_filter: TagFilter, epc_filter: TagFilter) -> Self {
        Self { registry, sku_filter, epc_filter }
    }

    pub fn from_config(config: &Config, registry: Arc<SensorRegistry>) -> Self {
        Self::new(registry, config.sku_filter().clone(), config.epc_filter().clone())
    }

    /// First event in the batch that is an item exiting, as a trigger
    /// stamped with the current time
    pub fn classify(&self, events: &[TagMovementEvent]) -> Option<RecordTrigger> {
        let tag = events.iter().find(|tag| self.is_exiting(tag))?;
        Some(RecordTrigger {
            product_id: tag.product_id.clone(),
            epc: tag.epc.clone(),
            timestamp: epoch_ms(),
        })
    }

    /// Classify a batch and enqueue its trigger, if any, without waiting
    ///
    /// Returns true when a trigger was enqueued.
    pub fn handle_batch(
        &self,
        events: &[TagMovementEvent],
        trigger_tx: &mpsc::Sender<RecordTrigger>,
        metrics: &Metrics,
    ) -> bool {
        metrics.record_batch(events.len());

        let Some(trigger) = self.classify(events) else {
            return false;
        };

        info!(
            epc = %trigger.epc,
            sku = %trigger.product_id,
            timestamp = %trigger.timestamp,
            "recording_triggered"
        );
        metrics.record_trigger();

        match trigger_tx.try_send(trigger) {
            Ok(()) => true,
            Err(TrySendError::Full(trigger)) => {
                metrics.record_trigger_dropped();
                warn!(epc = %trigger.epc, "trigger_dropped: channel full");
                false
            }
            Err(TrySendError::Closed(trigger)) => {
                warn!(epc = %trigger.epc, "trigger_channel_closed");
                false
            }
        }
    }

    fn is_exiting(&self, tag: &TagMovementEvent) -> bool {
        if !tag.is_moved() {
            debug!(epc = %tag.epc, sku = %tag.product_id, event = %tag.event, "skip_not_moved");
            return false;
        }

        let (Some(current), Some(previous)) = (tag.current_location(), tag.previous_location())
        else {
            debug!(epc = %tag.epc, sku = %tag.product_id, "skip_short_history");
            return false;
        };

        if !self.sku_filter.is_match(&tag.product_id) {
            debug!(
                epc = %tag.epc,
                sku = %tag.product_id,
                filter = %self.sku_filter.as_str(),
                "skip_sku_filter"
            );
            return false;
        }
        if !self.epc_filter.is_match(&tag.epc) {
            debug!(
                epc = %tag.epc,
                sku = %tag.product_id,
                filter = %self.epc_filter.as_str(),
                "skip_epc_filter"
            );
            return false;
        }

        match self.registry.resolve(current) {
            Some(sensor) if sensor.is_exit() => {}
            _ => {
                debug!(epc = %tag.epc, sku = %tag.product_id, location = %current, "skip_not_exiting");
                return false;
            }
        }

        // A tag that was already at an exit sensor is lingering, not leaving
        match self.registry.resolve(previous) {
            Some(sensor) if !sensor.is_exit() => true,
            _ => {
                debug!(
                    epc = %tag.epc,
                    sku = %tag.product_id,
                    location = %previous,
                    "skip_previous_exit_or_unknown"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sensor::{Personality, Sensor};
    use crate::domain::tag::LocationEntry;

    fn registry() -> Arc<SensorRegistry> {
        Arc::new(SensorRegistry::new(vec![
            Sensor::new("RSP-EXIT1")
                .with_personality(Personality::Exit)
                .with_aliases(["Exit1"]),
            Sensor::new("RSP-EXIT2")
                .with_personality(Personality::Exit)
                .with_aliases(["Exit2"]),
            Sensor::new("RSP-FLOOR").with_aliases(["Floor"]),
            Sensor::new("RSP-POS")
                .with_personality(Personality::PointOfSale)
                .with_aliases(["Checkout"]),
        ]))
    }

    fn classifier() -> TriggerClassifier {
        TriggerClassifier::new(registry(), TagFilter::default(), TagFilter::default())
    }

    fn tag(epc: &str, sku: &str, event: &str, history: &[&str]) -> TagMovementEvent {
        TagMovementEvent {
            epc: epc.to_string(),
            product_id: sku.to_string(),
            event: event.to_string(),
            location_history: history
                .iter()
                .map(|location| LocationEntry {
                    location: location.to_string(),
                    timestamp: 0,
                    source: "fixed".to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_exiting_tag_triggers() {
        let trigger = classifier().classify(&[tag("E1", "S1", "moved", &["Exit1", "Floor"])]).unwrap();
        assert_eq!(trigger.epc, "E1");
        assert_eq!(trigger.product_id, "S1");
        assert!(trigger.timestamp > 0);
    }

    #[test]
    fn test_non_moved_event_skipped() {
        assert!(classifier().classify(&[tag("E1", "S1", "arrival", &["Exit1", "Floor"])]).is_none());
    }

    #[test]
    fn test_short_history_skipped() {
        assert!(classifier().classify(&[tag("E1", "S1", "moved", &["Exit1"])]).is_none());
        assert!(classifier().classify(&[tag("E1", "S1", "moved", &[])]).is_none());
    }

    #[test]
    fn test_current_not_exit_skipped() {
        assert!(classifier().classify(&[tag("E1", "S1", "moved", &["Checkout", "Floor"])]).is_none());
        assert!(classifier().classify(&[tag("E1", "S1", "moved", &["Nowhere", "Floor"])]).is_none());
    }

    #[test]
    fn test_previous_exit_skipped() {
        assert!(classifier().classify(&[tag("E1", "S1", "moved", &["Exit1", "Exit2"])]).is_none());
        assert!(classifier().classify(&[tag("E1", "S1", "moved", &["Exit1", "Exit1"])]).is_none());
    }

    #[test]
    fn test_previous_unknown_skipped() {
        assert!(classifier().classify(&[tag("E1", "S1", "moved", &["Exit1", "Nowhere"])]).is_none());
    }

    #[test]
    fn test_fallback_alias_resolves_exit() {
        let trigger = classifier().classify(&[tag("E1", "S1", "moved", &["RSP-EXIT1-1", "Checkout"])]);
        assert!(trigger.is_some());
    }

    #[test]
    fn test_filters() {
        let classifier = TriggerClassifier::new(
            registry(),
            TagFilter::new("^0088").unwrap(),
            TagFilter::new("^3014").unwrap(),
        );
        let history = ["Exit1", "Floor"];
        assert!(classifier.classify(&[tag("3014AA", "00881", "moved", &history)]).is_some());
        assert!(classifier.classify(&[tag("3014AA", "99881", "moved", &history)]).is_none());
        assert!(classifier.classify(&[tag("AA3014", "00881", "moved", &history)]).is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let batch = vec![
            tag("E0", "S0", "moved", &["Floor", "Exit1"]),
            tag("E1", "S1", "moved", &["Exit1", "Floor"]),
            tag("E2", "S2", "moved", &["Exit2", "Checkout"]),
        ];
        assert_eq!(classifier().classify(&batch).unwrap().epc, "E1");
    }

    #[tokio::test]
    async fn test_handle_batch_fires_once() {
        let (tx, mut rx) = mpsc::channel(8);
        let metrics = Metrics::new();
        let batch = vec![
            tag("E1", "S1", "moved", &["Exit1", "Floor"]),
            tag("E2", "S2", "moved", &["Exit2", "Checkout"]),
        ];

        assert!(classifier().handle_batch(&batch, &tx, &metrics));
        assert_eq!(rx.recv().await.unwrap().epc, "E1");
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.triggers_total(), 1);
    }

    #[tokio::test]
    async fn test_handle_batch_without_match() {
        let (tx, mut rx) = mpsc::channel(8);
        let metrics = Metrics::new();
        let batch = vec![tag("E1", "S1", "moved", &["Floor", "Exit1"])];

        assert!(!classifier().handle_batch(&batch, &tx, &metrics));
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.triggers_total(), 0);
    }

    #[test]
    fn test_handle_batch_channel_full() {
        let (tx, _rx) = mpsc::channel(1);
        let metrics = Metrics::new();
        let batch = vec![tag("E1", "S1", "moved", &["Exit1", "Floor"])];

        assert!(classifier().handle_batch(&batch, &tx, &metrics));
        assert!(!classifier().handle_batch(&batch, &tx, &metrics));
        assert_eq!(metrics.report().triggers_dropped, 1);
    }
}
