//! MQTT client for tag movement batches and sensor configuration snapshots

use crate::domain::sensor::Sensor;
use crate::domain::tag::{DataPayload, RecordTrigger, TagMovementEvent};
use crate::infra::config::{Config, MqttConfig};
use crate::infra::metrics::Metrics;
use crate::services::sensor_registry::SensorRegistry;
use crate::services::trigger::TriggerClassifier;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// JSON-RPC method carrying a full sensor snapshot
pub const SENSOR_CONFIG_METHOD: &str = "sensor_config_notification";

#[derive(Debug, Deserialize)]
struct JsonRpcNotification {
    method: String,
    #[serde(default)]
    params: Vec<Sensor>,
}

/// Parse a data topic payload into its tag events, in received order
pub fn parse_data_payload(json_str: &str) -> Option<Vec<TagMovementEvent>> {
    match serde_json::from_str::<DataPayload>(json_str) {
        Ok(payload) => Some(payload.tag_event),
        Err(e) => {
            debug!(error = %e, "data_payload_invalid");
            None
        }
    }
}

/// Parse a sensor topic payload into a full sensor snapshot
///
/// Returns None for any other JSON-RPC method.
pub fn parse_sensor_notification(json_str: &str) -> Option<Vec<Sensor>> {
    let notification: JsonRpcNotification = match serde_json::from_str(json_str) {
        Ok(n) => n,
        Err(e) => {
            debug!(error = %e, "sensor_notification_invalid");
            return None;
        }
    };

    if notification.method != SENSOR_CONFIG_METHOD {
        debug!(method = %notification.method, "sensor_notification_ignored");
        return None;
    }
    Some(notification.params)
}

/// Routes incoming payloads by topic
pub struct Ingest {
    data_topic: String,
    sensor_topic: String,
    classifier: TriggerClassifier,
    registry: Arc<SensorRegistry>,
    trigger_tx: mpsc::Sender<RecordTrigger>,
    metrics: Arc<Metrics>,
}

impl Ingest {
    pub fn new(
        mqtt: &MqttConfig,
        classifier: TriggerClassifier,
        registry: Arc<SensorRegistry>,
        trigger_tx: mpsc::Sender<RecordTrigger>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            data_topic: mqtt.data_topic.clone(),
            sensor_topic: mqtt.sensor_topic.clone(),
            classifier,
            registry,
            trigger_tx,
            metrics,
        }
    }

    /// Handle one message. Returns true when a trigger was enqueued.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> bool {
        let json_str = match std::str::from_utf8(payload) {
            Ok(s) => s,
            Err(e) => {
                warn!(topic = %topic, error = %e, "mqtt_payload_not_utf8");
                return false;
            }
        };

        if topic == self.data_topic {
            let Some(events) = parse_data_payload(json_str) else {
                warn!(topic = %topic, "mqtt_payload_dropped");
                return false;
            };
            debug!(event_count = %events.len(), "tag_batch_received");
            self.classifier.handle_batch(&events, &self.trigger_tx, &self.metrics)
        } else if topic == self.sensor_topic {
            if let Some(sensors) = parse_sensor_notification(json_str) {
                self.registry.replace(sensors);
            }
            false
        } else {
            debug!(topic = %topic, "mqtt_topic_unhandled");
            false
        }
    }
}

/// Start the MQTT client and feed every publish to `ingest`
///
/// Runs until shutdown is signalled. Broker errors are logged and the event
/// loop reconnects after a second.
pub async fn start_mqtt_client(
    config: &Config,
    ingest: Ingest,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mqtt = config.mqtt();
    let mut options = MqttOptions::new(&mqtt.client_id, &mqtt.host, mqtt.port);
    options.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (&mqtt.username, &mqtt.password) {
        options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(options, 100);
    client.subscribe(&mqtt.data_topic, QoS::AtLeastOnce).await?;
    client.subscribe(&mqtt.sensor_topic, QoS::AtLeastOnce).await?;

    info!(
        host = %mqtt.host,
        port = %mqtt.port,
        data_topic = %mqtt.data_topic,
        sensor_topic = %mqtt.sensor_topic,
        "mqtt_subscribed"
    );

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        ingest.handle_message(&publish.topic, &publish.payload);
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sensor::Personality;

    const BATCH: &str = r#"{
        "tag_event": [{
            "epc": "303402662C3A5F4000000005",
            "product_id": "00888446671424",
            "event": "moved",
            "location_history": [
                {"location": "RSP-150009-0", "timestamp": 1559867406087, "source": "fixed"},
                {"location": "RSP-150000-0", "timestamp": 1559867400000, "source": "fixed"}
            ]
        }]
    }"#;

    fn ingest(capacity: usize) -> (Ingest, mpsc::Receiver<RecordTrigger>, Arc<SensorRegistry>) {
        let registry = Arc::new(SensorRegistry::new(vec![
            Sensor::new("RSP-150000"),
            Sensor::new("RSP-150009").with_personality(Personality::Exit),
        ]));
        let config = Config::default();
        let classifier = TriggerClassifier::from_config(&config, registry.clone());
        let (tx, rx) = mpsc::channel(capacity);
        let ingest = Ingest::new(config.mqtt(), classifier, registry.clone(), tx, Arc::new(Metrics::new()));
        (ingest, rx, registry)
    }

    #[test]
    fn test_parse_data_payload() {
        let events = parse_data_payload(BATCH).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].product_id, "00888446671424");
        assert_eq!(events[0].current_location(), Some("RSP-150009-0"));
        assert_eq!(events[0].previous_location(), Some("RSP-150000-0"));
    }

    #[test]
    fn test_parse_invalid_payloads() {
        assert!(parse_data_payload("not json").is_none());
        assert_eq!(parse_data_payload("{}").unwrap().len(), 0);
        assert!(parse_sensor_notification("[]").is_none());
    }

    #[test]
    fn test_parse_sensor_notification() {
        let json = r#"{
            "jsonrpc": "2.0",
            "method": "sensor_config_notification",
            "params": [
                {"device_id": "RSP-150009", "facility_id": "front", "personality": "EXIT", "aliases": ["door"]},
                {"device_id": "RSP-150000"}
            ]
        }"#;

        let sensors = parse_sensor_notification(json).unwrap();
        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0].personality, Personality::Exit);
        assert_eq!(sensors[0].aliases, vec!["door".to_string()]);
        assert_eq!(sensors[1].personality, Personality::None);
    }

    #[test]
    fn test_other_methods_ignored() {
        let json = r#"{"method": "inventory_event", "params": []}"#;
        assert!(parse_sensor_notification(json).is_none());
    }

    #[test]
    fn test_data_topic_enqueues_trigger() {
        let (ingest, mut rx, _) = ingest(4);
        let topic = Config::default().mqtt().data_topic.clone();

        assert!(ingest.handle_message(&topic, BATCH.as_bytes()));
        let trigger = rx.try_recv().unwrap();
        assert_eq!(trigger.epc, "303402662C3A5F4000000005");
    }

    #[test]
    fn test_sensor_topic_replaces_registry() {
        let (ingest, mut rx, registry) = ingest(4);
        let mqtt = Config::default().mqtt().clone();
        let snapshot = r#"{"method": "sensor_config_notification", "params": [{"device_id": "RSP-150000"}]}"#;

        assert!(!ingest.handle_message(&mqtt.sensor_topic, snapshot.as_bytes()));
        assert_eq!(registry.len(), 1);

        // The exit sensor is gone, so the same batch no longer triggers
        assert!(!ingest.handle_message(&mqtt.data_topic, BATCH.as_bytes()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unknown_topic_and_bad_payload() {
        let (ingest, _rx, _) = ingest(4);
        assert!(!ingest.handle_message("other/topic", BATCH.as_bytes()));
        let topic = Config::default().mqtt().data_topic.clone();
        assert!(!ingest.handle_message(&topic, &[0xff, 0xfe]));
        assert!(!ingest.handle_message(&topic, b"not json"));
    }
}
