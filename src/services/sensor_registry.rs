//! Sensor registry - antenna alias to sensor lookup
//!
//! The registry is replaced wholesale whenever a configuration snapshot
//! arrives. Readers grab the current snapshot `Arc` and never observe a
//! half-applied update.

use crate::domain::sensor::{parse_fallback_alias, Sensor};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct SensorIndex {
    by_device: FxHashMap<String, Arc<Sensor>>,
    by_alias: FxHashMap<String, Arc<Sensor>>,
}

impl SensorIndex {
    fn build(sensors: Vec<Sensor>) -> Self {
        let mut index = SensorIndex::default();

        for sensor in sensors {
            let sensor = Arc::new(sensor);

            if index.by_device.contains_key(&sensor.device_id) {
                warn!(device_id = %sensor.device_id, "sensor_duplicate_device_id");
                continue;
            }

            for alias in &sensor.aliases {
                match index.by_alias.get(alias) {
                    Some(existing) if existing.device_id != sensor.device_id => {
                        warn!(
                            alias = %alias,
                            kept = %existing.device_id,
                            ignored = %sensor.device_id,
                            "sensor_duplicate_alias"
                        );
                    }
                    Some(_) => {}
                    None => {
                        index.by_alias.insert(alias.clone(), sensor.clone());
                    }
                }
            }

            index.by_device.insert(sensor.device_id.clone(), sensor);
        }

        index
    }

    fn resolve(&self, alias: &str) -> Option<Arc<Sensor>> {
        if let Some(sensor) = self.by_alias.get(alias) {
            return Some(sensor.clone());
        }

        // `{device_id}-{port}` only names a port that has no configured alias
        let (device_id, port) = parse_fallback_alias(alias)?;
        let sensor = self.by_device.get(device_id)?;
        if sensor.aliases.get(port).is_some() {
            return None;
        }
        Some(sensor.clone())
    }
}

/// Lookup of known sensors by antenna alias
#[derive(Debug, Default)]
pub struct SensorRegistry {
    snapshot: RwLock<Arc<SensorIndex>>,
}

impl SensorRegistry {
    pub fn new(sensors: Vec<Sensor>) -> Self {
        Self { snapshot: RwLock::new(Arc::new(SensorIndex::build(sensors))) }
    }

    /// Replace the whole registry with a new snapshot
    pub fn replace(&self, sensors: Vec<Sensor>) {
        let index = Arc::new(SensorIndex::build(sensors));
        let count = index.by_device.len();
        *self.snapshot.write() = index;
        info!(sensors = %count, "sensor_registry_replaced");
    }

    /// Sensor owning the antenna that reported `alias`
    pub fn resolve(&self, alias: &str) -> Option<Arc<Sensor>> {
        let snapshot = self.snapshot.read().clone();
        let sensor = snapshot.resolve(alias);
        if sensor.is_none() {
            debug!(alias = %alias, "sensor_alias_not_found");
        }
        sensor
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<Sensor>> {
        self.snapshot.read().by_device.get(device_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().by_device.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
