//! RFID sensor (RSP) model
//!
//! A sensor is a fixed reader with one or more antenna ports. Each port is
//! reported in tag location history by its alias, either the one configured
//! for that port or the `{device_id}-{port}` fallback.

use serde::{Deserialize, Serialize};

/// Facility assigned to sensors that were never placed in one
pub const DEFAULT_FACILITY: &str = "DEFAULT_FACILITY";

/// Functional role of a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Personality {
    #[default]
    None,
    Exit,
    #[serde(rename = "POS")]
    PointOfSale,
    FittingRoom,
}

impl Personality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Personality::None => "NONE",
            Personality::Exit => "EXIT",
            Personality::PointOfSale => "POS",
            Personality::FittingRoom => "FITTING_ROOM",
        }
    }
}

fn default_facility() -> String {
    DEFAULT_FACILITY.to_string()
}

/// A configured RFID reader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub device_id: String,
    #[serde(default = "default_facility")]
    pub facility_id: String,
    #[serde(default)]
    pub personality: Personality,
    /// Alias per antenna port, indexed by port number
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Sensor {
    /// Sensor with no role in the default facility, with antenna 0 aliased
    /// to its fallback name
    pub fn new(device_id: &str) -> Self {
        let mut sensor = Self {
            device_id: device_id.to_string(),
            facility_id: default_facility(),
            personality: Personality::None,
            aliases: Vec::new(),
        };
        sensor.aliases.push(sensor.antenna_alias(0));
        sensor
    }

    pub fn with_personality(mut self, personality: Personality) -> Self {
        self.personality = personality;
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Alias for an antenna port: the configured alias when one exists at that
    /// index, otherwise `{device_id}-{port}`
    pub fn antenna_alias(&self, port: usize) -> String {
        match self.aliases.get(port) {
            Some(alias) => alias.clone(),
            None => fallback_alias(&self.device_id, port),
        }
    }

    #[inline]
    pub fn is_exit(&self) -> bool {
        self.personality == Personality::Exit
    }

    #[inline]
    pub fn is_point_of_sale(&self) -> bool {
        self.personality == Personality::PointOfSale
    }
}

/// Fallback alias format for an antenna port without a configured alias
pub fn fallback_alias(device_id: &str, port: usize) -> String {
    format!("{}-{}", device_id, port)
}

/// Split a fallback alias back into device id and port
pub fn parse_fallback_alias(alias: &str) -> Option<(&str, usize)> {
    let (device_id, port) = alias.rsplit_once('-')?;
    if device_id.is_empty() {
        return None;
    }
    port.parse().ok().map(|port| (device_id, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_antenna_alias_configured_and_fallback() {
        let sensor = Sensor::new("RSP-150009").with_aliases(["A0"]);
        assert_eq!(sensor.antenna_alias(0), "A0");
        assert_eq!(sensor.antenna_alias(1), "RSP-150009-1");
    }

    #[test]
    fn test_new_sensor_defaults() {
        let sensor = Sensor::new("RSP-150009");
        assert_eq!(sensor.facility_id, DEFAULT_FACILITY);
        assert_eq!(sensor.personality, Personality::None);
        assert_eq!(sensor.aliases, vec!["RSP-150009-0".to_string()]);
        assert!(!sensor.is_exit());
    }

    #[test]
    fn test_parse_fallback_alias() {
        assert_eq!(parse_fallback_alias("RSP-150009-3"), Some(("RSP-150009", 3)));
        assert_eq!(parse_fallback_alias("FrontDoor"), None);
        assert_eq!(parse_fallback_alias("RSP-x"), None);
        assert_eq!(parse_fallback_alias("-3"), None);
    }

    #[test]
    fn test_deserialize_sensor_config() {
        let json = r#"{"device_id":"RSP-1","personality":"EXIT","aliases":["Door1","Door2"]}"#;
        let sensor: Sensor = serde_json::from_str(json).unwrap();
        assert_eq!(sensor.facility_id, DEFAULT_FACILITY);
        assert!(sensor.is_exit());
        assert_eq!(sensor.antenna_alias(1), "Door2");

        let pos: Sensor =
            serde_json::from_str(r#"{"device_id":"RSP-2","personality":"POS"}"#).unwrap();
        assert!(pos.is_point_of_sale());

        let fitting: Sensor =
            serde_json::from_str(r#"{"device_id":"RSP-3","personality":"FITTING_ROOM"}"#).unwrap();
        assert_eq!(fitting.personality, Personality::FittingRoom);
        assert_eq!(fitting.personality.as_str(), "FITTING_ROOM");
    }
}
