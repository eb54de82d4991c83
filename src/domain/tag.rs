//! Tag movement events and recording triggers

use serde::{Deserialize, Serialize};

/// Only this event kind can trigger a recording
pub const MOVED: &str = "moved";

/// One entry of a tag's location history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationEntry {
    /// Antenna alias the tag was read at
    pub location: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub source: String,
}

/// A single tag event as delivered by the inventory service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagMovementEvent {
    pub epc: String,
    #[serde(default)]
    pub product_id: String,
    pub event: String,
    /// Most recent location first
    #[serde(default)]
    pub location_history: Vec<LocationEntry>,
}

impl TagMovementEvent {
    pub fn is_moved(&self) -> bool {
        self.event == MOVED
    }

    pub fn current_location(&self) -> Option<&str> {
        self.location_history.first().map(|l| l.location.as_str())
    }

    pub fn previous_location(&self) -> Option<&str> {
        self.location_history.get(1).map(|l| l.location.as_str())
    }
}

/// Batch payload, order as received
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataPayload {
    #[serde(default)]
    pub tag_event: Vec<TagMovementEvent>,
}

/// Request to record the item that just left
#[derive(Debug, Clone, PartialEq)]
pub struct RecordTrigger {
    pub product_id: String,
    pub epc: String,
    /// Epoch milliseconds at the time the trigger fired
    pub timestamp: u64,
}

impl RecordTrigger {
    /// Session folder name: `{timestamp}_{product_id}_{epc}`
    pub fn folder_name(&self) -> String {
        format!("{}_{}_{}", self.timestamp, self.product_id, self.epc)
    }

    /// Body of the loss-prevention notification for this trigger
    pub fn notification_text(&self) -> String {
        format!(
            "\nAn item was detected leaving. A video clip has been recorded for loss prevention purposes.\n\n Timestamp: {}\nProduct ID: {}\n       EPC: {}\n\n",
            self.timestamp, self.product_id, self.epc
        )
    }
}
