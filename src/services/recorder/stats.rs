//! Rolling frame timing statistics for the live preview

use std::time::Instant;

/// Current, min, max and running average of a series of millisecond values
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DebugStats {
    current: f64,
    min: f64,
    max: f64,
    sum: f64,
    count: u64,
}

impl DebugStats {
    pub fn add_value(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.current = value;
        self.sum += value;
        self.count += 1;
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    /// Rate implied by the current value as a frame interval
    pub fn fps(&self) -> f64 {
        if self.current <= 0.0 {
            return 0.0;
        }
        1000.0 / self.current
    }

    pub fn average_fps(&self) -> f64 {
        let average = self.average();
        if average <= 0.0 {
            return 0.0;
        }
        1000.0 / average
    }
}

/// Read latency, processing latency and frame interval of one session
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub read: DebugStats,
    pub process: DebugStats,
    pub interval: DebugStats,
    previous_frame: Option<Instant>,
}

impl SessionStats {
    pub fn record(&mut self, read_ms: f64, process_ms: f64, now: Instant) {
        self.read.add_value(read_ms);
        self.process.add_value(process_ms);
        if let Some(previous) = self.previous_frame {
            self.interval.add_value(now.duration_since(previous).as_secs_f64() * 1000.0);
        }
        self.previous_frame = Some(now);
    }
}
