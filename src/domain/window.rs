// Time-bounded window of the most recent telemetry
use crate::domain::telemetry::{Series, SeriesPoint, TelemetryRecord};
use std::collections::VecDeque;

pub const DEFAULT_WINDOW_SECONDS: f64 = 15.0;

/// Ordered buffer holding the records of the last `window` seconds.
///
/// Input is expected in non-decreasing timestamp order. Out-of-order records
/// are accepted but eviction only ever scans from the head, stopping at the
/// first record inside the window.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    window: f64,
    records: VecDeque<TelemetryRecord>,
}

impl WindowBuffer {
    pub fn new(window: f64) -> Self {
        Self {
            window,
            records: VecDeque::new(),
        }
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    pub fn insert(&mut self, record: TelemetryRecord) {
        let cutoff = record.timestamp - self.window;
        self.records.push_back(record);

        while let Some(head) = self.records.front() {
            if head.timestamp < cutoff {
                self.records.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn snapshot(&self) -> Vec<TelemetryRecord> {
        self.records.iter().copied().collect()
    }

    pub fn series(&self, series: Series) -> Vec<SeriesPoint> {
        self.records
            .iter()
            .map(|r| SeriesPoint {
                timestamp: r.timestamp,
                value: series.value_of(r),
            })
            .collect()
    }

    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.records.back()
    }

    /// Horizontal axis range for a scrolling view: pinned to `[0, W]` until
    /// the stream passes `W`, then trailing the latest timestamp.
    pub fn visible_range(&self) -> (f64, f64) {
        match self.latest() {
            Some(latest) if latest.timestamp > self.window => {
                (latest.timestamp - self.window, latest.timestamp)
            }
            _ => (0.0, self.window),
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for WindowBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SECONDS)
    }
}
