//! Sliding-window I/O metrics reported in heartbeat payloads.

use std::collections::VecDeque;

use flowline_types::time::now_millis;

/// Length of the averaging window.
const WINDOW_LEN: usize = 10;

#[derive(Debug, Clone, Copy)]
struct IoSample {
    elapsed_since_last_ms: i64,
    record_count: u64,
}

/// Rolling I/O statistics for one channel endpoint.
///
/// Each `record_io` call samples the time elapsed since the previous call
/// and the record count of that previous call, keeping the last
/// [`WINDOW_LEN`] samples for averaging.
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    window: VecDeque<IoSample>,
    total_elapsed_ms: i64,
    total_records: u64,
    last_io_ms: i64,
    last_io_count: u64,
}

impl ChannelMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one I/O cycle that moved `record_count` records.
    pub fn record_io(&mut self, record_count: u64) {
        let now = now_millis();
        if self.last_io_ms > 0 {
            let sample = IoSample {
                elapsed_since_last_ms: now - self.last_io_ms,
                record_count: self.last_io_count,
            };
            self.total_elapsed_ms += sample.elapsed_since_last_ms;
            self.total_records += sample.record_count;
            self.window.push_back(sample);
            if self.window.len() > WINDOW_LEN {
                if let Some(old) = self.window.pop_front() {
                    self.total_elapsed_ms -= old.elapsed_since_last_ms;
                    self.total_records -= old.record_count;
                }
            }
        }
        self.last_io_ms = now;
        self.last_io_count = record_count;
    }

    /// Averages over the current window as a heartbeat payload fragment.
    #[must_use]
    pub fn snapshot(&self) -> serde_json::Value {
        let cycles = self.window.len() as u64;
        let avg_cycle_ms = if cycles == 0 { 0 } else { self.total_elapsed_ms / cycles as i64 };
        let avg_per_record_ms = if self.total_records == 0 {
            0
        } else {
            self.total_elapsed_ms / i64::try_from(self.total_records).unwrap_or(i64::MAX)
        };
        let avg_records_per_cycle =
            if cycles == 0 { 0 } else { self.total_records / cycles };
        let elapsed_since_last =
            if self.last_io_ms == 0 { 0 } else { now_millis() - self.last_io_ms };
        serde_json::json!({
            "elapsedTimeSinceLastIoMs": elapsed_since_last,
            "averageTimePerIoCycleMs": avg_cycle_ms,
            "averageTimePerRecordMs": avg_per_record_ms,
            "averageRecordsPerIoCycle": avg_records_per_cycle,
        })
    }
}
