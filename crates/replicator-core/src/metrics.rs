//! Bounded in-engine telemetry: the structured log ring, hourly metric
//! samples, and the completed-task archive.
//!
//! All three are plain data with hard size bounds so a long run cannot grow
//! without limit. They end up verbatim in the final report.

use std::collections::{BTreeMap, VecDeque};

// ---------------------------------------------------------------------------
// Log ring
// ---------------------------------------------------------------------------

/// Structured log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One log line with its simulated timestamp.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    pub time: f64,
    pub level: LogLevel,
    pub message: String,
}

/// Bounded log buffer. When the capacity is exceeded the buffer is trimmed
/// to half, keeping the newest entries.
#[derive(Debug, Default)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(2),
        }
    }

    pub fn push(&mut self, time: f64, level: LogLevel, message: impl Into<String>) {
        self.entries.push_back(LogEntry {
            time,
            level,
            message: message.into(),
        });
        if self.entries.len() > self.capacity {
            let keep_from = self.entries.len() - self.capacity / 2;
            self.entries.drain(..keep_from);
        }
    }

    pub fn debug(&mut self, time: f64, message: impl Into<String>) {
        self.push(time, LogLevel::Debug, message);
    }

    pub fn info(&mut self, time: f64, message: impl Into<String>) {
        self.push(time, LogLevel::Info, message);
    }

    pub fn warn(&mut self, time: f64, message: impl Into<String>) {
        self.push(time, LogLevel::Warn, message);
    }

    pub fn error(&mut self, time: f64, message: impl Into<String>) {
        self.push(time, LogLevel::Error, message);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Metric samples
// ---------------------------------------------------------------------------

/// One periodic metrics sample. Maps are keyed by display name and ordered,
/// so serialized output is deterministic.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSample {
    pub time: f64,
    pub resources_on_hand: BTreeMap<String, f64>,
    pub active_tasks: usize,
    pub queued_tasks: usize,
    pub blocked_tasks: BTreeMap<String, usize>,
    pub module_counts: BTreeMap<String, usize>,
    pub battery_kwh: f64,
    pub total_generated_kwh: f64,
    pub total_consumed_kwh: f64,
}

// ---------------------------------------------------------------------------
// Completed-task archive
// ---------------------------------------------------------------------------

/// Archived record of a completed task.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaskRecord {
    pub label: String,
    pub output: String,
    pub quantity: f64,
    /// Actual quantity delivered after quality scaling.
    pub produced_quantity: f64,
    pub completed_at: f64,
}

/// Ring of the most recent completed-task records.
#[derive(Debug, Default)]
pub struct CompletedLog {
    records: VecDeque<TaskRecord>,
    capacity: usize,
}

impl CompletedLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, record: TaskRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_vec(&self) -> Vec<TaskRecord> {
        self.records.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_buffer_trims_to_half() {
        let mut log = LogBuffer::new(10);
        for i in 0..11 {
            log.info(i as f64, format!("line {i}"));
        }
        // 11th push exceeds capacity: trimmed to 5 newest.
        assert_eq!(log.len(), 5);
        let first = log.iter().next().unwrap();
        assert_eq!(first.message, "line 6");
    }

    #[test]
    fn log_levels_recorded() {
        let mut log = LogBuffer::new(16);
        log.debug(0.0, "d");
        log.warn(0.1, "w");
        log.error(0.2, "e");
        let levels: Vec<LogLevel> = log.iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![LogLevel::Debug, LogLevel::Warn, LogLevel::Error]);
    }

    #[test]
    fn completed_log_keeps_most_recent() {
        let mut archive = CompletedLog::new(3);
        for i in 0..5 {
            archive.push(TaskRecord {
                label: format!("{i}:widget"),
                output: "widget".to_string(),
                quantity: 1.0,
                produced_quantity: 1.0,
                completed_at: i as f64,
            });
        }
        assert_eq!(archive.len(), 3);
        let records = archive.to_vec();
        assert_eq!(records[0].completed_at, 2.0);
        assert_eq!(records[2].completed_at, 4.0);
    }

    #[test]
    fn metrics_sample_serializes_deterministically() {
        let mut sample = MetricsSample {
            time: 1.0,
            resources_on_hand: BTreeMap::new(),
            active_tasks: 2,
            queued_tasks: 1,
            blocked_tasks: BTreeMap::new(),
            module_counts: BTreeMap::new(),
            battery_kwh: 10.0,
            total_generated_kwh: 20.0,
            total_consumed_kwh: 8.0,
        };
        sample.resources_on_hand.insert("zinc".to_string(), 1.0);
        sample.resources_on_hand.insert("alloy".to_string(), 2.0);

        let a = serde_json::to_string(&sample).unwrap();
        let b = serde_json::to_string(&sample).unwrap();
        assert_eq!(a, b);
        // BTreeMap keys come out sorted.
        assert!(a.find("alloy").unwrap() < a.find("zinc").unwrap());
    }
}
