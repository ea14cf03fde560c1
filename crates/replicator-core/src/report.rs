//! The structured output document emitted at the end of a run.

use crate::metrics::{LogEntry, MetricsSample, TaskRecord};
use std::collections::BTreeMap;

/// Why the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Every target module type has been produced at least once.
    Replicated,
    MaxHours,
    WallTime,
    Cancelled,
}

/// Final run status.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FinalStatus {
    pub terminated_reason: TerminationReason,
    pub sim_time_hours: f64,
    /// Wall-clock seconds. Excluded from determinism comparisons.
    pub wall_time_seconds: f64,
}

/// The complete output log of one simulation run.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SimulationReport {
    /// The resolved configuration after profile application, echoed back.
    pub config: serde_json::Value,
    /// Raw-material requirements computed for the full replication goal.
    pub initial_requirements: BTreeMap<String, f64>,
    /// Per-hour metrics series.
    pub metrics: Vec<MetricsSample>,
    /// Most recent completed-task records.
    pub completed_tasks: Vec<TaskRecord>,
    /// Most recent log lines.
    pub log: Vec<LogEntry>,
    /// Final module counts by type name.
    pub module_counts: BTreeMap<String, usize>,
    pub status: FinalStatus,
}

impl SimulationReport {
    /// Serialized form with wall-clock fields zeroed, for determinism
    /// comparisons between runs.
    pub fn deterministic_json(&self) -> serde_json::Result<String> {
        let mut clone = self.clone();
        clone.status.wall_time_seconds = 0.0;
        serde_json::to_string_pretty(&clone)
    }
}
