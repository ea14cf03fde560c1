//! Resolved engine configuration.
//!
//! Everything tunable lives here as a named field with a default; the engine
//! code itself carries no numeric constants. The configuration is produced by
//! the loader crate, validated there, and threaded into the engine as an
//! immutable value.

use crate::energy::EnergyParams;
use crate::id::{ModuleTypeId, ResourceId};
use crate::modules::FleetToggles;
use crate::storage::StorageCaps;

/// Scheduler and bookkeeping knobs.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EngineTuning {
    /// Simulated hours per tick.
    pub dt_hours: f64,
    /// New task starts allowed per tick.
    pub max_tasks_per_tick: usize,
    /// Simulated hours between metric samples.
    pub metric_interval_hours: f64,
    /// Log ring capacity; trimmed to half when exceeded.
    pub log_capacity: usize,
    /// Completed-task records retained.
    pub completed_log_capacity: usize,
    /// Event bus queue capacity.
    pub event_queue_capacity: usize,
    /// Event history retained for inspection.
    pub event_history_capacity: usize,
    /// Resolver raw-requirement cache entries.
    pub resolver_cache_capacity: usize,
    /// Speed-up per ten completions of the same output, applied as
    /// `time * factor^k` with factor in (0, 1].
    pub learning_curve_factor: f64,
    /// Fixed transport overhead folded into base consumption, in kW.
    pub transport_overhead_kw: f64,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            dt_hours: 0.1,
            max_tasks_per_tick: 5,
            metric_interval_hours: 1.0,
            log_capacity: 5000,
            completed_log_capacity: 100,
            event_queue_capacity: 10_000,
            event_history_capacity: 1000,
            resolver_cache_capacity: 1024,
            learning_curve_factor: 0.92,
            transport_overhead_kw: 0.5,
        }
    }
}

/// The immutable, fully-resolved simulation configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SimConfig {
    pub seed: u64,
    /// Simulated-time bound, in hours.
    pub max_hours: f64,
    /// Wall-clock bound, in seconds.
    pub max_wall_time_secs: f64,
    pub tuning: EngineTuning,
    pub energy: EnergyParams,
    pub fleet: FleetToggles,
    pub storage_caps: StorageCaps,
    /// Seed module counts. The seed factory begins with one of each declared
    /// type unless the configuration says otherwise.
    pub seed_modules: Vec<(ModuleTypeId, u32)>,
    /// Starting stock.
    pub seed_resources: Vec<(ResourceId, f64)>,
    pub initial_battery_kwh: f64,
    /// Module types that must each be produced once for the run to count as
    /// self-replication.
    pub target_modules: Vec<ModuleTypeId>,
    pub enable_contamination: bool,
    pub enable_quality_control: bool,
    pub enable_batch_processing: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            max_hours: 10_000.0,
            max_wall_time_secs: 3600.0,
            tuning: EngineTuning::default(),
            energy: EnergyParams::default(),
            fleet: FleetToggles::default(),
            storage_caps: StorageCaps::UNLIMITED,
            seed_modules: Vec::new(),
            seed_resources: Vec::new(),
            initial_battery_kwh: 0.0,
            target_modules: Vec::new(),
            enable_contamination: false,
            enable_quality_control: false,
            enable_batch_processing: false,
        }
    }
}
