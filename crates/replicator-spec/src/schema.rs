//! Serde structs for the declarative factory specification document.
//!
//! These define the on-disk shape of a spec in RON, TOML, or JSON. They are
//! deserialized from the merged document (after inheritance and profile
//! application) and then resolved into engine types by [`crate::resolve`].

use serde::Deserialize;
use std::collections::BTreeMap;

// ===========================================================================
// Top level
// ===========================================================================

/// The whole specification document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecDoc {
    pub metadata: MetadataDoc,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceDoc>,
    /// Inline recipe list. Mutually exclusive with `recipes_file`.
    #[serde(default)]
    pub recipes: Option<Vec<RecipeDoc>>,
    /// External recipe file, resolved against the allow-list.
    #[serde(default)]
    pub recipes_file: Option<String>,
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleDoc>,
    #[serde(default)]
    pub initial_state: InitialStateDoc,
    #[serde(default)]
    pub constraints: ConstraintsDoc,
    /// Per-subsystem enable overrides (defaults come from the toggles).
    #[serde(default)]
    pub subsystems: BTreeMap<String, bool>,
    /// Named override blocks, deep-merged over the base when selected.
    #[serde(default)]
    pub profiles: BTreeMap<String, serde_json::Value>,
    /// Subsystem name -> implementation tag.
    #[serde(default)]
    pub subsystem_implementations: BTreeMap<String, String>,
    /// Implementation tag -> parameter block.
    #[serde(default)]
    pub subsystem_data: BTreeMap<String, serde_json::Value>,
}

/// Document identity plus optional inheritance parent.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataDoc {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Path of a parent spec this one overrides, relative to this file.
    #[serde(default)]
    pub parent: Option<String>,
}

// ===========================================================================
// Resources
// ===========================================================================

/// A resource declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceDoc {
    /// Density in tonnes per cubic metre.
    pub density_t_per_m3: f64,
    /// Storage volume of one unit, in cubic metres.
    pub volume_per_unit_m3: f64,
    pub storage_temperature_c: f64,
    /// Sensitivity to contamination, in [0, 1].
    pub contamination_sensitivity: f64,
    pub hazardous: bool,
    pub recyclable: bool,
    /// Software resources are mass-less and never consumed.
    pub software: bool,
    /// Present on mineable raw resources; synthesised into a zero-input
    /// extraction recipe at load.
    pub extraction: Option<ExtractionDoc>,
}

impl Default for ResourceDoc {
    fn default() -> Self {
        Self {
            density_t_per_m3: 1.0,
            volume_per_unit_m3: 0.001,
            storage_temperature_c: 20.0,
            contamination_sensitivity: 0.0,
            hazardous: false,
            recyclable: false,
            software: false,
            extraction: None,
        }
    }
}

/// How a raw resource is mined.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionDoc {
    /// Module type doing the mining.
    pub module: String,
    pub time_hours: f64,
    pub energy_kwh: f64,
    #[serde(default = "default_output_quantity")]
    pub output_quantity: f64,
}

fn default_output_quantity() -> f64 {
    1.0
}

// ===========================================================================
// Recipes
// ===========================================================================

/// A recipe declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipeDoc {
    pub output: String,
    #[serde(default = "default_output_quantity")]
    pub output_quantity: f64,
    #[serde(default)]
    pub inputs: BTreeMap<String, f64>,
    pub energy_kwh: f64,
    pub time_hours: f64,
    /// Required module type.
    pub module: String,
    #[serde(default)]
    pub parallel_capable: bool,
    #[serde(default)]
    pub tolerance_um: Option<f64>,
    #[serde(default)]
    pub cleanroom_class: Option<f64>,
    #[serde(default)]
    pub software_required: Option<String>,
    #[serde(default)]
    pub waste_products: BTreeMap<String, f64>,
    #[serde(default = "default_base_quality")]
    pub base_quality: f64,
}

fn default_base_quality() -> f64 {
    1.0
}

// ===========================================================================
// Modules
// ===========================================================================

/// A module type declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModuleDoc {
    /// Concurrent tasks per instance. Falls back to the global constraint.
    pub parallel_processing_limit: Option<u32>,
    pub max_throughput: f64,
    pub idle_power_kw: f64,
    pub mtbf_hours: f64,
    /// Wear per 1000 hours of active runtime.
    pub degradation_rate: f64,
    pub quality_base_rate: f64,
    pub maintenance_interval_hours: f64,
    pub maintenance_duration_hours: f64,
    pub repair_duration_hours: f64,
    pub wear_recovery_factor: f64,
    /// Resource whose production builds one of these modules. Defaults to a
    /// resource with the same name as the module type, when one exists.
    pub product: Option<String>,
}

impl Default for ModuleDoc {
    fn default() -> Self {
        Self {
            parallel_processing_limit: None,
            max_throughput: 1.0,
            idle_power_kw: 0.1,
            mtbf_hours: 10_000.0,
            degradation_rate: 1.0,
            quality_base_rate: 0.98,
            maintenance_interval_hours: 500.0,
            maintenance_duration_hours: 4.0,
            repair_duration_hours: 12.0,
            wear_recovery_factor: 0.8,
            product: None,
        }
    }
}

// ===========================================================================
// Initial state
// ===========================================================================

/// Seed modules, starting stock, and the battery's starting charge.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InitialStateDoc {
    /// Seed counts per module type. Every declared type defaults to one.
    pub modules: BTreeMap<String, u32>,
    /// Starting stock per resource.
    pub resources: BTreeMap<String, f64>,
    pub battery_kwh: f64,
    /// Module types that must be produced for self-replication. Defaults to
    /// every module type with a product resource.
    pub target_modules: Option<Vec<String>>,
}

// ===========================================================================
// Constraints
// ===========================================================================

/// The numeric knobs and feature toggles.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConstraintsDoc {
    // -- Energy --
    pub solar_capacity_kw: f64,
    pub battery_capacity_kwh: f64,
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,
    pub battery_reserve_fraction: f64,
    pub peak_sun_hours: f64,
    pub sunrise_hour: f64,
    pub daylight_hours: f64,
    /// Site latitude in degrees; scales effective insolation.
    pub latitude: f64,
    pub cloud_cover: f64,

    // -- Storage --
    pub max_storage_volume_m3: f64,
    pub max_storage_weight_t: f64,

    // -- Scheduling --
    pub parallel_processing_limit: u32,
    pub max_tasks_per_tick: usize,
    pub dt_hours: f64,
    pub metric_interval_hours: f64,
    pub learning_curve_factor: f64,
    pub transport_overhead_kw: f64,
    pub resolver_cache_capacity: usize,
    pub log_capacity: usize,
    pub completed_log_capacity: usize,
    pub event_queue_capacity: usize,
    pub event_history_capacity: usize,

    // -- Module wear --
    pub wear_failure_factor: f64,
    pub quality_floor: f64,

    // -- Run bounds --
    pub max_hours: f64,
    pub max_wall_time_secs: f64,
    pub seed: u64,

    // -- Feature toggles --
    pub enable_degradation: bool,
    pub enable_weather: bool,
    pub enable_maintenance: bool,
    pub enable_storage_limits: bool,
    pub enable_batch_processing: bool,
    pub enable_transport_time: bool,
    pub enable_contamination: bool,
    pub enable_thermal_management: bool,
    pub enable_software_production: bool,
    pub enable_waste_recycling: bool,
    pub enable_quality_control: bool,
}

impl Default for ConstraintsDoc {
    fn default() -> Self {
        Self {
            solar_capacity_kw: 100.0,
            battery_capacity_kwh: 500.0,
            charge_efficiency: 0.95,
            discharge_efficiency: 0.95,
            battery_reserve_fraction: 0.2,
            peak_sun_hours: 8.0,
            sunrise_hour: 6.0,
            daylight_hours: 12.0,
            latitude: 0.0,
            cloud_cover: 0.3,
            max_storage_volume_m3: 1000.0,
            max_storage_weight_t: 2000.0,
            parallel_processing_limit: 1,
            max_tasks_per_tick: 5,
            dt_hours: 0.1,
            metric_interval_hours: 1.0,
            learning_curve_factor: 0.92,
            transport_overhead_kw: 0.5,
            resolver_cache_capacity: 1024,
            log_capacity: 5000,
            completed_log_capacity: 100,
            event_queue_capacity: 10_000,
            event_history_capacity: 1000,
            wear_failure_factor: 4.0,
            quality_floor: 0.5,
            max_hours: 10_000.0,
            max_wall_time_secs: 3600.0,
            seed: 0,
            enable_degradation: true,
            enable_weather: false,
            enable_maintenance: true,
            enable_storage_limits: true,
            enable_batch_processing: false,
            enable_transport_time: false,
            enable_contamination: false,
            enable_thermal_management: false,
            enable_software_production: false,
            enable_waste_recycling: false,
            enable_quality_control: false,
        }
    }
}
