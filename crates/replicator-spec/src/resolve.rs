//! Resolution: turn a parsed [`SpecDoc`] into the immutable registry, the
//! engine configuration, and the instantiated subsystems.
//!
//! Every numeric field is range-checked here, with failures carrying the
//! offending field path. The resolver is dry-run over every target module at
//! the end, so recipe cycles and unreachable targets fail at load time, not
//! at run time.

use crate::error::SpecError;
use crate::loader::AllowList;
use crate::schema::{ConstraintsDoc, RecipeDoc, SpecDoc};
use replicator_core::config::{EngineTuning, SimConfig};
use replicator_core::energy::EnergyParams;
use replicator_core::id::{ModuleTypeId, ResourceId};
use replicator_core::modules::FleetToggles;
use replicator_core::registry::{
    ModuleTypeDef, RecipeDef, Registry, RegistryBuilder, ResourceDef,
};
use replicator_core::resolver::Resolver;
use replicator_core::storage::StorageCaps;
use replicator_core::subsystem::Subsystem;
use std::collections::HashMap;
use std::path::Path;

/// Entity caps, enforced before registry construction.
pub const MAX_RESOURCES: usize = 5000;
pub const MAX_RECIPES: usize = 10_000;
pub const MAX_MODULE_TYPES: usize = 1000;

/// Everything needed to construct and run an engine.
pub struct LoadedSimulation {
    pub registry: Registry,
    pub config: SimConfig,
    pub subsystems: Vec<Box<dyn Subsystem>>,
    /// The fully-merged document (after inheritance and profile), echoed
    /// into the output report.
    pub document: serde_json::Value,
}

impl std::fmt::Debug for LoadedSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedSimulation")
            .field("resources", &self.registry.resource_count())
            .field("recipes", &self.registry.recipe_count())
            .field("module_types", &self.registry.module_type_count())
            .field("subsystems", &self.subsystems.len())
            .finish_non_exhaustive()
    }
}

// ===========================================================================
// Range checks
// ===========================================================================

fn invalid(field: impl Into<String>, detail: impl Into<String>) -> SpecError {
    SpecError::InvalidConfiguration {
        field: field.into(),
        detail: detail.into(),
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), SpecError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, format!("expected a value in [0, 1], got {value}")))
    }
}

fn check_positive(field: &str, value: f64) -> Result<(), SpecError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(field, format!("expected a positive value, got {value}")))
    }
}

fn check_non_negative(field: &str, value: f64) -> Result<(), SpecError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(
            field,
            format!("expected a non-negative value, got {value}"),
        ))
    }
}

fn check_finite(field: &str, value: f64) -> Result<(), SpecError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(field, format!("expected a finite value, got {value}")))
    }
}

fn validate_constraints(c: &ConstraintsDoc) -> Result<(), SpecError> {
    check_non_negative("constraints.solar_capacity_kw", c.solar_capacity_kw)?;
    check_positive("constraints.battery_capacity_kwh", c.battery_capacity_kwh)?;
    check_unit("constraints.charge_efficiency", c.charge_efficiency)?;
    check_unit("constraints.discharge_efficiency", c.discharge_efficiency)?;
    check_unit(
        "constraints.battery_reserve_fraction",
        c.battery_reserve_fraction,
    )?;
    check_positive("constraints.peak_sun_hours", c.peak_sun_hours)?;
    if !(0.0..24.0).contains(&c.sunrise_hour) {
        return Err(invalid(
            "constraints.sunrise_hour",
            format!("expected an hour in [0, 24), got {}", c.sunrise_hour),
        ));
    }
    if !(c.daylight_hours > 0.0 && c.daylight_hours <= 24.0) {
        return Err(invalid(
            "constraints.daylight_hours",
            format!("expected hours in (0, 24], got {}", c.daylight_hours),
        ));
    }
    if !(-90.0..=90.0).contains(&c.latitude) {
        return Err(invalid(
            "constraints.latitude",
            format!("expected degrees in [-90, 90], got {}", c.latitude),
        ));
    }
    check_unit("constraints.cloud_cover", c.cloud_cover)?;
    check_positive("constraints.max_storage_volume_m3", c.max_storage_volume_m3)?;
    check_positive("constraints.max_storage_weight_t", c.max_storage_weight_t)?;
    if c.parallel_processing_limit < 1 {
        return Err(invalid(
            "constraints.parallel_processing_limit",
            "expected at least 1",
        ));
    }
    if c.max_tasks_per_tick < 1 {
        return Err(invalid("constraints.max_tasks_per_tick", "expected at least 1"));
    }
    check_positive("constraints.dt_hours", c.dt_hours)?;
    check_positive("constraints.metric_interval_hours", c.metric_interval_hours)?;
    if !(c.learning_curve_factor > 0.0 && c.learning_curve_factor <= 1.0) {
        return Err(invalid(
            "constraints.learning_curve_factor",
            format!("expected a factor in (0, 1], got {}", c.learning_curve_factor),
        ));
    }
    check_non_negative("constraints.transport_overhead_kw", c.transport_overhead_kw)?;
    for (field, value) in [
        ("constraints.resolver_cache_capacity", c.resolver_cache_capacity),
        ("constraints.log_capacity", c.log_capacity),
        ("constraints.completed_log_capacity", c.completed_log_capacity),
        ("constraints.event_queue_capacity", c.event_queue_capacity),
        ("constraints.event_history_capacity", c.event_history_capacity),
    ] {
        if value < 1 {
            return Err(invalid(field, "expected at least 1"));
        }
    }
    check_non_negative("constraints.wear_failure_factor", c.wear_failure_factor)?;
    check_unit("constraints.quality_floor", c.quality_floor)?;
    check_positive("constraints.max_hours", c.max_hours)?;
    check_non_negative("constraints.max_wall_time_secs", c.max_wall_time_secs)?;
    Ok(())
}

// ===========================================================================
// Resolution
// ===========================================================================

/// Resolve a typed document into a runnable simulation.
pub fn resolve(
    doc: SpecDoc,
    document: serde_json::Value,
    spec_dir: &Path,
    allow: &AllowList,
) -> Result<LoadedSimulation, SpecError> {
    validate_constraints(&doc.constraints)?;

    // -- Entity caps --
    if doc.resources.len() > MAX_RESOURCES {
        return Err(invalid(
            "resources",
            format!("{} resources exceed the cap of {MAX_RESOURCES}", doc.resources.len()),
        ));
    }
    if doc.modules.len() > MAX_MODULE_TYPES {
        return Err(invalid(
            "modules",
            format!("{} module types exceed the cap of {MAX_MODULE_TYPES}", doc.modules.len()),
        ));
    }

    // -- Recipes: inline or external file --
    let recipe_docs = load_recipes(&doc, spec_dir, allow)?;
    if recipe_docs.len() > MAX_RECIPES {
        return Err(invalid(
            "recipes",
            format!("{} recipes exceed the cap of {MAX_RECIPES}", recipe_docs.len()),
        ));
    }

    // -- Resources --
    let mut builder = RegistryBuilder::new();
    let mut resource_ids: HashMap<String, ResourceId> = HashMap::new();
    for (name, res) in &doc.resources {
        let field = format!("resources.{name}");
        check_non_negative(&format!("{field}.density_t_per_m3"), res.density_t_per_m3)?;
        check_non_negative(
            &format!("{field}.volume_per_unit_m3"),
            res.volume_per_unit_m3,
        )?;
        check_finite(
            &format!("{field}.storage_temperature_c"),
            res.storage_temperature_c,
        )?;
        check_unit(
            &format!("{field}.contamination_sensitivity"),
            res.contamination_sensitivity,
        )?;
        let id = builder.register_resource(ResourceDef {
            name: name.clone(),
            density_t_per_m3: res.density_t_per_m3,
            volume_per_unit_m3: if res.software { 0.0 } else { res.volume_per_unit_m3 },
            storage_temperature_c: res.storage_temperature_c,
            contamination_sensitivity: res.contamination_sensitivity,
            hazardous: res.hazardous,
            recyclable: res.recyclable,
            software: res.software,
        });
        resource_ids.insert(name.clone(), id);
    }

    // -- Module types --
    let mut module_ids: HashMap<String, ModuleTypeId> = HashMap::new();
    for (name, module) in &doc.modules {
        let field = format!("modules.{name}");
        check_positive(&format!("{field}.max_throughput"), module.max_throughput)?;
        check_non_negative(&format!("{field}.idle_power_kw"), module.idle_power_kw)?;
        check_positive(&format!("{field}.mtbf_hours"), module.mtbf_hours)?;
        check_non_negative(&format!("{field}.degradation_rate"), module.degradation_rate)?;
        check_unit(&format!("{field}.quality_base_rate"), module.quality_base_rate)?;
        check_positive(
            &format!("{field}.maintenance_interval_hours"),
            module.maintenance_interval_hours,
        )?;
        check_non_negative(
            &format!("{field}.maintenance_duration_hours"),
            module.maintenance_duration_hours,
        )?;
        check_non_negative(
            &format!("{field}.repair_duration_hours"),
            module.repair_duration_hours,
        )?;
        check_unit(
            &format!("{field}.wear_recovery_factor"),
            module.wear_recovery_factor,
        )?;
        let limit = module
            .parallel_processing_limit
            .unwrap_or(doc.constraints.parallel_processing_limit);
        if limit < 1 {
            return Err(invalid(
                format!("{field}.parallel_processing_limit"),
                "expected at least 1",
            ));
        }

        // Product link: explicit name, else a resource named after the type.
        let product = match &module.product {
            Some(product_name) => Some(*resource_ids.get(product_name).ok_or_else(|| {
                invalid(
                    format!("{field}.product"),
                    format!("references undeclared resource '{product_name}'"),
                )
            })?),
            None => resource_ids.get(name.as_str()).copied(),
        };

        let id = builder.register_module_type(ModuleTypeDef {
            name: name.clone(),
            parallel_processing_limit: limit,
            max_throughput: module.max_throughput,
            idle_power_kw: module.idle_power_kw,
            mtbf_hours: module.mtbf_hours,
            degradation_rate: module.degradation_rate,
            quality_base_rate: module.quality_base_rate,
            maintenance_interval_hours: module.maintenance_interval_hours,
            maintenance_duration_hours: module.maintenance_duration_hours,
            repair_duration_hours: module.repair_duration_hours,
            wear_recovery_factor: module.wear_recovery_factor,
            product,
        });
        module_ids.insert(name.clone(), id);
    }

    // -- Extraction recipes synthesised from resource blocks --
    for (name, res) in &doc.resources {
        let Some(extraction) = &res.extraction else {
            continue;
        };
        let field = format!("resources.{name}.extraction");
        check_positive(&format!("{field}.time_hours"), extraction.time_hours)?;
        check_non_negative(&format!("{field}.energy_kwh"), extraction.energy_kwh)?;
        check_positive(&format!("{field}.output_quantity"), extraction.output_quantity)?;
        let module = *module_ids.get(&extraction.module).ok_or_else(|| {
            invalid(
                format!("{field}.module"),
                format!("references undeclared module '{}'", extraction.module),
            )
        })?;
        builder.register_recipe(RecipeDef::simple(
            resource_ids[name],
            extraction.output_quantity,
            Vec::new(),
            extraction.energy_kwh,
            extraction.time_hours,
            module,
        ));
    }

    // -- Declared recipes --
    for (index, recipe) in recipe_docs.iter().enumerate() {
        let field = format!("recipes[{index}]");
        let output = *resource_ids.get(&recipe.output).ok_or_else(|| {
            invalid(
                format!("{field}.output"),
                format!("references undeclared resource '{}'", recipe.output),
            )
        })?;
        check_positive(&format!("{field}.output_quantity"), recipe.output_quantity)?;
        check_non_negative(&format!("{field}.energy_kwh"), recipe.energy_kwh)?;
        check_positive(&format!("{field}.time_hours"), recipe.time_hours)?;
        if !(recipe.base_quality > 0.0 && recipe.base_quality <= 1.0) {
            return Err(invalid(
                format!("{field}.base_quality"),
                format!("expected a value in (0, 1], got {}", recipe.base_quality),
            ));
        }
        if let Some(tolerance) = recipe.tolerance_um {
            check_positive(&format!("{field}.tolerance_um"), tolerance)?;
        }
        if let Some(class) = recipe.cleanroom_class {
            check_positive(&format!("{field}.cleanroom_class"), class)?;
        }
        let module = *module_ids.get(&recipe.module).ok_or_else(|| {
            invalid(
                format!("{field}.module"),
                format!("references undeclared module '{}'", recipe.module),
            )
        })?;

        let mut inputs = Vec::with_capacity(recipe.inputs.len());
        for (input_name, qty) in &recipe.inputs {
            check_positive(&format!("{field}.inputs.{input_name}"), *qty)?;
            let input = *resource_ids.get(input_name).ok_or_else(|| {
                invalid(
                    format!("{field}.inputs.{input_name}"),
                    format!("references undeclared resource '{input_name}'"),
                )
            })?;
            inputs.push((input, *qty));
        }
        let mut waste = Vec::with_capacity(recipe.waste_products.len());
        for (waste_name, qty) in &recipe.waste_products {
            check_non_negative(&format!("{field}.waste_products.{waste_name}"), *qty)?;
            let waste_id = *resource_ids.get(waste_name).ok_or_else(|| {
                invalid(
                    format!("{field}.waste_products.{waste_name}"),
                    format!("references undeclared resource '{waste_name}'"),
                )
            })?;
            waste.push((waste_id, *qty));
        }
        let software_required = match &recipe.software_required {
            Some(software_name) => Some(*resource_ids.get(software_name).ok_or_else(|| {
                invalid(
                    format!("{field}.software_required"),
                    format!("references undeclared resource '{software_name}'"),
                )
            })?),
            None => None,
        };

        builder.register_recipe(RecipeDef {
            output,
            output_quantity: recipe.output_quantity,
            inputs,
            energy_kwh: recipe.energy_kwh,
            time_hours: recipe.time_hours,
            module,
            parallel_capable: recipe.parallel_capable,
            tolerance_um: recipe.tolerance_um,
            cleanroom_class: recipe.cleanroom_class,
            software_required,
            waste_products: waste,
            base_quality: recipe.base_quality,
        });
    }

    let registry = builder.build()?;

    // -- Initial state --
    let mut seed_modules: Vec<(ModuleTypeId, u32)> = Vec::new();
    for (name, &id) in &module_ids {
        let count = doc.initial_state.modules.get(name).copied().unwrap_or(1);
        seed_modules.push((id, count));
    }
    seed_modules.sort_by_key(|&(id, _)| id);
    for name in doc.initial_state.modules.keys() {
        if !module_ids.contains_key(name) {
            return Err(invalid(
                format!("initial_state.modules.{name}"),
                "references undeclared module",
            ));
        }
    }

    let mut seed_resources: Vec<(ResourceId, f64)> = Vec::new();
    for (name, &qty) in &doc.initial_state.resources {
        check_non_negative(&format!("initial_state.resources.{name}"), qty)?;
        let id = *resource_ids.get(name).ok_or_else(|| {
            invalid(
                format!("initial_state.resources.{name}"),
                "references undeclared resource",
            )
        })?;
        seed_resources.push((id, qty));
    }
    seed_resources.sort_by_key(|&(id, _)| id);
    check_non_negative("initial_state.battery_kwh", doc.initial_state.battery_kwh)?;

    // -- Targets: declared list, or every module type with a product --
    let target_modules: Vec<ModuleTypeId> = match &doc.initial_state.target_modules {
        Some(names) => {
            let mut targets = Vec::with_capacity(names.len());
            for name in names {
                let id = *module_ids.get(name).ok_or_else(|| {
                    invalid(
                        format!("initial_state.target_modules.{name}"),
                        "references undeclared module",
                    )
                })?;
                targets.push(id);
            }
            targets
        }
        None => registry
            .module_type_ids()
            .filter(|&id| {
                registry
                    .module_type(id)
                    .is_some_and(|def| def.product.is_some())
            })
            .collect(),
    };

    // -- Load-time resolver dry run over every target --
    let mut resolver = Resolver::new(doc.constraints.resolver_cache_capacity);
    for &target in &target_modules {
        let def = registry.module_type(target).expect("target id resolved above");
        let Some(product) = def.product else {
            return Err(invalid(
                format!("initial_state.target_modules.{}", def.name),
                "target module has no product resource",
            ));
        };
        if registry.recipe_for(product).is_none() {
            return Err(invalid(
                format!("modules.{}.product", def.name),
                format!(
                    "no recipe produces '{}'; target is unreachable",
                    registry.resource_name(product)
                ),
            ));
        }
        resolver.raw_requirements(&registry, product, 1.0)?;
    }

    // -- Engine configuration --
    let c = &doc.constraints;
    let latitude_factor = c.latitude.to_radians().cos().max(0.05);
    let config = SimConfig {
        seed: c.seed,
        max_hours: c.max_hours,
        max_wall_time_secs: c.max_wall_time_secs,
        tuning: EngineTuning {
            dt_hours: c.dt_hours,
            max_tasks_per_tick: c.max_tasks_per_tick,
            metric_interval_hours: c.metric_interval_hours,
            log_capacity: c.log_capacity,
            completed_log_capacity: c.completed_log_capacity,
            event_queue_capacity: c.event_queue_capacity,
            event_history_capacity: c.event_history_capacity,
            resolver_cache_capacity: c.resolver_cache_capacity,
            learning_curve_factor: c.learning_curve_factor,
            transport_overhead_kw: c.transport_overhead_kw,
        },
        energy: EnergyParams {
            solar_capacity_kw: c.solar_capacity_kw,
            battery_capacity_kwh: c.battery_capacity_kwh,
            charge_efficiency: c.charge_efficiency,
            discharge_efficiency: c.discharge_efficiency,
            reserve_fraction: c.battery_reserve_fraction,
            peak_sun_hours: c.peak_sun_hours * latitude_factor,
            sunrise_hour: c.sunrise_hour,
            daylight_hours: c.daylight_hours,
            enable_weather: c.enable_weather,
            cloud_cover: c.cloud_cover,
        },
        fleet: FleetToggles {
            enable_degradation: c.enable_degradation,
            enable_maintenance: c.enable_maintenance,
            wear_failure_factor: c.wear_failure_factor,
            quality_floor: c.quality_floor,
        },
        storage_caps: if c.enable_storage_limits {
            StorageCaps {
                max_volume_m3: c.max_storage_volume_m3,
                max_weight_t: c.max_storage_weight_t,
            }
        } else {
            StorageCaps::UNLIMITED
        },
        seed_modules,
        seed_resources,
        initial_battery_kwh: doc.initial_state.battery_kwh,
        target_modules,
        enable_contamination: c.enable_contamination,
        enable_quality_control: c.enable_quality_control,
        enable_batch_processing: c.enable_batch_processing,
    };

    // -- Subsystems --
    let subsystems = instantiate_subsystems(&doc, &registry)?;

    Ok(LoadedSimulation {
        registry,
        config,
        subsystems,
        document,
    })
}

/// Effective subsystem enablement: the `subsystems` section overrides the
/// constraint toggle; the implementation tag defaults to the subsystem name.
fn instantiate_subsystems(
    doc: &SpecDoc,
    registry: &Registry,
) -> Result<Vec<Box<dyn Subsystem>>, SpecError> {
    let c = &doc.constraints;
    let defaults = [
        ("thermal", c.enable_thermal_management),
        ("waste_recycling", c.enable_waste_recycling),
        ("software_production", c.enable_software_production),
        ("contamination", c.enable_contamination),
        ("transport", c.enable_transport_time),
    ];

    let mut subsystems = Vec::new();
    for (name, toggle) in defaults {
        let enabled = doc.subsystems.get(name).copied().unwrap_or(toggle);
        if !enabled {
            continue;
        }
        let tag = doc
            .subsystem_implementations
            .get(name)
            .map(String::as_str)
            .unwrap_or(name);
        let data = doc
            .subsystem_data
            .get(tag)
            .or_else(|| doc.subsystem_data.get(name))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        subsystems.push(replicator_subsystems::instantiate(tag, &data, registry)?);
    }
    Ok(subsystems)
}

/// Load recipes from the inline list or the external file (never both).
fn load_recipes(
    doc: &SpecDoc,
    spec_dir: &Path,
    allow: &AllowList,
) -> Result<Vec<RecipeDoc>, SpecError> {
    match (&doc.recipes, &doc.recipes_file) {
        (Some(_), Some(_)) => Err(invalid(
            "recipes_file",
            "both inline recipes and recipes_file are set; pick one",
        )),
        (Some(recipes), None) => Ok(recipes.clone()),
        (None, Some(file)) => {
            let relative = Path::new(file);
            let path = if relative.is_absolute() {
                relative.to_path_buf()
            } else {
                spec_dir.join(relative)
            };
            let value = crate::loader::read_document(&path, allow)?;
            // TOML cannot express a bare top-level array; accept either the
            // array itself or an object with a `recipes` key.
            let list = match &value {
                serde_json::Value::Array(_) => value,
                serde_json::Value::Object(map) => map
                    .get("recipes")
                    .cloned()
                    .ok_or_else(|| SpecError::Parse {
                        file: path.clone(),
                        detail: "expected a recipe list or a 'recipes' key".to_string(),
                    })?,
                _ => {
                    return Err(SpecError::Parse {
                        file: path,
                        detail: "expected a recipe list".to_string(),
                    });
                }
            };
            serde_json::from_value(list).map_err(|e| SpecError::Parse {
                file: path,
                detail: e.to_string(),
            })
        }
        (None, None) => Ok(Vec::new()),
    }
}
