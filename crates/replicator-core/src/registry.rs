//! Immutable registries for resources, recipes, and module types.
//!
//! Registries are built once at load time through [`RegistryBuilder`] and
//! frozen. The engine refers to entries exclusively through compact ids, so
//! comparisons are O(1) and ledgers can be array-backed.

use crate::id::{ModuleTypeId, RecipeId, ResourceId};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Resource definitions
// ---------------------------------------------------------------------------

/// Physical attributes of a resource.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResourceDef {
    pub name: String,
    /// Density in tonnes per cubic metre. Zero for software.
    pub density_t_per_m3: f64,
    /// Storage volume per unit, in cubic metres. Zero for software.
    pub volume_per_unit_m3: f64,
    /// Preferred storage temperature in degrees Celsius.
    pub storage_temperature_c: f64,
    /// Sensitivity to cleanroom contamination, in [0, 1].
    pub contamination_sensitivity: f64,
    pub hazardous: bool,
    pub recyclable: bool,
    /// Software resources are mass-less and are never consumed at dispatch.
    pub software: bool,
}

impl ResourceDef {
    /// A plain bulk material with the given name and unit volume.
    pub fn bulk(name: &str, density_t_per_m3: f64, volume_per_unit_m3: f64) -> Self {
        Self {
            name: name.to_string(),
            density_t_per_m3,
            volume_per_unit_m3,
            storage_temperature_c: 20.0,
            contamination_sensitivity: 0.0,
            hazardous: false,
            recyclable: false,
            software: false,
        }
    }

    /// A mass-less software resource.
    pub fn software(name: &str) -> Self {
        Self {
            name: name.to_string(),
            density_t_per_m3: 0.0,
            volume_per_unit_m3: 0.0,
            storage_temperature_c: 20.0,
            contamination_sensitivity: 0.0,
            hazardous: false,
            recyclable: false,
            software: true,
        }
    }

    /// Mass of one unit, in tonnes.
    pub fn weight_per_unit_t(&self) -> f64 {
        self.density_t_per_m3 * self.volume_per_unit_m3
    }
}

// ---------------------------------------------------------------------------
// Recipe definitions
// ---------------------------------------------------------------------------

/// A declarative transformation of inputs into one output resource.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RecipeDef {
    pub output: ResourceId,
    pub output_quantity: f64,
    /// Input resource -> quantity consumed per batch.
    pub inputs: Vec<(ResourceId, f64)>,
    pub energy_kwh: f64,
    pub time_hours: f64,
    pub module: ModuleTypeId,
    /// Whether multiple instances may share one batch (batch scaling).
    pub parallel_capable: bool,
    /// Machining tolerance in micrometres, if the step is tolerance-bound.
    pub tolerance_um: Option<f64>,
    /// Maximum acceptable contamination level, if cleanroom-bound.
    pub cleanroom_class: Option<f64>,
    /// Operator software that must be on hand (not consumed) to run.
    pub software_required: Option<ResourceId>,
    /// Waste resource -> quantity emitted per batch.
    pub waste_products: Vec<(ResourceId, f64)>,
    /// Nominal output quality in (0, 1].
    pub base_quality: f64,
}

impl RecipeDef {
    /// A minimal recipe with defaults for the optional fields.
    pub fn simple(
        output: ResourceId,
        output_quantity: f64,
        inputs: Vec<(ResourceId, f64)>,
        energy_kwh: f64,
        time_hours: f64,
        module: ModuleTypeId,
    ) -> Self {
        Self {
            output,
            output_quantity,
            inputs,
            energy_kwh,
            time_hours,
            module,
            parallel_capable: false,
            tolerance_um: None,
            cleanroom_class: None,
            software_required: None,
            waste_products: Vec::new(),
            base_quality: 1.0,
        }
    }

    /// Whether this is an extraction step (no material inputs).
    pub fn is_extraction(&self) -> bool {
        self.inputs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Module type definitions
// ---------------------------------------------------------------------------

/// Static parameters of one class of production module.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModuleTypeDef {
    pub name: String,
    /// Concurrent tasks one instance can host.
    pub parallel_processing_limit: u32,
    /// Nominal throughput multiplier at zero wear.
    pub max_throughput: f64,
    /// Idle electrical draw per instance, in kW.
    pub idle_power_kw: f64,
    pub mtbf_hours: f64,
    /// Wear accumulated per 1000 hours of runtime.
    pub degradation_rate: f64,
    pub quality_base_rate: f64,
    pub maintenance_interval_hours: f64,
    pub maintenance_duration_hours: f64,
    pub repair_duration_hours: f64,
    /// Fraction of wear removed by a maintenance or repair pass.
    pub wear_recovery_factor: f64,
    /// The resource whose production represents building one of these
    /// modules. Completing a task for this resource grows the fleet.
    pub product: Option<ResourceId>,
}

impl ModuleTypeDef {
    /// A module type with workable defaults for tests and small specs.
    pub fn basic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parallel_processing_limit: 1,
            max_throughput: 1.0,
            idle_power_kw: 0.1,
            mtbf_hours: 10_000.0,
            degradation_rate: 1.0,
            quality_base_rate: 1.0,
            maintenance_interval_hours: 500.0,
            maintenance_duration_hours: 4.0,
            repair_duration_hours: 12.0,
            wear_recovery_factor: 0.8,
            product: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for constructing an immutable [`Registry`].
/// Two-phase lifecycle: registration, then finalization via [`build`].
///
/// [`build`]: RegistryBuilder::build
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    resources: Vec<ResourceDef>,
    resource_name_to_id: HashMap<String, ResourceId>,
    recipes: Vec<RecipeDef>,
    modules: Vec<ModuleTypeDef>,
    module_name_to_id: HashMap<String, ModuleTypeId>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource. Duplicate names are rejected at build time.
    pub fn register_resource(&mut self, def: ResourceDef) -> ResourceId {
        let id = ResourceId(self.resources.len() as u32);
        self.resource_name_to_id.insert(def.name.clone(), id);
        self.resources.push(def);
        id
    }

    /// Register a module type.
    pub fn register_module_type(&mut self, def: ModuleTypeDef) -> ModuleTypeId {
        let id = ModuleTypeId(self.modules.len() as u32);
        self.module_name_to_id.insert(def.name.clone(), id);
        self.modules.push(def);
        id
    }

    /// Register a recipe. At most one recipe per output resource; the
    /// duplicate is rejected at build time.
    pub fn register_recipe(&mut self, def: RecipeDef) -> RecipeId {
        let id = RecipeId(self.recipes.len() as u32);
        self.recipes.push(def);
        id
    }

    /// Lookup resource id by name.
    pub fn resource_id(&self, name: &str) -> Option<ResourceId> {
        self.resource_name_to_id.get(name).copied()
    }

    /// Lookup module type id by name.
    pub fn module_id(&self, name: &str) -> Option<ModuleTypeId> {
        self.module_name_to_id.get(name).copied()
    }

    /// Finalize and build the immutable registry.
    ///
    /// Validates that every recipe reference resolves, that no output has two
    /// recipes, and that module product links point at declared resources.
    pub fn build(self) -> Result<Registry, RegistryError> {
        let resource_count = self.resources.len() as u32;
        let module_count = self.modules.len() as u32;

        if self.resource_name_to_id.len() != self.resources.len() {
            // A name was inserted twice; find it for the error message.
            let mut seen = HashMap::new();
            for def in &self.resources {
                if seen.insert(def.name.clone(), ()).is_some() {
                    return Err(RegistryError::DuplicateName(def.name.clone()));
                }
            }
        }
        if self.module_name_to_id.len() != self.modules.len() {
            let mut seen = HashMap::new();
            for def in &self.modules {
                if seen.insert(def.name.clone(), ()).is_some() {
                    return Err(RegistryError::DuplicateName(def.name.clone()));
                }
            }
        }

        let mut recipe_for_output: HashMap<ResourceId, RecipeId> = HashMap::new();
        for (idx, recipe) in self.recipes.iter().enumerate() {
            let id = RecipeId(idx as u32);
            if recipe.output.0 >= resource_count {
                return Err(RegistryError::InvalidResourceRef(recipe.output));
            }
            for &(input, _) in &recipe.inputs {
                if input.0 >= resource_count {
                    return Err(RegistryError::InvalidResourceRef(input));
                }
            }
            for &(waste, _) in &recipe.waste_products {
                if waste.0 >= resource_count {
                    return Err(RegistryError::InvalidResourceRef(waste));
                }
            }
            if let Some(software) = recipe.software_required
                && software.0 >= resource_count
            {
                return Err(RegistryError::InvalidResourceRef(software));
            }
            if recipe.module.0 >= module_count {
                return Err(RegistryError::InvalidModuleRef(recipe.module));
            }
            if recipe_for_output.insert(recipe.output, id).is_some() {
                let name = self.resources[recipe.output.0 as usize].name.clone();
                return Err(RegistryError::DuplicateRecipe(name));
            }
        }

        let mut product_to_module: HashMap<ResourceId, ModuleTypeId> = HashMap::new();
        for (idx, module) in self.modules.iter().enumerate() {
            if let Some(product) = module.product {
                if product.0 >= resource_count {
                    return Err(RegistryError::InvalidResourceRef(product));
                }
                product_to_module.insert(product, ModuleTypeId(idx as u32));
            }
        }

        Ok(Registry {
            resources: self.resources,
            resource_name_to_id: self.resource_name_to_id,
            recipes: self.recipes,
            recipe_for_output,
            modules: self.modules,
            module_name_to_id: self.module_name_to_id,
            product_to_module,
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable registry. Frozen after build(). Thread-safe to share.
#[derive(Debug)]
pub struct Registry {
    resources: Vec<ResourceDef>,
    resource_name_to_id: HashMap<String, ResourceId>,
    recipes: Vec<RecipeDef>,
    recipe_for_output: HashMap<ResourceId, RecipeId>,
    modules: Vec<ModuleTypeDef>,
    module_name_to_id: HashMap<String, ModuleTypeId>,
    product_to_module: HashMap<ResourceId, ModuleTypeId>,
}

impl Registry {
    pub fn resource(&self, id: ResourceId) -> Option<&ResourceDef> {
        self.resources.get(id.0 as usize)
    }

    pub fn recipe(&self, id: RecipeId) -> Option<&RecipeDef> {
        self.recipes.get(id.0 as usize)
    }

    pub fn module_type(&self, id: ModuleTypeId) -> Option<&ModuleTypeDef> {
        self.modules.get(id.0 as usize)
    }

    /// The recipe that produces the given resource, if one is declared.
    pub fn recipe_for(&self, output: ResourceId) -> Option<(RecipeId, &RecipeDef)> {
        let id = *self.recipe_for_output.get(&output)?;
        Some((id, &self.recipes[id.0 as usize]))
    }

    /// The module type whose fleet grows when this resource is produced.
    pub fn module_for_product(&self, resource: ResourceId) -> Option<ModuleTypeId> {
        self.product_to_module.get(&resource).copied()
    }

    pub fn resource_id(&self, name: &str) -> Option<ResourceId> {
        self.resource_name_to_id.get(name).copied()
    }

    pub fn module_id(&self, name: &str) -> Option<ModuleTypeId> {
        self.module_name_to_id.get(name).copied()
    }

    /// Resource name, or a placeholder when the id is stale.
    pub fn resource_name(&self, id: ResourceId) -> &str {
        self.resources
            .get(id.0 as usize)
            .map(|r| r.name.as_str())
            .unwrap_or("<unknown>")
    }

    pub fn module_name(&self, id: ModuleTypeId) -> &str {
        self.modules
            .get(id.0 as usize)
            .map(|m| m.name.as_str())
            .unwrap_or("<unknown>")
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn recipe_count(&self) -> usize {
        self.recipes.len()
    }

    pub fn module_type_count(&self) -> usize {
        self.modules.len()
    }

    pub fn resource_ids(&self) -> impl Iterator<Item = ResourceId> + '_ {
        (0..self.resources.len() as u32).map(ResourceId)
    }

    pub fn module_type_ids(&self) -> impl Iterator<Item = ModuleTypeId> + '_ {
        (0..self.modules.len() as u32).map(ModuleTypeId)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate name: {0}")]
    DuplicateName(String),
    #[error("duplicate recipe for output: {0}")]
    DuplicateRecipe(String),
    #[error("invalid resource reference: {0:?}")]
    InvalidResourceRef(ResourceId),
    #[error("invalid module type reference: {0:?}")]
    InvalidModuleRef(ModuleTypeId),
}
