//! Shared helpers for unit, integration, and property tests.

use crate::config::SimConfig;
use crate::energy::EnergyParams;
use crate::id::{ModuleTypeId, ResourceId};
use crate::registry::{ModuleTypeDef, RecipeDef, Registry, RegistryBuilder, ResourceDef};

/// A lightweight bulk resource.
pub fn bulk(name: &str) -> ResourceDef {
    ResourceDef::bulk(name, 1.0, 0.001)
}

/// Energy parameters generous enough that nothing ever blocks on energy.
pub fn abundant_energy() -> EnergyParams {
    EnergyParams {
        solar_capacity_kw: 10_000.0,
        battery_capacity_kwh: 100_000.0,
        charge_efficiency: 1.0,
        discharge_efficiency: 1.0,
        reserve_fraction: 0.0,
        ..EnergyParams::default()
    }
}

/// A module type with degradation, maintenance, and failure switched off via
/// unreachable thresholds.
pub fn steady_module(name: &str) -> ModuleTypeDef {
    let mut def = ModuleTypeDef::basic(name);
    def.mtbf_hours = f64::INFINITY;
    def.maintenance_interval_hours = f64::INFINITY;
    def.idle_power_kw = 0.0;
    def
}

/// The two-recipe trivial spec: `beta <- 2 alpha` on one assembler.
/// Returns (registry, alpha, beta, assembler).
pub fn two_recipe_registry() -> (Registry, ResourceId, ResourceId, ModuleTypeId) {
    let mut b = RegistryBuilder::new();
    let alpha = b.register_resource(bulk("alpha"));
    let beta = b.register_resource(bulk("beta"));
    let asm = b.register_module_type(steady_module("assembler"));
    b.register_recipe(RecipeDef::simple(
        beta,
        1.0,
        vec![(alpha, 2.0)],
        1.0,
        1.0,
        asm,
    ));
    let registry = b.build().unwrap();
    (registry, alpha, beta, asm)
}

/// The dependency chain spec: `gamma <- beta <- alpha` on one assembler.
/// Returns (registry, alpha, beta, gamma, assembler).
pub fn chain_registry() -> (Registry, ResourceId, ResourceId, ResourceId, ModuleTypeId) {
    let mut b = RegistryBuilder::new();
    let alpha = b.register_resource(bulk("alpha"));
    let beta = b.register_resource(bulk("beta"));
    let gamma = b.register_resource(bulk("gamma"));
    let asm = b.register_module_type(steady_module("assembler"));
    b.register_recipe(RecipeDef::simple(
        beta,
        1.0,
        vec![(alpha, 1.0)],
        1.0,
        1.0,
        asm,
    ));
    b.register_recipe(RecipeDef::simple(
        gamma,
        1.0,
        vec![(beta, 1.0)],
        1.0,
        1.0,
        asm,
    ));
    let registry = b.build().unwrap();
    (registry, alpha, beta, gamma, asm)
}

/// A config with calm defaults: fast wall bound off, degradation off, and
/// abundant energy with a full battery.
pub fn calm_config() -> SimConfig {
    let mut config = SimConfig {
        energy: abundant_energy(),
        initial_battery_kwh: 100_000.0,
        ..SimConfig::default()
    };
    config.fleet.enable_degradation = false;
    config.fleet.enable_maintenance = false;
    config
}

/// A four-module self-replicating factory: mining -> refining -> electronics
/// -> assembly, where each module type's own product is buildable.
///
/// Returns (registry, target module ids).
pub fn self_replicating_registry() -> (Registry, Vec<ModuleTypeId>) {
    let mut b = RegistryBuilder::new();

    let regolith = b.register_resource(ResourceDef::bulk("regolith", 1.5, 0.01));
    let metal = b.register_resource(ResourceDef::bulk("metal", 7.0, 0.004));
    let electronics = b.register_resource(ResourceDef::bulk("electronics", 2.0, 0.002));
    let mining_module = b.register_resource(ResourceDef::bulk("mining_module", 3.0, 1.0));
    let refining_module = b.register_resource(ResourceDef::bulk("refining_module", 3.0, 1.0));
    let electronics_module = b.register_resource(ResourceDef::bulk("electronics_module", 2.0, 1.0));
    let assembly_module = b.register_resource(ResourceDef::bulk("assembly_module", 3.0, 1.0));

    let mut mining = steady_module("mining");
    mining.product = Some(mining_module);
    let mining = b.register_module_type(mining);
    let mut refining = steady_module("refining");
    refining.product = Some(refining_module);
    let refining = b.register_module_type(refining);
    let mut elec = steady_module("electronics_fab");
    elec.product = Some(electronics_module);
    let elec = b.register_module_type(elec);
    let mut assembly = steady_module("assembly");
    assembly.product = Some(assembly_module);
    let assembly = b.register_module_type(assembly);

    // Extraction: regolith from the mining module.
    b.register_recipe(RecipeDef::simple(regolith, 10.0, vec![], 2.0, 1.0, mining));
    // Refining: metal from regolith.
    b.register_recipe(RecipeDef::simple(
        metal,
        2.0,
        vec![(regolith, 5.0)],
        3.0,
        1.0,
        refining,
    ));
    // Electronics from metal.
    b.register_recipe(RecipeDef::simple(
        electronics,
        1.0,
        vec![(metal, 1.0)],
        2.0,
        1.0,
        elec,
    ));
    // Module products, all built on the assembly module.
    b.register_recipe(RecipeDef::simple(
        mining_module,
        1.0,
        vec![(metal, 4.0)],
        10.0,
        4.0,
        assembly,
    ));
    b.register_recipe(RecipeDef::simple(
        refining_module,
        1.0,
        vec![(metal, 3.0), (electronics, 1.0)],
        10.0,
        4.0,
        assembly,
    ));
    b.register_recipe(RecipeDef::simple(
        electronics_module,
        1.0,
        vec![(metal, 2.0), (electronics, 3.0)],
        12.0,
        5.0,
        assembly,
    ));
    b.register_recipe(RecipeDef::simple(
        assembly_module,
        1.0,
        vec![(metal, 5.0), (electronics, 2.0)],
        15.0,
        6.0,
        assembly,
    ));

    let registry = b.build().unwrap();
    (registry, vec![mining, refining, elec, assembly])
}
