//! Integration tests for the replicator simulation engine.
//!
//! These exercise end-to-end behavior across the full tick pipeline:
//! goal expansion, dispatch, blocking and rescans, module growth, energy
//! accounting, timeouts, and determinism.

use replicator_core::energy::EnergyParams;
use replicator_core::engine::Engine;
use replicator_core::event::{Event, EventKind};
use replicator_core::id::ResourceId;
use replicator_core::registry::{ModuleTypeDef, RecipeDef, RegistryBuilder, ResourceDef};
use replicator_core::report::TerminationReason;
use replicator_core::resolver::{ResolveError, Resolver};
use replicator_core::subsystem::{Subsystem, TickContext};
use replicator_core::task::{BlockCause, TaskStatus};
use replicator_core::test_utils::*;

// ===========================================================================
// Test 1: Cycle detection happens at load time, not run time
// ===========================================================================

#[test]
fn cyclic_recipes_fail_before_any_tick() {
    let mut b = RegistryBuilder::new();
    let a = b.register_resource(bulk("a"));
    let bb = b.register_resource(bulk("b"));
    let asm = b.register_module_type(steady_module("assembler"));
    b.register_recipe(RecipeDef::simple(a, 1.0, vec![(bb, 1.0)], 1.0, 1.0, asm));
    b.register_recipe(RecipeDef::simple(bb, 1.0, vec![(a, 1.0)], 1.0, 1.0, asm));
    let registry = b.build().unwrap();

    // The loader's dry run is a plain resolver call; it fails with the
    // offending cycle path before an engine ever exists.
    let mut resolver = Resolver::new(16);
    let err = resolver.raw_requirements(&registry, a, 1.0).unwrap_err();
    let ResolveError::CircularDependency { path } = err;
    assert_eq!(path.len(), 3);
    assert_eq!(path[0], path[2]);
}

// ===========================================================================
// Test 2: Zero ores mined -- everything blocks, nothing crashes
// ===========================================================================

#[test]
fn zero_ore_boundary_blocks_and_times_out() {
    // widget <- 2 ore, but ore has no recipe and no stock.
    let mut b = RegistryBuilder::new();
    let ore = b.register_resource(bulk("ore"));
    let widget = b.register_resource(bulk("widget"));
    let asm = b.register_module_type(steady_module("assembler"));
    b.register_recipe(RecipeDef::simple(
        widget,
        1.0,
        vec![(ore, 2.0)],
        1.0,
        1.0,
        asm,
    ));
    let registry = b.build().unwrap();

    let mut config = calm_config();
    config.seed_modules = vec![(asm, 1)];
    config.max_hours = 10.0;

    let mut engine = Engine::new(registry, config, Vec::new()).unwrap();
    let goal = engine.enqueue_goal(widget, 1.0).unwrap().unwrap();

    let report = engine.run().unwrap();
    assert_eq!(report.status.terminated_reason, TerminationReason::MaxHours);
    assert_eq!(
        engine.queue().get(goal).unwrap().status,
        TaskStatus::Blocked(BlockCause::Resources)
    );
}

// ===========================================================================
// Test 3: Wall-clock timeout fires within one tick
// ===========================================================================

#[test]
fn wall_clock_timeout_yields_partial_report() {
    let (registry, targets) = self_replicating_registry();
    let mut config = calm_config();
    config.seed_modules = targets.iter().map(|&ty| (ty, 1)).collect();
    config.target_modules = targets;
    config.max_wall_time_secs = 0.0;

    let mut engine = Engine::new(registry, config, Vec::new()).unwrap();
    let report = engine.run().unwrap();
    assert_eq!(report.status.terminated_reason, TerminationReason::WallTime);
    assert_eq!(report.status.sim_time_hours, 0.0);
    // The partial log still carries the goal-expansion lines.
    assert!(!report.log.is_empty());
}

// ===========================================================================
// Test 4: Parallel limit 1 serializes a module type
// ===========================================================================

#[test]
fn parallel_limit_one_serializes_starts() {
    let mut b = RegistryBuilder::new();
    let widget = b.register_resource(bulk("widget"));
    let asm = b.register_module_type(steady_module("assembler"));
    b.register_recipe(RecipeDef::simple(widget, 1.0, vec![], 1.0, 1.0, asm));
    let registry = b.build().unwrap();

    let mut config = calm_config();
    config.seed_modules = vec![(asm, 1)];

    let mut engine = Engine::new(registry, config, Vec::new()).unwrap();
    for _ in 0..4 {
        engine.enqueue_goal(widget, 1.0).unwrap();
    }
    engine.step().unwrap();
    assert_eq!(engine.queue().active_count(), 1);

    // The rest wait on the module, and are either still queued or tagged so.
    let blocked = engine.queue().blocked_count();
    let queued = engine.queue().queued_count();
    assert_eq!(blocked + queued, 3);
}

// ===========================================================================
// Test 5: Energy conservation over a long mixed run
// ===========================================================================

#[test]
fn energy_accounting_balances_over_days() {
    let (registry, targets) = self_replicating_registry();
    let mut config = calm_config();
    config.seed_modules = targets.iter().map(|&ty| (ty, 1)).collect();
    config.target_modules = targets;
    config.energy = EnergyParams {
        solar_capacity_kw: 150.0,
        battery_capacity_kwh: 300.0,
        charge_efficiency: 0.93,
        discharge_efficiency: 0.91,
        enable_weather: true,
        cloud_cover: 0.4,
        ..EnergyParams::default()
    };
    config.initial_battery_kwh = 200.0;
    config.seed = 99;

    let mut engine = Engine::new(registry, config, Vec::new()).unwrap();
    for _ in 0..7200 {
        engine.step().unwrap();
        if engine.replicated() {
            break;
        }
    }
    let energy = engine.energy();
    let scale = energy.total_generated_kwh().max(1.0);
    assert!(
        energy.conservation_residual().abs() <= 1e-6 * scale,
        "residual {} over scale {scale}",
        energy.conservation_residual()
    );
}

// ===========================================================================
// Test 6: Degradation, maintenance, and failures still converge
// ===========================================================================

#[test]
fn replication_survives_degradation_and_failures() {
    // A small chain with finite mtbf and maintenance windows.
    let mut b = RegistryBuilder::new();
    let regolith = b.register_resource(ResourceDef::bulk("regolith", 1.5, 0.01));
    let metal = b.register_resource(ResourceDef::bulk("metal", 7.0, 0.004));
    let module_res = b.register_resource(ResourceDef::bulk("fab_module", 3.0, 1.0));

    let mut mining = ModuleTypeDef::basic("mining");
    mining.mtbf_hours = 300.0;
    mining.maintenance_interval_hours = 100.0;
    mining.maintenance_duration_hours = 2.0;
    mining.repair_duration_hours = 5.0;
    mining.idle_power_kw = 0.0;
    let mining = b.register_module_type(mining);

    let mut fab = ModuleTypeDef::basic("fab");
    fab.mtbf_hours = 300.0;
    fab.maintenance_interval_hours = 100.0;
    fab.maintenance_duration_hours = 2.0;
    fab.repair_duration_hours = 5.0;
    fab.idle_power_kw = 0.0;
    fab.product = Some(module_res);
    let fab = b.register_module_type(fab);

    b.register_recipe(RecipeDef::simple(regolith, 10.0, vec![], 2.0, 1.0, mining));
    b.register_recipe(RecipeDef::simple(
        metal,
        2.0,
        vec![(regolith, 5.0)],
        3.0,
        1.0,
        fab,
    ));
    b.register_recipe(RecipeDef::simple(
        module_res,
        1.0,
        vec![(metal, 4.0)],
        10.0,
        4.0,
        fab,
    ));
    let registry = b.build().unwrap();

    let mut config = calm_config();
    config.fleet.enable_degradation = true;
    config.fleet.enable_maintenance = true;
    config.seed = 7;
    config.seed_modules = vec![(mining, 1), (fab, 1)];
    config.target_modules = vec![fab];
    config.max_hours = 5000.0;

    let mut engine = Engine::new(registry, config, Vec::new()).unwrap();
    let report = engine.run().unwrap();
    assert_eq!(
        report.status.terminated_reason,
        TerminationReason::Replicated
    );
}

// ===========================================================================
// Test 7: Subsystem proposals route through the bus into core state
// ===========================================================================

/// A recycler stand-in: every tick it proposes recovering one unit of a
/// fixed resource.
#[derive(Debug)]
struct Recycler {
    resource: ResourceId,
}

impl Subsystem for Recycler {
    fn name(&self) -> &str {
        "recycler"
    }

    fn on_tick(&mut self, ctx: &TickContext<'_>) -> Vec<Event> {
        vec![Event::ResourceRecovered {
            resource: self.resource,
            quantity: 1.0,
            time: ctx.time,
        }]
    }
}

#[test]
fn subsystem_proposals_apply_next_tick() {
    let (registry, alpha, _beta, asm) = two_recipe_registry();
    let mut config = calm_config();
    config.seed_modules = vec![(asm, 1)];

    let mut engine = Engine::new(
        registry,
        config,
        vec![Box::new(Recycler { resource: alpha })],
    )
    .unwrap();

    // Tick 0: the subsystem publishes its proposal during drain.
    engine.step().unwrap();
    assert_eq!(engine.storage().quantity(alpha), 0.0);

    // Tick 1: the core applies it during the next drain.
    engine.step().unwrap();
    assert_eq!(engine.storage().quantity(alpha), 1.0);

    engine.step().unwrap();
    assert_eq!(engine.storage().quantity(alpha), 2.0);
}

// ===========================================================================
// Test 8: Rescan is idempotent when nothing changes
// ===========================================================================

#[test]
fn rescan_idempotent_without_mutations() {
    let (registry, _alpha, beta, asm) = two_recipe_registry();
    let mut config = calm_config();
    config.seed_modules = vec![(asm, 1)];
    // No alpha anywhere: the goal blocks on resources and stays there.

    let mut engine = Engine::new(registry, config, Vec::new()).unwrap();
    engine.enqueue_goal(beta, 1.0).unwrap();

    engine.step().unwrap();
    let first = engine.queue().blocked_by_cause();
    engine.step().unwrap();
    let second = engine.queue().blocked_by_cause();
    assert_eq!(first, second);
    assert_eq!(first[&BlockCause::Resources], 1);
}

// ===========================================================================
// Test 9: TaskRequested proposals expand into scheduled work
// ===========================================================================

/// Requests one widget, once.
#[derive(Debug)]
struct OneShotRequester {
    resource: ResourceId,
    fired: bool,
}

impl Subsystem for OneShotRequester {
    fn name(&self) -> &str {
        "requester"
    }

    fn on_tick(&mut self, ctx: &TickContext<'_>) -> Vec<Event> {
        if self.fired {
            return Vec::new();
        }
        self.fired = true;
        vec![Event::TaskRequested {
            resource: self.resource,
            quantity: 1.0,
            time: ctx.time,
        }]
    }
}

#[test]
fn task_requests_become_tasks() {
    let (registry, alpha, beta, asm) = two_recipe_registry();
    let mut config = calm_config();
    config.seed_modules = vec![(asm, 1)];
    config.seed_resources = vec![(alpha, 10.0)];

    let mut engine = Engine::new(
        registry,
        config,
        vec![Box::new(OneShotRequester {
            resource: beta,
            fired: false,
        })],
    )
    .unwrap();

    for _ in 0..20 {
        engine.step().unwrap();
    }
    assert_eq!(engine.storage().quantity(beta), 1.0);
    assert!(
        engine
            .bus()
            .history()
            .any(|e| e.kind() == EventKind::TaskCompleted)
    );
}

// ===========================================================================
// Test 10: Determinism with subsystems and all toggles on
// ===========================================================================

#[test]
fn determinism_with_subsystems() {
    fn run_once() -> String {
        let (registry, targets) = self_replicating_registry();
        let alpha = registry.resource_id("metal").unwrap();
        let mut config = calm_config();
        config.seed = 31337;
        config.fleet.enable_degradation = true;
        config.fleet.enable_maintenance = true;
        config.energy.enable_weather = true;
        config.seed_modules = targets.iter().map(|&ty| (ty, 1)).collect();
        config.target_modules = targets;
        config.max_hours = 300.0;

        let mut engine = Engine::new(
            registry,
            config,
            vec![Box::new(Recycler { resource: alpha })],
        )
        .unwrap();
        let report = engine.run().unwrap();
        report.deterministic_json().unwrap()
    }

    assert_eq!(run_once(), run_once());
}
