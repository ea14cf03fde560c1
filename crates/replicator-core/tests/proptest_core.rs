//! Property-based tests for the replicator core.
//!
//! Uses proptest to generate random production chains, queue workloads, and
//! engine runs, then verifies structural invariants hold.

use proptest::prelude::*;
use replicator_core::engine::Engine;
use replicator_core::id::ModuleTypeId;
use replicator_core::registry::{RecipeDef, Registry, RegistryBuilder};
use replicator_core::resolver::Resolver;
use replicator_core::task::{Task, TaskQueue};
use replicator_core::test_utils::*;
use std::collections::HashMap;

// ===========================================================================
// Generators
// ===========================================================================

/// Build a linear chain registry: r0 (extraction) <- r1 <- ... <- r_depth,
/// with the given per-step input quantity.
fn chain_of(depth: usize, input_qty: f64) -> (Registry, Vec<replicator_core::id::ResourceId>) {
    let mut b = RegistryBuilder::new();
    let mut resources = Vec::new();
    for i in 0..=depth {
        resources.push(b.register_resource(bulk(&format!("r{i}"))));
    }
    let module = b.register_module_type(steady_module("fab"));
    b.register_recipe(RecipeDef::simple(resources[0], 1.0, vec![], 1.0, 0.5, module));
    for i in 1..=depth {
        b.register_recipe(RecipeDef::simple(
            resources[i],
            1.0,
            vec![(resources[i - 1], input_qty)],
            1.0,
            0.5,
            module,
        ));
    }
    (b.build().unwrap(), resources)
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Raw demand of a linear chain is input_qty^depth of the base resource.
    #[test]
    fn raw_requirements_match_closed_form(
        depth in 1usize..6,
        input_qty in 1.0f64..3.0,
    ) {
        let (registry, resources) = chain_of(depth, input_qty);
        let mut resolver = Resolver::new(64);
        let raw = resolver
            .raw_requirements(&registry, resources[depth], 1.0)
            .unwrap();
        prop_assert_eq!(raw.len(), 1);
        let expected = input_qty.powi(depth as i32);
        let got = raw[&resources[0]];
        prop_assert!((got - expected).abs() < 1e-6 * expected.max(1.0));
    }

    /// The resolver cache never exceeds its capacity.
    #[test]
    fn resolver_cache_bounded(
        depth in 1usize..6,
        capacity in 1usize..8,
        quantities in proptest::collection::vec(0.5f64..10.0, 1..20),
    ) {
        let (registry, resources) = chain_of(depth, 2.0);
        let mut resolver = Resolver::new(capacity);
        for q in quantities {
            resolver.raw_requirements(&registry, resources[depth], q).unwrap();
            prop_assert!(resolver.cache_len() <= capacity);
        }
    }

    /// Queue pops come out ordered by (priority, insertion sequence).
    #[test]
    fn queue_pop_order_is_stable(
        priorities in proptest::collection::vec(0u32..5, 1..40),
    ) {
        let mut queue = TaskQueue::new();
        let mut inserted = Vec::new();
        for (seq, priority) in priorities.iter().enumerate() {
            let id = queue.allocate_id();
            queue.enqueue(Task::new(
                id,
                replicator_core::id::ResourceId(0),
                "item",
                1.0,
                *priority,
                vec![],
                None,
            ));
            inserted.push((*priority, seq as u64, id));
        }

        let mut popped = Vec::new();
        while let Some(id) = queue.pop_ready() {
            let task = queue.get(id).unwrap();
            popped.push((task.priority, id));
            // Park it as active so stale heap entries cannot re-pop it.
            queue.activate(id, ModuleTypeId(0), 1.0);
        }

        let mut expected = inserted.clone();
        expected.sort_by_key(|(priority, seq, _)| (*priority, *seq));
        let expected: Vec<_> = expected
            .into_iter()
            .map(|(priority, _, id)| (priority, id))
            .collect();
        prop_assert_eq!(popped, expected);
    }

    /// Task conservation: every task is in exactly one bucket, every tick.
    #[test]
    fn engine_task_conservation(
        seed in 0u64..1000,
        goal_count in 1usize..4,
        ticks in 10usize..120,
    ) {
        let (registry, alpha, beta, asm) = two_recipe_registry();
        let mut config = calm_config();
        config.seed = seed;
        config.seed_modules = vec![(asm, 1)];
        config.seed_resources = vec![(alpha, 100.0)];

        let mut engine = Engine::new(registry, config, Vec::new()).unwrap();
        for _ in 0..goal_count {
            engine.enqueue_goal(beta, 1.0).unwrap();
        }

        let total = goal_count;
        for _ in 0..ticks {
            engine.step().unwrap();
            let queue = engine.queue();
            let buckets = queue.queued_count()
                + queue.active_count()
                + queue.blocked_count()
                + queue.completed_ids().len();
            prop_assert_eq!(buckets, total);
        }
    }

    /// Energy invariants hold under random loads and seeds.
    #[test]
    fn engine_energy_invariants(
        seed in 0u64..1000,
        solar in 10.0f64..500.0,
        battery in 10.0f64..1000.0,
    ) {
        let (registry, targets) = self_replicating_registry();
        let mut config = calm_config();
        config.seed = seed;
        config.energy.solar_capacity_kw = solar;
        config.energy.battery_capacity_kwh = battery;
        config.energy.enable_weather = true;
        config.initial_battery_kwh = battery / 2.0;
        config.seed_modules = targets.iter().map(|&ty| (ty, 1)).collect();
        config.target_modules = targets;

        let mut engine = Engine::new(registry, config, Vec::new()).unwrap();
        for _ in 0..300 {
            engine.step().unwrap();
            let energy = engine.energy();
            prop_assert!(energy.battery_kwh() >= 0.0);
            prop_assert!(energy.battery_kwh() <= energy.battery_capacity_kwh() + 1e-9);
            let scale = energy.total_generated_kwh().max(1.0);
            prop_assert!(energy.conservation_residual().abs() <= 1e-6 * scale);
        }
    }

    /// Completed tasks always have completed dependencies.
    #[test]
    fn completed_implies_dependencies_completed(
        seed in 0u64..1000,
        ticks in 20usize..200,
    ) {
        let (registry, alpha, _beta, gamma, asm) = chain_registry();
        let mut config = calm_config();
        config.seed = seed;
        config.seed_modules = vec![(asm, 2)];
        config.seed_resources = vec![(alpha, 50.0)];

        let mut engine = Engine::new(registry, config, Vec::new()).unwrap();
        let mut goals = Vec::new();
        for _ in 0..3 {
            if let Some(id) = engine.enqueue_goal(gamma, 1.0).unwrap() {
                goals.push(id);
            }
        }

        // Record dependency sets up front; tasks are archived on completion.
        let mut deps: HashMap<_, Vec<_>> = HashMap::new();
        for id in engine.queue().live_ids().collect::<Vec<_>>() {
            let task = engine.queue().get(id).unwrap();
            deps.insert(id, task.dependencies.clone());
        }

        for _ in 0..ticks {
            engine.step().unwrap();
            for (id, dependencies) in &deps {
                if engine.queue().is_completed(*id) {
                    for dep in dependencies {
                        prop_assert!(engine.queue().is_completed(*dep));
                    }
                }
            }
        }
    }
}
