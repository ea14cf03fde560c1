//! Dispatch engine: selects queued tasks to start each tick, subject to
//! module, resource, energy, contamination, and software constraints.
//!
//! At most `max_starts` tasks begin per tick. Precondition checks run in a
//! fixed order and the first failure tags the task with its blocking cause;
//! the rescan path re-evaluates exactly that cause, so a cleared task
//! re-enters the heap and picks up any remaining constraint on its next
//! dispatch attempt.

use crate::energy::EnergySystem;
use crate::event::Event;
use crate::metrics::LogBuffer;
use crate::modules::ModuleFleet;
use crate::registry::{RecipeDef, Registry};
use crate::storage::StorageLedger;
use crate::task::{BlockCause, Task, TaskQueue};

// ---------------------------------------------------------------------------
// Start planning
// ---------------------------------------------------------------------------

/// Duration and power a task would run at if started now.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartPlan {
    pub duration_hours: f64,
    pub power_kw: f64,
}

/// Compute the adjusted duration and average power for starting `quantity`
/// of the recipe's output now.
///
/// Duration: `time_hours * quantity / output_quantity`, divided by the batch
/// width for parallel-capable recipes, scaled by the learning factor
/// (`factor^(completions/10)`) and by the fleet's effective throughput.
/// Energy is fixed per batch, so power rises as duration shrinks.
pub fn plan_start(
    recipe: &RecipeDef,
    fleet: &ModuleFleet,
    quantity: f64,
    completions: u32,
    batch_enabled: bool,
    learning_curve_factor: f64,
) -> StartPlan {
    let batches = quantity / recipe.output_quantity;
    let base_hours = recipe.time_hours * batches;

    let batch_div = if batch_enabled && recipe.parallel_capable {
        let def = fleet.def(recipe.module);
        (fleet.count_running(recipe.module) as u32)
            .min(def.parallel_processing_limit)
            .max(1) as f64
    } else {
        1.0
    };

    let learning = learning_curve_factor.powi((completions / 10) as i32);
    let throughput = fleet.effective_throughput(recipe.module);
    let duration = (base_hours / batch_div * learning / throughput).max(f64::EPSILON);

    let energy_total = recipe.energy_kwh * batches;
    StartPlan {
        duration_hours: duration,
        power_kw: energy_total / duration,
    }
}

// ---------------------------------------------------------------------------
// Precondition checks
// ---------------------------------------------------------------------------

/// Inputs needed to evaluate dispatch preconditions without mutating anything.
pub struct PreconditionCtx<'a> {
    pub fleet: &'a ModuleFleet,
    pub storage: &'a StorageLedger,
    pub energy: &'a EnergySystem,
    pub time: f64,
    pub dt_hours: f64,
    /// Latest contamination level reported over the bus, if any.
    pub contamination_level: Option<f64>,
    pub contamination_enabled: bool,
}

/// Evaluate the precondition chain for a candidate start. Returns the first
/// failing cause, in the fixed check order.
pub fn check_preconditions(
    ctx: &PreconditionCtx<'_>,
    recipe: &RecipeDef,
    quantity: f64,
    plan: &StartPlan,
) -> Option<BlockCause> {
    // 1. Module type has a running instance.
    if ctx.fleet.count_running(recipe.module) == 0 {
        return Some(BlockCause::Module);
    }
    // 2. A slot is free on that type.
    if !ctx.fleet.has_free_slot(recipe.module) {
        return Some(BlockCause::Module);
    }
    // 3. All inputs on hand in full quantity.
    let batches = quantity / recipe.output_quantity;
    for (input, input_qty) in &recipe.inputs {
        if !ctx.storage.has(*input, input_qty * batches) {
            return Some(BlockCause::Resources);
        }
    }
    // 4. Energy fundable from solar plus battery above reserve.
    if !ctx.energy.fundable(plan.power_kw, ctx.dt_hours, ctx.time) {
        return Some(BlockCause::Energy);
    }
    // 5. Cleanroom class satisfied, when the contamination subsystem runs.
    if ctx.contamination_enabled
        && let Some(class) = recipe.cleanroom_class
        && let Some(level) = ctx.contamination_level
        && level > class
    {
        return Some(BlockCause::Resources);
    }
    // 6. Operator software present (not consumed).
    if let Some(software) = recipe.software_required
        && !ctx.storage.has(software, 1.0)
    {
        return Some(BlockCause::Resources);
    }
    None
}

/// Whether a previously-recorded blocking cause still holds for a task.
/// Only the recorded cause is re-evaluated; a task whose cause cleared is
/// re-enqueued and any other constraint re-tags it at its next dispatch.
pub fn cause_still_holds(
    ctx: &PreconditionCtx<'_>,
    registry: &Registry,
    task: &Task,
    cause: BlockCause,
    plan: Option<&StartPlan>,
) -> bool {
    let Some(recipe_id) = task.recipe else {
        // No recipe: the resource can never be produced. Stay blocked.
        return true;
    };
    let Some(recipe) = registry.recipe(recipe_id) else {
        return true;
    };
    let batches = task.quantity / recipe.output_quantity;
    match cause {
        BlockCause::Dependencies => unreachable!("handled inside the queue"),
        BlockCause::Module => {
            ctx.fleet.count_running(recipe.module) == 0 || !ctx.fleet.has_free_slot(recipe.module)
        }
        BlockCause::Resources => {
            let inputs_missing = recipe
                .inputs
                .iter()
                .any(|(input, qty)| !ctx.storage.has(*input, qty * batches));
            let software_missing = recipe
                .software_required
                .is_some_and(|software| !ctx.storage.has(software, 1.0));
            let contaminated = ctx.contamination_enabled
                && recipe.cleanroom_class.is_some_and(|class| {
                    ctx.contamination_level.is_some_and(|level| level > class)
                });
            inputs_missing || software_missing || contaminated
        }
        BlockCause::Energy => match plan {
            Some(plan) => !ctx.energy.fundable(plan.power_kw, ctx.dt_hours, ctx.time),
            None => true,
        },
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Mutable state and knobs for one dispatch pass.
pub struct DispatchCtx<'a> {
    pub registry: &'a Registry,
    pub fleet: &'a mut ModuleFleet,
    pub storage: &'a mut StorageLedger,
    pub energy: &'a EnergySystem,
    pub time: f64,
    pub dt_hours: f64,
    pub contamination_level: Option<f64>,
    pub contamination_enabled: bool,
    pub batch_enabled: bool,
    pub learning_curve_factor: f64,
    pub max_starts: usize,
}

/// Run one dispatch pass: pop ready candidates, check preconditions, start
/// up to `max_starts` tasks. Returns the number started.
pub fn dispatch(
    queue: &mut TaskQueue,
    ctx: &mut DispatchCtx<'_>,
    events: &mut Vec<Event>,
    log: &mut LogBuffer,
) -> usize {
    let mut started = 0;
    while started < ctx.max_starts {
        let Some(id) = queue.pop_ready() else {
            break;
        };
        let task = queue.get(id).expect("popped id is live").clone();

        let Some(recipe_id) = task.recipe else {
            queue.block(id, BlockCause::Resources);
            log.warn(
                ctx.time,
                format!("task {} has no recipe; blocked on resources", task.label),
            );
            continue;
        };
        let recipe = ctx
            .registry
            .recipe(recipe_id)
            .expect("recipe ids are load-validated")
            .clone();

        let plan = plan_start(
            &recipe,
            ctx.fleet,
            task.quantity,
            queue.completions_of(task.output),
            ctx.batch_enabled,
            ctx.learning_curve_factor,
        );

        let pre = PreconditionCtx {
            fleet: ctx.fleet,
            storage: ctx.storage,
            energy: ctx.energy,
            time: ctx.time,
            dt_hours: ctx.dt_hours,
            contamination_level: ctx.contamination_level,
            contamination_enabled: ctx.contamination_enabled,
        };
        if let Some(cause) = check_preconditions(&pre, &recipe, task.quantity, &plan) {
            queue.block(id, cause);
            log.debug(
                ctx.time,
                format!("task {} blocked: {cause:?}", task.label),
            );
            continue;
        }

        // All checks pass: consume inputs, reserve the slot, go active.
        // Nothing mutates between the precondition check and here, so the
        // releases and the slot reserve cannot fail.
        let batches = task.quantity / recipe.output_quantity;
        for (input, input_qty) in &recipe.inputs {
            let qty = input_qty * batches;
            let released = ctx.storage.release(*input, qty);
            debug_assert!(released, "inputs verified by the precondition check");
            events.push(Event::ResourceConsumed {
                resource: *input,
                quantity: qty,
                task: id,
                time: ctx.time,
            });
        }
        let reserved = ctx.fleet.reserve_slot(recipe.module);
        debug_assert!(reserved, "slot verified by the precondition check");

        queue.activate(id, recipe.module, plan.duration_hours);
        if let Some(active) = queue.get_mut(id) {
            active.power_kw = plan.power_kw;
        }
        events.push(Event::TaskStarted {
            task: id,
            resource: task.output,
            time: ctx.time,
        });
        log.info(
            ctx.time,
            format!(
                "task {} started on {} for {:.2}h",
                task.label,
                ctx.registry.module_name(recipe.module),
                plan.duration_hours
            ),
        );
        started += 1;
    }
    started
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::EnergyParams;
    use crate::modules::FleetToggles;
    use crate::registry::{ModuleTypeDef, RecipeDef, RegistryBuilder, ResourceDef};
    use crate::storage::StorageCaps;
    use crate::task::TaskStatus;

    struct Rig {
        registry: Registry,
        fleet: ModuleFleet,
        storage: StorageLedger,
        energy: EnergySystem,
        queue: TaskQueue,
    }

    /// One assembler, recipe: widget <- 2 ore, 1 kWh, 1 h.
    fn rig() -> Rig {
        let mut b = RegistryBuilder::new();
        let ore = b.register_resource(ResourceDef::bulk("ore", 1.0, 0.001));
        let widget = b.register_resource(ResourceDef::bulk("widget", 1.0, 0.001));
        let asm = b.register_module_type(ModuleTypeDef::basic("assembler"));
        b.register_recipe(RecipeDef::simple(widget, 1.0, vec![(ore, 2.0)], 1.0, 1.0, asm));
        let registry = b.build().unwrap();

        let fleet = ModuleFleet::new(&registry, &[(asm, 1)], FleetToggles::default());
        let mut storage = StorageLedger::new(&registry, StorageCaps::UNLIMITED);
        storage.reserve(ore, 10.0);
        let energy = EnergySystem::new(
            EnergyParams {
                solar_capacity_kw: 0.0,
                battery_capacity_kwh: 100.0,
                reserve_fraction: 0.2,
                ..EnergyParams::default()
            },
            100.0,
        );
        Rig {
            registry,
            fleet,
            storage,
            energy,
            queue: TaskQueue::new(),
        }
    }

    fn enqueue_goal(rig: &mut Rig, qty: f64) -> crate::id::TaskId {
        let widget = rig.registry.resource_id("widget").unwrap();
        let id = rig.queue.allocate_id();
        let (recipe_id, _) = rig.registry.recipe_for(widget).unwrap();
        rig.queue.enqueue(Task::new(
            id,
            widget,
            "widget",
            qty,
            0,
            vec![],
            Some(recipe_id),
        ));
        id
    }

    fn run_dispatch(rig: &mut Rig, max_starts: usize) -> (usize, Vec<Event>) {
        let mut events = Vec::new();
        let mut log = LogBuffer::new(64);
        let mut ctx = DispatchCtx {
            registry: &rig.registry,
            fleet: &mut rig.fleet,
            storage: &mut rig.storage,
            energy: &rig.energy,
            time: 0.0,
            dt_hours: 0.1,
            contamination_level: None,
            contamination_enabled: false,
            batch_enabled: false,
            learning_curve_factor: 1.0,
            max_starts,
        };
        let n = dispatch(&mut rig.queue, &mut ctx, &mut events, &mut log);
        (n, events)
    }

    #[test]
    fn successful_start_consumes_inputs_and_reserves_slot() {
        let mut rig = rig();
        let id = enqueue_goal(&mut rig, 1.0);
        let (n, events) = run_dispatch(&mut rig, 5);

        assert_eq!(n, 1);
        let ore = rig.registry.resource_id("ore").unwrap();
        assert_eq!(rig.storage.quantity(ore), 8.0);
        let asm = rig.registry.module_id("assembler").unwrap();
        assert_eq!(rig.fleet.active_slots(asm), 1);

        let task = rig.queue.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Active);
        assert!((task.remaining_hours - 1.0).abs() < 1e-9);
        assert!((task.power_kw - 1.0).abs() < 1e-9);

        assert!(events.iter().any(|e| matches!(e, Event::TaskStarted { .. })));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, Event::ResourceConsumed { quantity, .. } if (quantity - 2.0).abs() < 1e-9))
        );
    }

    #[test]
    fn missing_inputs_block_on_resources() {
        let mut rig = rig();
        let ore = rig.registry.resource_id("ore").unwrap();
        rig.storage.release(ore, 10.0);
        let id = enqueue_goal(&mut rig, 1.0);
        let (n, _) = run_dispatch(&mut rig, 5);

        assert_eq!(n, 0);
        assert_eq!(
            rig.queue.get(id).unwrap().status,
            TaskStatus::Blocked(BlockCause::Resources)
        );
    }

    #[test]
    fn no_running_module_blocks_on_module() {
        let mut b = RegistryBuilder::new();
        let widget = b.register_resource(ResourceDef::bulk("widget", 1.0, 0.001));
        let asm = b.register_module_type(ModuleTypeDef::basic("assembler"));
        b.register_recipe(RecipeDef::simple(widget, 1.0, vec![], 1.0, 1.0, asm));
        let registry = b.build().unwrap();
        // Zero seed instances.
        let mut rig = rig();
        rig.registry = registry;
        rig.fleet = ModuleFleet::new(&rig.registry, &[], FleetToggles::default());
        rig.storage = StorageLedger::new(&rig.registry, StorageCaps::UNLIMITED);
        rig.queue = TaskQueue::new();

        let id = enqueue_goal(&mut rig, 1.0);
        let (n, _) = run_dispatch(&mut rig, 5);
        assert_eq!(n, 0);
        assert_eq!(
            rig.queue.get(id).unwrap().status,
            TaskStatus::Blocked(BlockCause::Module)
        );
    }

    #[test]
    fn occupied_slots_block_on_module() {
        let mut rig = rig();
        let asm = rig.registry.module_id("assembler").unwrap();
        rig.fleet.reserve_slot(asm);

        let id = enqueue_goal(&mut rig, 1.0);
        let (n, _) = run_dispatch(&mut rig, 5);
        assert_eq!(n, 0);
        assert_eq!(
            rig.queue.get(id).unwrap().status,
            TaskStatus::Blocked(BlockCause::Module)
        );
    }

    #[test]
    fn unfundable_energy_blocks_on_energy() {
        let mut rig = rig();
        rig.energy = EnergySystem::new(
            EnergyParams {
                solar_capacity_kw: 0.0,
                battery_capacity_kwh: 100.0,
                reserve_fraction: 1.0, // everything is reserve
                ..EnergyParams::default()
            },
            100.0,
        );
        let id = enqueue_goal(&mut rig, 1.0);
        let (n, _) = run_dispatch(&mut rig, 5);
        assert_eq!(n, 0);
        assert_eq!(
            rig.queue.get(id).unwrap().status,
            TaskStatus::Blocked(BlockCause::Energy)
        );
    }

    #[test]
    fn dispatch_caps_starts_per_tick() {
        let mut rig = rig();
        let mut def = ModuleTypeDef::basic("assembler");
        def.parallel_processing_limit = 16;
        // Rebuild the fleet with a wide slot budget so only K limits starts.
        let mut b = RegistryBuilder::new();
        let ore = b.register_resource(ResourceDef::bulk("ore", 1.0, 0.001));
        let widget = b.register_resource(ResourceDef::bulk("widget", 1.0, 0.001));
        let asm = b.register_module_type(def);
        b.register_recipe(RecipeDef::simple(
            widget,
            1.0,
            vec![(ore, 1.0)],
            0.1,
            1.0,
            asm,
        ));
        rig.registry = b.build().unwrap();
        rig.fleet = ModuleFleet::new(&rig.registry, &[(asm, 1)], FleetToggles::default());
        rig.storage = StorageLedger::new(&rig.registry, StorageCaps::UNLIMITED);
        rig.storage.reserve(ore, 100.0);
        rig.queue = TaskQueue::new();

        for _ in 0..10 {
            enqueue_goal(&mut rig, 1.0);
        }
        let (n, _) = run_dispatch(&mut rig, 5);
        assert_eq!(n, 5);
        assert_eq!(rig.queue.active_count(), 5);
        assert_eq!(rig.queue.queued_count(), 5);
    }

    #[test]
    fn software_gate_checks_presence_without_consuming() {
        let mut b = RegistryBuilder::new();
        let widget = b.register_resource(ResourceDef::bulk("widget", 1.0, 0.001));
        let firmware = b.register_resource(ResourceDef::software("firmware"));
        let asm = b.register_module_type(ModuleTypeDef::basic("assembler"));
        let mut recipe = RecipeDef::simple(widget, 1.0, vec![], 1.0, 1.0, asm);
        recipe.software_required = Some(firmware);
        b.register_recipe(recipe);
        let registry = b.build().unwrap();

        let mut rig = rig();
        rig.registry = registry;
        rig.fleet = ModuleFleet::new(
            &rig.registry,
            &[(rig.registry.module_id("assembler").unwrap(), 1)],
            FleetToggles::default(),
        );
        rig.storage = StorageLedger::new(&rig.registry, StorageCaps::UNLIMITED);
        rig.queue = TaskQueue::new();

        // Without firmware: blocked on resources.
        let id = enqueue_goal(&mut rig, 1.0);
        let (n, _) = run_dispatch(&mut rig, 5);
        assert_eq!(n, 0);
        assert_eq!(
            rig.queue.get(id).unwrap().status,
            TaskStatus::Blocked(BlockCause::Resources)
        );

        // With firmware: starts, and the software is not consumed.
        rig.storage.reserve(firmware, 1.0);
        rig.queue.rescan_blocked(|_, _| false);
        let (n, _) = run_dispatch(&mut rig, 5);
        assert_eq!(n, 1);
        assert_eq!(rig.storage.quantity(firmware), 1.0);
    }

    #[test]
    fn contamination_gate_blocks_dirty_cleanroom() {
        let mut b = RegistryBuilder::new();
        let chip = b.register_resource(ResourceDef::bulk("chip", 1.0, 0.0001));
        let fab = b.register_module_type(ModuleTypeDef::basic("fab"));
        let mut recipe = RecipeDef::simple(chip, 1.0, vec![], 1.0, 1.0, fab);
        recipe.cleanroom_class = Some(100.0);
        b.register_recipe(recipe);
        let registry = b.build().unwrap();

        let mut rig = rig();
        rig.registry = registry;
        rig.fleet = ModuleFleet::new(
            &rig.registry,
            &[(rig.registry.module_id("fab").unwrap(), 1)],
            FleetToggles::default(),
        );
        rig.storage = StorageLedger::new(&rig.registry, StorageCaps::UNLIMITED);
        rig.queue = TaskQueue::new();

        let chip = rig.registry.resource_id("chip").unwrap();
        let (recipe_id, _) = rig.registry.recipe_for(chip).unwrap();
        let id = rig.queue.allocate_id();
        rig.queue
            .enqueue(Task::new(id, chip, "chip", 1.0, 0, vec![], Some(recipe_id)));

        let mut events = Vec::new();
        let mut log = LogBuffer::new(64);
        let mut ctx = DispatchCtx {
            registry: &rig.registry,
            fleet: &mut rig.fleet,
            storage: &mut rig.storage,
            energy: &rig.energy,
            time: 0.0,
            dt_hours: 0.1,
            contamination_level: Some(500.0),
            contamination_enabled: true,
            batch_enabled: false,
            learning_curve_factor: 1.0,
            max_starts: 5,
        };
        let n = dispatch(&mut rig.queue, &mut ctx, &mut events, &mut log);
        assert_eq!(n, 0);
        assert_eq!(
            rig.queue.get(id).unwrap().status,
            TaskStatus::Blocked(BlockCause::Resources)
        );
    }

    #[test]
    fn learning_curve_shortens_repeat_work() {
        let rig = rig();
        let widget = rig.registry.resource_id("widget").unwrap();
        let (_, recipe) = rig.registry.recipe_for(widget).unwrap();

        let fresh = plan_start(recipe, &rig.fleet, 1.0, 0, false, 0.9);
        let practiced = plan_start(recipe, &rig.fleet, 1.0, 20, false, 0.9);
        assert!((fresh.duration_hours - 1.0).abs() < 1e-9);
        // factor^2 = 0.81.
        assert!((practiced.duration_hours - 0.81).abs() < 1e-9);
        // Same batch energy over less time: more power.
        assert!(practiced.power_kw > fresh.power_kw);
    }

    #[test]
    fn batch_scaling_needs_flag_and_capability() {
        let mut b = RegistryBuilder::new();
        let widget = b.register_resource(ResourceDef::bulk("widget", 1.0, 0.001));
        let mut def = ModuleTypeDef::basic("assembler");
        def.parallel_processing_limit = 4;
        let asm = b.register_module_type(def);
        let mut recipe = RecipeDef::simple(widget, 1.0, vec![], 1.0, 4.0, asm);
        recipe.parallel_capable = true;
        b.register_recipe(recipe);
        let registry = b.build().unwrap();
        let fleet = ModuleFleet::new(&registry, &[(asm, 2)], FleetToggles::default());
        let (_, recipe) = registry.recipe_for(widget).unwrap();

        let flat = plan_start(recipe, &fleet, 1.0, 0, false, 1.0);
        assert!((flat.duration_hours - 4.0).abs() < 1e-9);
        // min(2 running, 4 limit) = 2.
        let batched = plan_start(recipe, &fleet, 1.0, 0, true, 1.0);
        assert!((batched.duration_hours - 2.0).abs() < 1e-9);
    }

    #[test]
    fn cause_still_holds_tracks_each_cause() {
        let mut rig = rig();
        let id = enqueue_goal(&mut rig, 1.0);
        let task = rig.queue.get(id).unwrap().clone();
        let widget = rig.registry.resource_id("widget").unwrap();
        let (_, recipe) = rig.registry.recipe_for(widget).unwrap();
        let plan = plan_start(recipe, &rig.fleet, 1.0, 0, false, 1.0);

        let pre = PreconditionCtx {
            fleet: &rig.fleet,
            storage: &rig.storage,
            energy: &rig.energy,
            time: 0.0,
            dt_hours: 0.1,
            contamination_level: None,
            contamination_enabled: false,
        };
        // Inputs are stocked: a Resources block would clear.
        assert!(!cause_still_holds(
            &pre,
            &rig.registry,
            &task,
            BlockCause::Resources,
            Some(&plan)
        ));
        // A module block would clear too: the assembler is free.
        assert!(!cause_still_holds(
            &pre,
            &rig.registry,
            &task,
            BlockCause::Module,
            Some(&plan)
        ));
        // Energy is fundable.
        assert!(!cause_still_holds(
            &pre,
            &rig.registry,
            &task,
            BlockCause::Energy,
            Some(&plan)
        ));
    }
}
