//! The simulation engine: owns all mutable state and orchestrates the
//! eight-phase tick pipeline.
//!
//! # Eight-Phase Tick Pipeline
//!
//! Each call to [`Engine::step`] advances the simulation by `dt` through the
//! following phases, strictly in order:
//!
//! 1. **Energy** -- solar generation, idle and active draw, battery update.
//! 2. **Advance** -- decrement remaining hours of every active task.
//! 3. **Completion** -- finished tasks deliver outputs (quality-scaled),
//!    release their slot, grow module fleets for module products.
//! 4. **Rescan** -- re-evaluate blocked tasks; cleared ones re-enter the heap.
//! 5. **Dispatch** -- start up to K new tasks subject to all constraints.
//! 6. **Module state** -- wear, maintenance, stochastic failure; tasks on
//!    lost capacity are requeued with inputs refunded.
//! 7. **Metrics** -- periodic sample, gated by the metric interval.
//! 8. **Drain** -- deliver bus events, apply subsystem proposals, run the
//!    layered subsystem update, check for queue overflow.
//!
//! The loop is single-threaded and deterministic: identical registry, config,
//! and seed produce identical reports (wall-clock fields aside).

use crate::config::SimConfig;
use crate::dispatch::{
    DispatchCtx, PreconditionCtx, cause_still_holds, dispatch, plan_start,
};
use crate::energy::EnergySystem;
use crate::error::EngineError;
use crate::event::{Event, EventBus};
use crate::id::{ResourceId, TaskId};
use crate::metrics::{CompletedLog, LogBuffer, MetricsSample, TaskRecord};
use crate::modules::ModuleFleet;
use crate::registry::Registry;
use crate::report::{FinalStatus, SimulationReport, TerminationReason};
use crate::resolver::Resolver;
use crate::rng::SimRng;
use crate::storage::StorageLedger;
use crate::subsystem::{Subsystem, SubsystemSet, TickContext};
use crate::task::TaskQueue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The core simulation engine.
#[derive(Debug)]
pub struct Engine {
    registry: Registry,
    config: SimConfig,
    /// Resolved configuration document echoed into the report.
    config_document: serde_json::Value,

    queue: TaskQueue,
    resolver: Resolver,
    fleet: ModuleFleet,
    storage: StorageLedger,
    energy: EnergySystem,
    bus: EventBus,
    subsystems: SubsystemSet,
    rng: SimRng,

    log: LogBuffer,
    metrics: Vec<MetricsSample>,
    completed: CompletedLog,

    time_hours: f64,
    tick: u64,
    last_metric_time: f64,
    /// Energy served this tick, for subsystem contexts.
    tick_consumed_kwh: f64,
    /// Latest contamination level reported over the bus.
    contamination_level: Option<f64>,
    /// Raw-material demand computed for the replication goal at init.
    initial_requirements: BTreeMap<String, f64>,
    cancel: Arc<AtomicBool>,
}

impl Engine {
    /// Build an engine from an immutable registry, a resolved configuration,
    /// and the optional subsystems. Seeds storage and the module fleet and
    /// expands the replication goal into the task queue.
    pub fn new(
        registry: Registry,
        config: SimConfig,
        subsystems: Vec<Box<dyn Subsystem>>,
    ) -> Result<Self, EngineError> {
        for &(ty, _) in &config.seed_modules {
            if registry.module_type(ty).is_none() {
                return Err(EngineError::UnknownId {
                    kind: "module type",
                    id: ty.0,
                });
            }
        }
        for &(res, _) in &config.seed_resources {
            if registry.resource(res).is_none() {
                return Err(EngineError::UnknownId {
                    kind: "resource",
                    id: res.0,
                });
            }
        }
        for &ty in &config.target_modules {
            if registry.module_type(ty).is_none() {
                return Err(EngineError::UnknownId {
                    kind: "module type",
                    id: ty.0,
                });
            }
        }

        let subsystems = SubsystemSet::layered(subsystems)?;
        let fleet = ModuleFleet::new(&registry, &config.seed_modules, config.fleet);
        let mut storage = StorageLedger::new(&registry, config.storage_caps);
        let mut log = LogBuffer::new(config.tuning.log_capacity);
        for &(res, qty) in &config.seed_resources {
            if !storage.reserve(res, qty) {
                log.warn(
                    0.0,
                    format!(
                        "seed stock of {} x{qty} exceeds storage caps; dropped",
                        registry.resource_name(res)
                    ),
                );
            }
        }
        let energy = EnergySystem::new(config.energy.clone(), config.initial_battery_kwh);
        let bus = EventBus::new(
            config.tuning.event_queue_capacity,
            config.tuning.event_history_capacity,
        );
        let completed = CompletedLog::new(config.tuning.completed_log_capacity);
        let resolver = Resolver::new(config.tuning.resolver_cache_capacity);
        let rng = SimRng::new(config.seed);

        let mut engine = Self {
            queue: TaskQueue::new(),
            resolver,
            fleet,
            storage,
            energy,
            bus,
            subsystems,
            rng,
            log,
            metrics: Vec::new(),
            completed,
            time_hours: 0.0,
            tick: 0,
            last_metric_time: f64::NEG_INFINITY,
            tick_consumed_kwh: 0.0,
            contamination_level: None,
            initial_requirements: BTreeMap::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            config_document: serde_json::Value::Null,
            registry,
            config,
        };

        engine.seed_replication_goal()?;
        Ok(engine)
    }

    /// Expand the replication goal (one of each target module type) into
    /// tasks, and record the total raw-material demand for the report.
    fn seed_replication_goal(&mut self) -> Result<(), EngineError> {
        let targets = self.config.target_modules.clone();
        let mut stock = self.storage.snapshot();
        for ty in targets {
            let Some(product) = self.registry.module_type(ty).and_then(|def| def.product) else {
                self.log.warn(
                    0.0,
                    format!(
                        "target module '{}' has no product resource; cannot be replicated",
                        self.registry.module_name(ty)
                    ),
                );
                continue;
            };
            let raw = self.resolver.raw_requirements(&self.registry, product, 1.0)?;
            for (res, qty) in raw {
                *self
                    .initial_requirements
                    .entry(self.registry.resource_name(res).to_string())
                    .or_insert(0.0) += qty;
            }
            let goal = self.resolver.expand(
                &self.registry,
                &mut stock,
                product,
                1.0,
                0,
                &mut self.queue,
            )?;
            match goal {
                Some(id) => self.log.info(
                    0.0,
                    format!(
                        "replication goal for '{}' expanded as task {}",
                        self.registry.module_name(ty),
                        id.0
                    ),
                ),
                None => self.log.warn(
                    0.0,
                    format!(
                        "no recipe chain produces '{}'",
                        self.registry.resource_name(product)
                    ),
                ),
            }
        }
        Ok(())
    }

    /// Schedule an additional production goal. Demand is netted against the
    /// current stock. Returns the goal task id when one was scheduled.
    pub fn enqueue_goal(
        &mut self,
        resource: ResourceId,
        quantity: f64,
    ) -> Result<Option<TaskId>, EngineError> {
        let mut stock = self.storage.snapshot();
        let id = self.resolver.expand(
            &self.registry,
            &mut stock,
            resource,
            quantity,
            0,
            &mut self.queue,
        )?;
        Ok(id)
    }

    /// Cooperative cancellation handle, checked at the top of every tick.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Attach the resolved configuration document for the report echo.
    pub fn set_config_document(&mut self, document: serde_json::Value) {
        self.config_document = document;
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    /// Whether every target module type has been produced at least once.
    pub fn replicated(&self) -> bool {
        !self.config.target_modules.is_empty()
            && self
                .config
                .target_modules
                .iter()
                .all(|&ty| self.fleet.produced_count(ty) >= 1.0)
    }

    /// Run until self-replication, `max_hours`, `max_wall_time`, or cancel.
    /// Timeouts are terminal results, not errors: the partial report is
    /// flushed with the matching termination reason.
    pub fn run(&mut self) -> Result<SimulationReport, EngineError> {
        let wall_start = Instant::now();
        let reason = loop {
            if self.replicated() {
                break TerminationReason::Replicated;
            }
            if self.time_hours >= self.config.max_hours {
                self.log
                    .warn(self.time_hours, "simulated-time bound reached");
                break TerminationReason::MaxHours;
            }
            if wall_start.elapsed().as_secs_f64() >= self.config.max_wall_time_secs {
                self.log.warn(self.time_hours, "wall-clock bound reached");
                break TerminationReason::WallTime;
            }
            if self.cancel.load(Ordering::Relaxed) {
                self.log.warn(self.time_hours, "cancelled");
                break TerminationReason::Cancelled;
            }
            self.step()?;
        };
        Ok(self.build_report(reason, wall_start.elapsed().as_secs_f64()))
    }

    // -----------------------------------------------------------------------
    // Single step
    // -----------------------------------------------------------------------

    /// Advance the simulation by one tick through the eight phases.
    pub fn step(&mut self) -> Result<(), EngineError> {
        let dt = self.config.tuning.dt_hours;
        let time = self.time_hours;

        self.phase_energy(time, dt);
        let finishing = self.phase_advance(dt);
        self.phase_completion(time, finishing);
        self.phase_rescan(time, dt);
        self.phase_dispatch(time, dt);
        self.phase_module_state(time, dt);
        self.phase_metrics(time);
        self.phase_drain(time, dt)?;

        self.tick += 1;
        self.time_hours += dt;
        Ok(())
    }

    // -- Phase 1: energy --

    fn phase_energy(&mut self, time: f64, dt: f64) {
        let idle_kw = self.fleet.idle_power_kw() + self.config.tuning.transport_overhead_kw;
        let active_kw: f64 = self
            .queue
            .active_ids()
            .filter_map(|id| self.queue.get(id))
            .map(|task| task.power_kw)
            .sum();
        let requested = (idle_kw + active_kw) * dt;
        let result = self.energy.tick(time, dt, requested, &mut self.rng);
        self.tick_consumed_kwh = result.consumed_kwh;
        self.bus.publish(Event::EnergyAvailable {
            battery_kwh: self.energy.battery_kwh(),
            generated_kwh: result.generated_kwh,
            time,
        });
        if result.unserved_kwh > 0.0 {
            self.log.warn(
                time,
                format!("{:.3} kWh of load unserved this tick", result.unserved_kwh),
            );
        }
    }

    // -- Phase 2: advance active tasks --

    fn phase_advance(&mut self, dt: f64) -> Vec<TaskId> {
        let ids: Vec<TaskId> = self.queue.active_ids().collect();
        let mut finishing = Vec::new();
        for id in ids {
            if let Some(task) = self.queue.get_mut(id) {
                task.remaining_hours -= dt;
                // Slack absorbs accumulated float error in the countdown.
                if task.remaining_hours <= 1e-9 {
                    finishing.push(id);
                }
            }
        }
        finishing
    }

    // -- Phase 3: completion --

    fn phase_completion(&mut self, time: f64, finishing: Vec<TaskId>) {
        for id in finishing {
            let Some(task) = self.queue.get(id).cloned() else {
                continue;
            };
            let Some(recipe) = task.recipe.and_then(|rid| self.registry.recipe(rid)).cloned()
            else {
                continue;
            };

            let quality = if self.config.enable_quality_control {
                (self.fleet.effective_quality(recipe.module) * recipe.base_quality).min(1.0)
            } else {
                1.0
            };
            let produced = task.quantity * quality;

            // Output space is checked at completion, not pre-allocated. A
            // full store leaves the task Active with no progress.
            if !self.storage.reserve(task.output, produced) {
                self.bus.publish(Event::StorageFull {
                    task: id,
                    resource: task.output,
                    time,
                });
                self.log.warn(
                    time,
                    format!("task {} finished but storage is full", task.label),
                );
                continue;
            }

            self.fleet.release_slot(recipe.module);
            self.queue.complete(id);
            self.completed.push(TaskRecord {
                label: task.label.clone(),
                output: self.registry.resource_name(task.output).to_string(),
                quantity: task.quantity,
                produced_quantity: produced,
                completed_at: time,
            });

            self.bus.publish(Event::ResourceProduced {
                resource: task.output,
                quantity: produced,
                task: id,
                time,
            });
            self.bus.publish(Event::TaskCompleted {
                task: id,
                resource: task.output,
                time,
            });
            // Delivery of the finished output into storage.
            self.bus.publish(Event::TransportRequested {
                resource: task.output,
                quantity: produced,
                time,
            });

            let batches = task.quantity / recipe.output_quantity;
            for (waste, qty) in &recipe.waste_products {
                self.bus.publish(Event::WasteGenerated {
                    resource: *waste,
                    quantity: qty * batches,
                    time,
                });
            }

            if let Some(module_ty) = self.registry.module_for_product(task.output) {
                self.fleet.add_produced(module_ty, produced);
                self.bus.publish(Event::ModuleCreated {
                    module: module_ty,
                    count: produced,
                    time,
                });
                self.log.info(
                    time,
                    format!(
                        "module fleet '{}' grew by {produced:.2}",
                        self.registry.module_name(module_ty)
                    ),
                );
            }

            self.log.info(
                time,
                format!("task {} completed ({produced:.3} produced)", task.label),
            );
        }
    }

    // -- Phase 4: rescan blocked --

    fn phase_rescan(&mut self, time: f64, dt: f64) {
        let completions = self.queue.completions_map();
        let pre = PreconditionCtx {
            fleet: &self.fleet,
            storage: &self.storage,
            energy: &self.energy,
            time,
            dt_hours: dt,
            contamination_level: self.contamination_level,
            contamination_enabled: self.config.enable_contamination,
        };
        let registry = &self.registry;
        let batch_enabled = self.config.enable_batch_processing;
        let learning = self.config.tuning.learning_curve_factor;
        self.queue.rescan_blocked(|task, cause| {
            let plan = task
                .recipe
                .and_then(|rid| registry.recipe(rid))
                .map(|recipe| {
                    plan_start(
                        recipe,
                        pre.fleet,
                        task.quantity,
                        completions.get(&task.output).copied().unwrap_or(0),
                        batch_enabled,
                        learning,
                    )
                });
            cause_still_holds(&pre, registry, task, cause, plan.as_ref())
        });
    }

    // -- Phase 5: dispatch --

    fn phase_dispatch(&mut self, time: f64, dt: f64) {
        let mut events = Vec::new();
        let mut ctx = DispatchCtx {
            registry: &self.registry,
            fleet: &mut self.fleet,
            storage: &mut self.storage,
            energy: &self.energy,
            time,
            dt_hours: dt,
            contamination_level: self.contamination_level,
            contamination_enabled: self.config.enable_contamination,
            batch_enabled: self.config.enable_batch_processing,
            learning_curve_factor: self.config.tuning.learning_curve_factor,
            max_starts: self.config.tuning.max_tasks_per_tick,
        };
        dispatch(&mut self.queue, &mut ctx, &mut events, &mut self.log);
        for event in events {
            self.bus.publish(event);
        }
    }

    // -- Phase 6: module state --

    fn phase_module_state(&mut self, time: f64, dt: f64) {
        let mut events = Vec::new();
        self.fleet.tick(dt, time, &mut self.rng, &mut events);
        for event in events {
            self.bus.publish(event);
        }

        // Capacity may have dropped below occupancy (failure or maintenance
        // entry); return the excess tasks to the queue at their original
        // priority with inputs refunded.
        let types: Vec<_> = self.fleet.type_ids().collect();
        for ty in types {
            let mut overflow = self.fleet.slot_overflow(ty);
            if overflow == 0 {
                continue;
            }
            // Most recently started tasks are bumped first.
            let mut on_type: Vec<TaskId> = self
                .queue
                .active_ids()
                .filter(|id| {
                    self.queue
                        .get(*id)
                        .and_then(|t| t.assigned_module)
                        .is_some_and(|m| m == ty)
                })
                .collect();
            on_type.sort();
            while overflow > 0 {
                let Some(id) = on_type.pop() else {
                    break;
                };
                self.refund_inputs(id, time);
                self.queue.requeue(id);
                self.fleet.release_slot(ty);
                self.log.warn(
                    time,
                    format!(
                        "module capacity lost on '{}'; task {} requeued",
                        self.registry.module_name(ty),
                        id.0
                    ),
                );
                overflow -= 1;
            }
        }
    }

    /// Refund a requeued task's consumed inputs into storage.
    fn refund_inputs(&mut self, id: TaskId, time: f64) {
        let Some(task) = self.queue.get(id).cloned() else {
            return;
        };
        let Some(recipe) = task.recipe.and_then(|rid| self.registry.recipe(rid)).cloned() else {
            return;
        };
        let batches = task.quantity / recipe.output_quantity;
        for (input, qty) in &recipe.inputs {
            if !self.storage.reserve(*input, qty * batches) {
                self.log.warn(
                    time,
                    format!(
                        "refund of {} x{:.3} lost to storage caps",
                        self.registry.resource_name(*input),
                        qty * batches
                    ),
                );
            }
        }
    }

    // -- Phase 7: metrics --

    fn phase_metrics(&mut self, time: f64) {
        if time - self.last_metric_time < self.config.tuning.metric_interval_hours {
            return;
        }
        self.last_metric_time = time;

        let mut resources_on_hand = BTreeMap::new();
        for (res, qty) in self.storage.iter() {
            resources_on_hand.insert(self.registry.resource_name(res).to_string(), qty);
        }
        let mut blocked_tasks = BTreeMap::new();
        for (cause, count) in self.queue.blocked_by_cause() {
            blocked_tasks.insert(format!("{cause:?}").to_lowercase(), count);
        }
        let mut module_counts = BTreeMap::new();
        for (ty, count) in self.fleet.counts_snapshot() {
            module_counts.insert(self.registry.module_name(ty).to_string(), count);
        }

        self.metrics.push(MetricsSample {
            time,
            resources_on_hand,
            active_tasks: self.queue.active_count(),
            queued_tasks: self.queue.queued_count(),
            blocked_tasks,
            module_counts,
            battery_kwh: self.energy.battery_kwh(),
            total_generated_kwh: self.energy.total_generated_kwh(),
            total_consumed_kwh: self.energy.total_consumed_kwh(),
        });
    }

    // -- Phase 8: drain --

    fn phase_drain(&mut self, time: f64, dt: f64) -> Result<(), EngineError> {
        let drained = self.bus.drain();

        // Core reactions to this tick's events, including proposals that
        // subsystems published last tick.
        for event in &drained {
            match event {
                Event::ContaminationLevel { level, .. } => {
                    self.contamination_level = Some(*level);
                }
                Event::ResourceRecovered {
                    resource, quantity, ..
                } => {
                    if self.storage.reserve(*resource, *quantity) {
                        self.log.debug(
                            time,
                            format!(
                                "recovered {quantity:.3} of {}",
                                self.registry.resource_name(*resource)
                            ),
                        );
                    }
                }
                Event::TaskRequested {
                    resource, quantity, ..
                } => {
                    let mut stock = self.storage.snapshot();
                    let scheduled = self.resolver.expand(
                        &self.registry,
                        &mut stock,
                        *resource,
                        *quantity,
                        0,
                        &mut self.queue,
                    )?;
                    if scheduled.is_some() {
                        self.log.info(
                            time,
                            format!(
                                "subsystem requested {quantity:.3} of {}",
                                self.registry.resource_name(*resource)
                            ),
                        );
                    }
                }
                _ => {}
            }
        }

        // Layered subsystem update against a shallow snapshot.
        if !self.subsystems.is_empty() {
            let ctx = TickContext {
                time,
                dt_hours: dt,
                storage: self.storage.snapshot(),
                battery_kwh: self.energy.battery_kwh(),
                solar_output_kw: self.energy.solar_output_kw(time),
                active_tasks: self.queue.active_count(),
                blocked_tasks: self.queue.blocked_count(),
                consumed_kwh: self.tick_consumed_kwh,
                events: &drained,
            };
            let proposals = self.subsystems.run_tick(&ctx);
            for proposal in proposals {
                self.bus.publish(proposal);
            }
        }

        if self.bus.overflow_exceeded() {
            self.log.error(time, "event queue overflow");
            return Err(EngineError::EventQueueOverflow {
                dropped: self.bus.dropped(),
                capacity: self.bus.capacity(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Report
    // -----------------------------------------------------------------------

    fn build_report(&self, reason: TerminationReason, wall_seconds: f64) -> SimulationReport {
        let mut module_counts = BTreeMap::new();
        for (ty, count) in self.fleet.counts_snapshot() {
            module_counts.insert(self.registry.module_name(ty).to_string(), count);
        }
        SimulationReport {
            config: self.config_document.clone(),
            initial_requirements: self.initial_requirements.clone(),
            metrics: self.metrics.clone(),
            completed_tasks: self.completed.to_vec(),
            log: self.log.to_vec(),
            module_counts,
            status: FinalStatus {
                terminated_reason: reason,
                sim_time_hours: self.time_hours,
                wall_time_seconds: wall_seconds,
            },
        }
    }

    // -----------------------------------------------------------------------
    // Accessors (tests, CLI, subsystem wiring)
    // -----------------------------------------------------------------------

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn storage(&self) -> &StorageLedger {
        &self.storage
    }

    pub fn energy(&self) -> &EnergySystem {
        &self.energy
    }

    pub fn fleet(&self) -> &ModuleFleet {
        &self.fleet
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn time_hours(&self) -> f64 {
        self.time_hours
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    pub fn initial_requirements(&self) -> &BTreeMap<String, f64> {
        &self.initial_requirements
    }
}

// ===========================================================================
// Tests
// ===========================================================================
