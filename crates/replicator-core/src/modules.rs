//! Module fleet: per-type counts and per-instance wear, maintenance, and
//! failure state.
//!
//! Each module type has N instances, each with its own wear level and
//! operational state. Slot accounting is aggregated per type: at most
//! `running_instances * parallel_processing_limit` tasks may be active on a
//! type at once. Instances are keyed through a slotmap so failures and
//! recoveries never invalidate other handles.

use crate::event::Event;
use crate::id::{InstanceId, ModuleTypeId};
use crate::registry::{ModuleTypeDef, Registry};
use crate::rng::SimRng;
use slotmap::SlotMap;

// ---------------------------------------------------------------------------
// Instance state
// ---------------------------------------------------------------------------

/// Operational state of one module instance.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub enum Operational {
    Running,
    /// Scheduled maintenance; holds for the configured duration.
    Maintaining { remaining_hours: f64 },
    /// Stochastic failure; holds for the configured repair duration.
    Failed { remaining_hours: f64 },
}

/// Mutable state of one module instance.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InstanceState {
    pub module_type: ModuleTypeId,
    /// Accumulated wear in [0, 1].
    pub wear: f64,
    pub hours_since_maintenance: f64,
    pub operational: Operational,
}

/// Behaviour toggles for the fleet state machine.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FleetToggles {
    pub enable_degradation: bool,
    pub enable_maintenance: bool,
    /// Failure acceleration per unit wear: p/hour = (1/mtbf) * (1 + k * wear).
    pub wear_failure_factor: f64,
    /// Lower bound on effective quality.
    pub quality_floor: f64,
}

impl Default for FleetToggles {
    fn default() -> Self {
        Self {
            enable_degradation: true,
            enable_maintenance: true,
            wear_failure_factor: 4.0,
            quality_floor: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Fleet
// ---------------------------------------------------------------------------

/// All module instances plus per-type slot accounting.
#[derive(Debug)]
pub struct ModuleFleet {
    defs: Vec<ModuleTypeDef>,
    instances: SlotMap<InstanceId, InstanceState>,
    /// Instance ids per type, indexed by ModuleTypeId.
    by_type: Vec<Vec<InstanceId>>,
    /// Occupied task slots per type.
    active_slots: Vec<u32>,
    /// Modules of each type produced during the run (excludes seeds).
    produced: Vec<f64>,
    toggles: FleetToggles,
}

impl ModuleFleet {
    /// Build a fleet from the registry's module-type definitions and the
    /// seed counts. The seed factory begins with the declared instances.
    pub fn new(registry: &Registry, seeds: &[(ModuleTypeId, u32)], toggles: FleetToggles) -> Self {
        let defs: Vec<ModuleTypeDef> = registry
            .module_type_ids()
            .map(|id| registry.module_type(id).expect("id from registry").clone())
            .collect();
        let n = defs.len();
        let mut fleet = Self {
            defs,
            instances: SlotMap::with_key(),
            by_type: vec![Vec::new(); n],
            active_slots: vec![0; n],
            produced: vec![0.0; n],
            toggles,
        };
        for &(ty, count) in seeds {
            fleet.spawn_instances(ty, count);
        }
        fleet
    }

    fn spawn_instances(&mut self, ty: ModuleTypeId, count: u32) {
        for _ in 0..count {
            let id = self.instances.insert(InstanceState {
                module_type: ty,
                wear: 0.0,
                hours_since_maintenance: 0.0,
                operational: Operational::Running,
            });
            self.by_type[ty.0 as usize].push(id);
        }
    }

    /// Grow the fleet after a module-producing task completes. Fractional
    /// production accumulates; whole instances spawn when it crosses an
    /// integer boundary.
    pub fn add_produced(&mut self, ty: ModuleTypeId, quantity: f64) {
        let idx = ty.0 as usize;
        let before = self.produced[idx];
        self.produced[idx] += quantity;
        let whole = self.produced[idx].floor() - before.floor();
        if whole > 0.0 {
            self.spawn_instances(ty, whole as u32);
        }
    }

    // -- Counts & slots --

    pub fn count(&self, ty: ModuleTypeId) -> usize {
        self.by_type[ty.0 as usize].len()
    }

    pub fn count_running(&self, ty: ModuleTypeId) -> usize {
        self.by_type[ty.0 as usize]
            .iter()
            .filter(|id| {
                matches!(
                    self.instances[**id].operational,
                    Operational::Running
                )
            })
            .count()
    }

    /// Total produced (non-seed) modules of a type.
    pub fn produced_count(&self, ty: ModuleTypeId) -> f64 {
        self.produced[ty.0 as usize]
    }

    /// Slot capacity currently provided by running instances.
    pub fn slot_capacity(&self, ty: ModuleTypeId) -> u32 {
        let def = &self.defs[ty.0 as usize];
        self.count_running(ty) as u32 * def.parallel_processing_limit
    }

    pub fn active_slots(&self, ty: ModuleTypeId) -> u32 {
        self.active_slots[ty.0 as usize]
    }

    pub fn has_free_slot(&self, ty: ModuleTypeId) -> bool {
        self.active_slots(ty) < self.slot_capacity(ty)
    }

    /// Reserve one slot. Returns false when no running instance has capacity.
    pub fn reserve_slot(&mut self, ty: ModuleTypeId) -> bool {
        if !self.has_free_slot(ty) {
            return false;
        }
        self.active_slots[ty.0 as usize] += 1;
        true
    }

    pub fn release_slot(&mut self, ty: ModuleTypeId) {
        let slots = &mut self.active_slots[ty.0 as usize];
        *slots = slots.saturating_sub(1);
    }

    /// Slots occupied beyond current capacity (after failures). The engine
    /// requeues this many tasks of the type.
    pub fn slot_overflow(&self, ty: ModuleTypeId) -> u32 {
        self.active_slots(ty).saturating_sub(self.slot_capacity(ty))
    }

    pub fn def(&self, ty: ModuleTypeId) -> &ModuleTypeDef {
        &self.defs[ty.0 as usize]
    }

    pub fn type_ids(&self) -> impl Iterator<Item = ModuleTypeId> + '_ {
        (0..self.defs.len() as u32).map(ModuleTypeId)
    }

    /// Idle electrical draw of every instance, in kW.
    pub fn idle_power_kw(&self) -> f64 {
        self.instances
            .values()
            .map(|inst| self.defs[inst.module_type.0 as usize].idle_power_kw)
            .sum()
    }

    // -- Effective performance --

    /// Mean `max_throughput * (1 - wear)` over running instances; falls back
    /// to the nominal rate when none are running.
    pub fn effective_throughput(&self, ty: ModuleTypeId) -> f64 {
        let def = &self.defs[ty.0 as usize];
        let running: Vec<&InstanceState> = self.by_type[ty.0 as usize]
            .iter()
            .map(|id| &self.instances[*id])
            .filter(|inst| matches!(inst.operational, Operational::Running))
            .collect();
        if running.is_empty() {
            return def.max_throughput;
        }
        let sum: f64 = running
            .iter()
            .map(|inst| def.max_throughput * (1.0 - inst.wear))
            .sum();
        (sum / running.len() as f64).max(1e-6)
    }

    /// Mean `quality_base_rate * (1 - wear)` over running instances, floored.
    pub fn effective_quality(&self, ty: ModuleTypeId) -> f64 {
        let def = &self.defs[ty.0 as usize];
        let running: Vec<&InstanceState> = self.by_type[ty.0 as usize]
            .iter()
            .map(|id| &self.instances[*id])
            .filter(|inst| matches!(inst.operational, Operational::Running))
            .collect();
        if running.is_empty() {
            return def.quality_base_rate.max(self.toggles.quality_floor);
        }
        let sum: f64 = running
            .iter()
            .map(|inst| def.quality_base_rate * (1.0 - inst.wear))
            .sum();
        (sum / running.len() as f64).max(self.toggles.quality_floor)
    }

    // -- State machine --

    /// Advance every instance by one tick. Utilization of a type feeds its
    /// instances' wear accrual ("per hour active"). Emits a ModuleFailed
    /// event per new failure.
    pub fn tick(&mut self, dt_hours: f64, time: f64, rng: &mut SimRng, events: &mut Vec<Event>) {
        for ty_idx in 0..self.defs.len() {
            let def = self.defs[ty_idx].clone();
            let ty = ModuleTypeId(ty_idx as u32);
            let capacity = self.slot_capacity(ty).max(1);
            let utilization = (self.active_slots[ty_idx] as f64 / capacity as f64).min(1.0);

            let ids: Vec<InstanceId> = self.by_type[ty_idx].clone();
            for id in ids {
                let toggles = self.toggles;
                let inst = &mut self.instances[id];
                match inst.operational {
                    Operational::Running => {
                        if toggles.enable_degradation {
                            inst.wear = (inst.wear
                                + def.degradation_rate / 1000.0 * dt_hours * utilization)
                                .min(1.0);
                        }
                        inst.hours_since_maintenance += dt_hours;

                        if toggles.enable_maintenance
                            && inst.hours_since_maintenance >= def.maintenance_interval_hours
                        {
                            inst.operational = Operational::Maintaining {
                                remaining_hours: def.maintenance_duration_hours,
                            };
                            continue;
                        }

                        if toggles.enable_degradation && def.mtbf_hours.is_finite() {
                            let p_hour = (1.0 / def.mtbf_hours)
                                * (1.0 + toggles.wear_failure_factor * inst.wear);
                            if rng.chance(p_hour * dt_hours) {
                                inst.operational = Operational::Failed {
                                    remaining_hours: def.repair_duration_hours,
                                };
                                events.push(Event::ModuleFailed { module: ty, time });
                            }
                        }
                    }
                    Operational::Maintaining { remaining_hours } => {
                        let left = remaining_hours - dt_hours;
                        if left <= 0.0 {
                            inst.wear *= 1.0 - def.wear_recovery_factor;
                            inst.hours_since_maintenance = 0.0;
                            inst.operational = Operational::Running;
                        } else {
                            inst.operational = Operational::Maintaining {
                                remaining_hours: left,
                            };
                        }
                    }
                    Operational::Failed { remaining_hours } => {
                        let left = remaining_hours - dt_hours;
                        if left <= 0.0 {
                            inst.wear *= 1.0 - def.wear_recovery_factor;
                            inst.hours_since_maintenance = 0.0;
                            inst.operational = Operational::Running;
                        } else {
                            inst.operational = Operational::Failed {
                                remaining_hours: left,
                            };
                        }
                    }
                }
            }
        }
    }

    /// Per-type instance counts, for metrics snapshots.
    pub fn counts_snapshot(&self) -> Vec<(ModuleTypeId, usize)> {
        self.type_ids().map(|ty| (ty, self.count(ty))).collect()
    }
}
