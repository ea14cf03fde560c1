//! Optional-subsystem plumbing: the trait, the per-tick context snapshot,
//! and the layered executor.
//!
//! Subsystems never hold references into the engine. Each tick they receive
//! a [`TickContext`], a shallow snapshot of the ledger and counters plus the
//! events drained this tick, and return proposal events. The core publishes
//! those proposals to the bus and applies the ones it understands at the next
//! tick's drain. Layers are computed once at init from declared dependency
//! names; subsystems within a layer have disjoint dependencies and may run
//! concurrently under the `parallel` feature.

use crate::error::EngineError;
use crate::event::Event;
use crate::id::ResourceId;
use std::collections::HashMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

// ---------------------------------------------------------------------------
// Tick context
// ---------------------------------------------------------------------------

/// Read-only snapshot handed to every subsystem each tick. Shallow copies
/// only: the quantity map is cloned, task lists arrive as counts, and events
/// are borrowed for the duration of the call.
#[derive(Debug, Clone)]
pub struct TickContext<'a> {
    pub time: f64,
    pub dt_hours: f64,
    /// Shallow copy of the storage quantity map.
    pub storage: HashMap<ResourceId, f64>,
    pub battery_kwh: f64,
    pub solar_output_kw: f64,
    pub active_tasks: usize,
    pub blocked_tasks: usize,
    /// Energy served this tick, in kWh.
    pub consumed_kwh: f64,
    /// Events drained from the bus this tick.
    pub events: &'a [Event],
}

// ---------------------------------------------------------------------------
// Subsystem trait
// ---------------------------------------------------------------------------

/// An optional subsystem plugged in over the event bus.
pub trait Subsystem: Send + std::fmt::Debug {
    /// Unique name, referenced by other subsystems' dependency lists.
    fn name(&self) -> &str;

    /// Names of subsystems that must run in an earlier layer.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Advance one tick. Returned events are proposals published to the bus.
    fn on_tick(&mut self, ctx: &TickContext<'_>) -> Vec<Event>;
}

// ---------------------------------------------------------------------------
// Layered executor
// ---------------------------------------------------------------------------

/// Subsystems grouped into topological layers at init.
#[derive(Debug, Default)]
pub struct SubsystemSet {
    layers: Vec<Vec<Box<dyn Subsystem>>>,
}

impl SubsystemSet {
    /// Compute a topological layering from declared dependencies.
    /// Layer k holds subsystems whose dependencies all sit in layers < k.
    pub fn layered(subsystems: Vec<Box<dyn Subsystem>>) -> Result<Self, EngineError> {
        let names: Vec<String> = subsystems.iter().map(|s| s.name().to_string()).collect();
        let index_of: HashMap<&str, usize> =
            names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();

        let mut depth = vec![None::<usize>; subsystems.len()];

        fn resolve_depth(
            i: usize,
            subsystems: &[Box<dyn Subsystem>],
            index_of: &HashMap<&str, usize>,
            depth: &mut [Option<usize>],
            on_stack: &mut Vec<usize>,
        ) -> Result<usize, EngineError> {
            if let Some(d) = depth[i] {
                return Ok(d);
            }
            if on_stack.contains(&i) {
                return Err(EngineError::SubsystemCycle(
                    subsystems[i].name().to_string(),
                ));
            }
            on_stack.push(i);
            let mut d = 0;
            for dep in subsystems[i].dependencies() {
                let Some(&j) = index_of.get(dep.as_str()) else {
                    return Err(EngineError::UnknownSubsystemDependency {
                        subsystem: subsystems[i].name().to_string(),
                        dependency: dep,
                    });
                };
                d = d.max(resolve_depth(j, subsystems, index_of, depth, on_stack)? + 1);
            }
            on_stack.pop();
            depth[i] = Some(d);
            Ok(d)
        }

        let mut on_stack = Vec::new();
        for i in 0..subsystems.len() {
            resolve_depth(i, &subsystems, &index_of, &mut depth, &mut on_stack)?;
        }

        let max_depth = depth.iter().map(|d| d.unwrap_or(0)).max().unwrap_or(0);
        let mut layers: Vec<Vec<Box<dyn Subsystem>>> = Vec::new();
        for _ in 0..=max_depth {
            layers.push(Vec::new());
        }
        for (sub, d) in subsystems.into_iter().zip(depth) {
            layers[d.unwrap_or(0)].push(sub);
        }
        layers.retain(|l| !l.is_empty());

        Ok(Self { layers })
    }

    /// Run every subsystem for one tick, layer by layer. Within a layer the
    /// subsystems are independent; under the `parallel` feature they run
    /// concurrently. Proposal events are concatenated in registration order
    /// so results stay deterministic either way.
    pub fn run_tick(&mut self, ctx: &TickContext<'_>) -> Vec<Event> {
        let mut proposals = Vec::new();
        for layer in &mut self.layers {
            #[cfg(feature = "parallel")]
            let layer_out: Vec<Vec<Event>> =
                layer.par_iter_mut().map(|s| s.on_tick(ctx)).collect();

            #[cfg(not(feature = "parallel"))]
            let layer_out: Vec<Vec<Event>> = layer.iter_mut().map(|s| s.on_tick(ctx)).collect();

            for out in layer_out {
                proposals.extend(out);
            }
        }
        proposals
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn subsystem_count(&self) -> usize {
        self.layers.iter().map(|l| l.len()).sum()
    }

    /// Names layer by layer, for logging.
    pub fn layer_names(&self) -> Vec<Vec<String>> {
        self.layers
            .iter()
            .map(|l| l.iter().map(|s| s.name().to_string()).collect())
            .collect()
    }
}
