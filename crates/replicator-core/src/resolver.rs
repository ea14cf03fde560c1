//! Requirements resolver: expands a production goal into raw-material demand
//! and a dependency-ordered task set.
//!
//! Both operations share one depth-first walker that carries the stack of
//! resources currently being expanded; revisiting a resource on the stack is
//! a fatal [`ResolveError::CircularDependency`] carrying the offending path.
//!
//! Raw-demand expansion is memoised per (resource, quantity rounded to 1e-3)
//! in a bounded true-LRU cache, so common subtrees are not re-expanded.

use crate::id::{ResourceId, TaskId};
use crate::registry::Registry;
use crate::task::{Task, TaskQueue};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;

const SHORTFALL_EPSILON: f64 = 1e-9;

/// Errors surfaced by goal expansion. Fatal, not blocking.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// A recipe transitively requires its own output.
    #[error("circular dependency: {}", path.join(" -> "))]
    CircularDependency { path: Vec<String> },
}

/// Cache key: resource plus quantity rounded to milli-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RequirementKey {
    resource: ResourceId,
    quantity_milli: i64,
}

impl RequirementKey {
    fn new(resource: ResourceId, quantity: f64) -> Self {
        Self {
            resource,
            quantity_milli: (quantity * 1000.0).round() as i64,
        }
    }
}

/// The resolver. Owns the memoisation cache; all other state is per-call.
pub struct Resolver {
    cache: LruCache<RequirementKey, HashMap<ResourceId, f64>>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("cached_entries", &self.cache.len())
            .field("cache_capacity", &self.cache.cap())
            .finish()
    }
}

impl Resolver {
    pub fn new(cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity.max(1)).expect("non-zero after max");
        Self {
            cache: LruCache::new(capacity),
        }
    }

    // -----------------------------------------------------------------------
    // Raw-material demand
    // -----------------------------------------------------------------------

    /// Total raw-material demand to produce `quantity` of `resource`.
    ///
    /// Raw means mined-or-unproducible: the output of an extraction recipe,
    /// or a resource with no recipe at all.
    pub fn raw_requirements(
        &mut self,
        registry: &Registry,
        resource: ResourceId,
        quantity: f64,
    ) -> Result<HashMap<ResourceId, f64>, ResolveError> {
        let mut visited = Vec::new();
        self.raw_requirements_inner(registry, resource, quantity, &mut visited)
    }

    fn raw_requirements_inner(
        &mut self,
        registry: &Registry,
        resource: ResourceId,
        quantity: f64,
        visited: &mut Vec<ResourceId>,
    ) -> Result<HashMap<ResourceId, f64>, ResolveError> {
        if visited.contains(&resource) {
            return Err(cycle_error(registry, visited, resource));
        }

        let key = RequirementKey::new(resource, quantity);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }

        let mut totals: HashMap<ResourceId, f64> = HashMap::new();
        match registry.recipe_for(resource) {
            None => {
                totals.insert(resource, quantity);
            }
            Some((_, recipe)) if recipe.is_extraction() => {
                totals.insert(resource, quantity);
            }
            Some((_, recipe)) => {
                let recipe = recipe.clone();
                visited.push(resource);
                for (input, input_qty) in &recipe.inputs {
                    let needed = input_qty * quantity / recipe.output_quantity;
                    let sub = self.raw_requirements_inner(registry, *input, needed, visited)?;
                    for (raw, qty) in sub {
                        *totals.entry(raw).or_insert(0.0) += qty;
                    }
                }
                visited.pop();
            }
        }

        self.cache.put(key, totals.clone());
        Ok(totals)
    }

    // -----------------------------------------------------------------------
    // Task expansion
    // -----------------------------------------------------------------------

    /// Expand a goal into tasks on the queue. Demand is netted against
    /// `stock` (a working copy of on-hand quantities, mutated in place so
    /// sibling branches cannot double-claim the same units). The goal itself
    /// always gets a task; inputs only get tasks for their shortfall.
    ///
    /// Returns the goal task's id, or `None` when the goal resource has no
    /// recipe (nothing can be scheduled for it).
    pub fn expand(
        &mut self,
        registry: &Registry,
        stock: &mut HashMap<ResourceId, f64>,
        resource: ResourceId,
        quantity: f64,
        base_priority: u32,
        queue: &mut TaskQueue,
    ) -> Result<Option<TaskId>, ResolveError> {
        let mut visited = Vec::new();
        self.expand_inner(
            registry,
            stock,
            resource,
            quantity,
            base_priority,
            &mut visited,
            queue,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_inner(
        &mut self,
        registry: &Registry,
        stock: &mut HashMap<ResourceId, f64>,
        resource: ResourceId,
        quantity: f64,
        priority: u32,
        visited: &mut Vec<ResourceId>,
        queue: &mut TaskQueue,
    ) -> Result<Option<TaskId>, ResolveError> {
        if visited.contains(&resource) {
            return Err(cycle_error(registry, visited, resource));
        }

        let Some((recipe_id, recipe)) = registry.recipe_for(resource) else {
            // Unproducible leaf: no task. The parent blocks on resources at
            // dispatch if the shortfall is real.
            return Ok(None);
        };
        let recipe = recipe.clone();

        let mut dependencies = Vec::new();
        visited.push(resource);
        for (input, input_qty) in &recipe.inputs {
            let needed = input_qty * quantity / recipe.output_quantity;
            let held = stock.entry(*input).or_insert(0.0);
            let claimed = held.min(needed);
            *held -= claimed;
            let shortfall = needed - claimed;
            if shortfall > SHORTFALL_EPSILON {
                let child = self.expand_inner(
                    registry,
                    stock,
                    *input,
                    shortfall,
                    priority + 1,
                    visited,
                    queue,
                )?;
                if let Some(id) = child {
                    dependencies.push(id);
                }
            }
        }
        visited.pop();

        let id = queue.allocate_id();
        let task = Task::new(
            id,
            resource,
            registry.resource_name(resource),
            quantity,
            priority,
            dependencies,
            Some(recipe_id),
        );
        queue.enqueue(task);
        Ok(Some(id))
    }

    /// Number of cached raw-requirement entries.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

fn cycle_error(registry: &Registry, visited: &[ResourceId], repeat: ResourceId) -> ResolveError {
    let mut path: Vec<String> = visited
        .iter()
        .map(|id| registry.resource_name(*id).to_string())
        .collect();
    path.push(registry.resource_name(repeat).to_string());
    ResolveError::CircularDependency { path }
}
