//! Fatal engine errors.
//!
//! Blocking conditions (insufficient resources, energy, module slots,
//! storage) are task state handled by the dispatch/rescan protocol and never
//! appear here. Everything in [`EngineError`] unwinds the tick loop.

use crate::resolver::ResolveError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The resolver found a recipe cycle while expanding a goal.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The event bus dropped more than 10% of its queue capacity.
    #[error("event queue overflow: {dropped} events dropped (queue capacity {capacity})")]
    EventQueueOverflow { dropped: u64, capacity: usize },

    /// Subsystem dependency declarations form a cycle.
    #[error("subsystem dependency cycle involving '{0}'")]
    SubsystemCycle(String),

    /// A subsystem declared a dependency on an unregistered subsystem.
    #[error("subsystem '{subsystem}' depends on unknown subsystem '{dependency}'")]
    UnknownSubsystemDependency {
        subsystem: String,
        dependency: String,
    },

    /// A seed or target id does not exist in the registry.
    #[error("configuration references unknown {kind} id {id}")]
    UnknownId { kind: &'static str, id: u32 },
}
