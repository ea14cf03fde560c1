//! Replicator Core -- the simulation engine for a self-replicating
//! solar-powered factory.
//!
//! Starting from a small set of seed modules and ore extraction capability,
//! the engine schedules production until one of every target module type has
//! been built -- the factory has reproduced itself -- under energy, storage,
//! contamination, quality, and degradation constraints.
//!
//! # Eight-Phase Tick Pipeline
//!
//! Each call to [`engine::Engine::step`] advances the simulation by one tick
//! (default 0.1 h) through the following phases:
//!
//! 1. **Energy** -- Solar generation, idle/active draw, battery update.
//! 2. **Advance** -- Active tasks count down their remaining hours.
//! 3. **Completion** -- Finished tasks deliver quality-scaled outputs and
//!    release their module slots; module products grow the fleet.
//! 4. **Rescan** -- Blocked tasks whose cause cleared re-enter the queue.
//! 5. **Dispatch** -- Up to K queued tasks start, subject to module, input,
//!    energy, contamination, and software constraints.
//! 6. **Module state** -- Wear, scheduled maintenance, stochastic failure.
//! 7. **Metrics** -- Periodic samples, gated by the metric interval.
//! 8. **Drain** -- Event delivery, subsystem updates, overflow checks.
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- Main simulation engine and pipeline orchestrator.
//! - [`registry::Registry`] -- Immutable registry of resources, recipes, and
//!   module types (frozen at load).
//! - [`resolver::Resolver`] -- Goal expansion with cycle detection and an
//!   LRU-memoised raw-demand cache.
//! - [`task::TaskQueue`] -- Priority heap plus blocked/active/completed
//!   bookkeeping.
//! - [`modules::ModuleFleet`] -- Per-instance wear/maintenance/failure state.
//! - [`energy::EnergySystem`] -- Solar model and battery buffer.
//! - [`event::EventBus`] -- Bounded publish/subscribe channel to subsystems.
//! - [`report::SimulationReport`] -- The structured output log of one run.

pub mod config;
pub mod dispatch;
pub mod energy;
pub mod engine;
pub mod error;
pub mod event;
pub mod id;
pub mod metrics;
pub mod modules;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod rng;
pub mod storage;
pub mod subsystem;
pub mod task;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
