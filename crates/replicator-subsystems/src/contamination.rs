//! Cleanroom contamination tracking.
//!
//! Contamination rises with factory activity and falls with filtration. The
//! current level is published every tick as [`Event::ContaminationLevel`];
//! the core caches the latest value and dispatch checks it against a
//! recipe's cleanroom class.

use crate::SubsystemBuildError;
use replicator_core::event::Event;
use replicator_core::subsystem::{Subsystem, TickContext};

/// Contamination model parameters, from `subsystem_data.contamination`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContaminationConfig {
    /// Baseline particle generation per hour.
    pub base_rate_per_hour: f64,
    /// Additional particles per active task per hour.
    pub per_task_rate_per_hour: f64,
    /// Filtration removal per hour.
    pub filtration_per_hour: f64,
    /// Best achievable level (filtered-air floor).
    pub floor: f64,
    /// Starting level.
    pub initial_level: f64,
}

impl Default for ContaminationConfig {
    fn default() -> Self {
        Self {
            base_rate_per_hour: 5.0,
            per_task_rate_per_hour: 20.0,
            filtration_per_hour: 50.0,
            floor: 10.0,
            initial_level: 100.0,
        }
    }
}

/// The contamination subsystem.
#[derive(Debug)]
pub struct ContaminationMonitor {
    config: ContaminationConfig,
    level: f64,
}

impl ContaminationMonitor {
    pub fn new(config: ContaminationConfig) -> Self {
        let level = config.initial_level.max(config.floor);
        Self { config, level }
    }

    pub fn from_value(data: &serde_json::Value, tag: &str) -> Result<Self, SubsystemBuildError> {
        Ok(Self::new(crate::parse_data(data, tag)?))
    }

    pub fn level(&self) -> f64 {
        self.level
    }
}

impl Subsystem for ContaminationMonitor {
    fn name(&self) -> &str {
        "contamination"
    }

    fn on_tick(&mut self, ctx: &TickContext<'_>) -> Vec<Event> {
        let generated = self.config.base_rate_per_hour
            + self.config.per_task_rate_per_hour * ctx.active_tasks as f64;
        self.level += (generated - self.config.filtration_per_hour) * ctx.dt_hours;
        self.level = self.level.max(self.config.floor);

        vec![Event::ContaminationLevel {
            level: self.level,
            time: ctx.time,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx(active_tasks: usize, events: &[Event]) -> TickContext<'_> {
        TickContext {
            time: 0.0,
            dt_hours: 0.1,
            storage: HashMap::new(),
            battery_kwh: 0.0,
            solar_output_kw: 0.0,
            active_tasks,
            blocked_tasks: 0,
            consumed_kwh: 0.0,
            events,
        }
    }

    #[test]
    fn idle_factory_settles_at_floor() {
        let mut monitor = ContaminationMonitor::new(ContaminationConfig::default());
        let events = Vec::new();
        for _ in 0..1000 {
            monitor.on_tick(&ctx(0, &events));
        }
        assert_eq!(monitor.level(), 10.0);
    }

    #[test]
    fn activity_raises_level() {
        let mut monitor = ContaminationMonitor::new(ContaminationConfig::default());
        let events = Vec::new();
        // 10 tasks: 5 + 200 - 50 = +155/hour.
        let before = monitor.level();
        monitor.on_tick(&ctx(10, &events));
        assert!(monitor.level() > before);
    }

    #[test]
    fn publishes_level_every_tick() {
        let mut monitor = ContaminationMonitor::new(ContaminationConfig::default());
        let events = Vec::new();
        for _ in 0..5 {
            let out = monitor.on_tick(&ctx(0, &events));
            assert_eq!(out.len(), 1);
            assert!(matches!(out[0], Event::ContaminationLevel { .. }));
        }
    }
}
