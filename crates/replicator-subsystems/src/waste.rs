//! Waste recycling: converts waste streams back into raw resources.
//!
//! Waste arrives over the bus as [`Event::WasteGenerated`]. Streams with a
//! recycling rule accumulate in a backlog; each tick a bounded amount is
//! processed and the recovered fraction is proposed back to the core as
//! [`Event::ResourceRecovered`]. Waste without a rule is discarded.

use crate::SubsystemBuildError;
use replicator_core::event::Event;
use replicator_core::id::ResourceId;
use replicator_core::registry::Registry;
use replicator_core::subsystem::{Subsystem, TickContext};
use std::collections::BTreeMap;

/// One recycling rule, by resource name.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RecyclingRuleConfig {
    pub waste: String,
    pub recovered: String,
    /// Fraction of processed waste recovered, in [0, 1].
    pub efficiency: f64,
}

/// Waste subsystem parameters, from the `subsystem_data.waste_recycling` block.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WasteConfig {
    pub rules: Vec<RecyclingRuleConfig>,
    /// Units of waste processed per hour.
    pub processing_rate_per_hour: f64,
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    recovered: ResourceId,
    efficiency: f64,
}

/// The waste-recycling subsystem.
#[derive(Debug)]
pub struct WasteRecycler {
    rules: BTreeMap<ResourceId, Rule>,
    processing_rate_per_hour: f64,
    /// Pending waste per stream, ordered for deterministic processing.
    backlog: BTreeMap<ResourceId, f64>,
    total_recovered: f64,
}

impl WasteRecycler {
    pub fn from_value(
        data: &serde_json::Value,
        registry: &Registry,
        tag: &str,
    ) -> Result<Self, SubsystemBuildError> {
        let config: WasteConfig = crate::parse_data(data, tag)?;
        let mut rules = BTreeMap::new();
        for rule in &config.rules {
            let waste = registry.resource_id(&rule.waste).ok_or_else(|| {
                SubsystemBuildError::UnknownResource {
                    tag: tag.to_string(),
                    resource: rule.waste.clone(),
                }
            })?;
            let recovered = registry.resource_id(&rule.recovered).ok_or_else(|| {
                SubsystemBuildError::UnknownResource {
                    tag: tag.to_string(),
                    resource: rule.recovered.clone(),
                }
            })?;
            rules.insert(
                waste,
                Rule {
                    recovered,
                    efficiency: rule.efficiency.clamp(0.0, 1.0),
                },
            );
        }
        let rate = if config.processing_rate_per_hour > 0.0 {
            config.processing_rate_per_hour
        } else {
            10.0
        };
        Ok(Self {
            rules,
            processing_rate_per_hour: rate,
            backlog: BTreeMap::new(),
            total_recovered: 0.0,
        })
    }

    pub fn backlog_of(&self, waste: ResourceId) -> f64 {
        self.backlog.get(&waste).copied().unwrap_or(0.0)
    }

    pub fn total_recovered(&self) -> f64 {
        self.total_recovered
    }
}

impl Subsystem for WasteRecycler {
    fn name(&self) -> &str {
        "waste_recycling"
    }

    fn on_tick(&mut self, ctx: &TickContext<'_>) -> Vec<Event> {
        // Ingest this tick's waste streams.
        for event in ctx.events {
            if let Event::WasteGenerated {
                resource, quantity, ..
            } = event
                && self.rules.contains_key(resource)
            {
                *self.backlog.entry(*resource).or_insert(0.0) += quantity;
            }
        }

        // Process a bounded amount, oldest stream id first.
        let mut budget = self.processing_rate_per_hour * ctx.dt_hours;
        let mut out = Vec::new();
        for (waste, pending) in self.backlog.iter_mut() {
            if budget <= 0.0 {
                break;
            }
            if *pending <= 0.0 {
                continue;
            }
            let processed = pending.min(budget);
            *pending -= processed;
            budget -= processed;

            let rule = self.rules[waste];
            let recovered = processed * rule.efficiency;
            if recovered > 0.0 {
                self.total_recovered += recovered;
                out.push(Event::ResourceRecovered {
                    resource: rule.recovered,
                    quantity: recovered,
                    time: ctx.time,
                });
            }
        }
        self.backlog.retain(|_, pending| *pending > 0.0);
        out
    }
}
