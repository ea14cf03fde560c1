//! Software production planning.
//!
//! Operator software is produced by ordinary recipes, but nothing in the
//! replication goal demands it directly. This subsystem watches the declared
//! software packages and, when one is absent from storage, proposes a
//! production task for it. Software is produced once and persists: presence
//! is checked at dispatch, never consumed.

use crate::SubsystemBuildError;
use replicator_core::event::Event;
use replicator_core::id::ResourceId;
use replicator_core::registry::Registry;
use replicator_core::subsystem::{Subsystem, TickContext};
use std::collections::BTreeSet;

/// Planner parameters, from the `subsystem_data.software_production` block.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SoftwareConfig {
    /// Software packages to ensure exist, by resource name. Empty means
    /// every resource flagged as software in the registry.
    pub packages: Vec<String>,
}

/// The software-production subsystem.
#[derive(Debug)]
pub struct SoftwarePlanner {
    packages: BTreeSet<ResourceId>,
    requested: BTreeSet<ResourceId>,
}

impl SoftwarePlanner {
    pub fn from_value(
        data: &serde_json::Value,
        registry: &Registry,
        tag: &str,
    ) -> Result<Self, SubsystemBuildError> {
        let config: SoftwareConfig = crate::parse_data(data, tag)?;
        let mut packages = BTreeSet::new();
        if config.packages.is_empty() {
            for id in registry.resource_ids() {
                if registry.resource(id).is_some_and(|def| def.software) {
                    packages.insert(id);
                }
            }
        } else {
            for name in &config.packages {
                let id = registry.resource_id(name).ok_or_else(|| {
                    SubsystemBuildError::UnknownResource {
                        tag: tag.to_string(),
                        resource: name.clone(),
                    }
                })?;
                packages.insert(id);
            }
        }
        Ok(Self {
            packages,
            requested: BTreeSet::new(),
        })
    }

    pub fn pending(&self) -> usize {
        self.packages.len() - self.requested.len()
    }
}

impl Subsystem for SoftwarePlanner {
    fn name(&self) -> &str {
        "software_production"
    }

    fn on_tick(&mut self, ctx: &TickContext<'_>) -> Vec<Event> {
        let mut out = Vec::new();
        for &package in &self.packages {
            if self.requested.contains(&package) {
                continue;
            }
            let on_hand = ctx.storage.get(&package).copied().unwrap_or(0.0);
            if on_hand >= 1.0 {
                self.requested.insert(package);
                continue;
            }
            out.push(Event::TaskRequested {
                resource: package,
                quantity: 1.0,
                time: ctx.time,
            });
            self.requested.insert(package);
        }
        out
    }
}
