//! Thermal management: heat accumulates with energy use and radiates away.
//!
//! Heat generated is proportional to the energy consumed each tick; the
//! radiator sheds a fixed thermal power. Crossing the limit upward emits a
//! single [`Event::ThermalLimitReached`] until the temperature drops back
//! below the limit.

use crate::SubsystemBuildError;
use replicator_core::event::Event;
use replicator_core::subsystem::{Subsystem, TickContext};

/// Thermal model parameters, from the `subsystem_data.thermal` block.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThermalConfig {
    /// Temperature rise per kWh consumed, in degrees Celsius.
    pub heat_per_kwh_c: f64,
    /// Radiator dissipation, in degrees Celsius per hour.
    pub dissipation_c_per_hour: f64,
    /// Limit above which the event fires.
    pub limit_c: f64,
    /// Floor temperature.
    pub ambient_c: f64,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            heat_per_kwh_c: 0.05,
            dissipation_c_per_hour: 2.0,
            limit_c: 80.0,
            ambient_c: 20.0,
        }
    }
}

/// The thermal subsystem.
#[derive(Debug)]
pub struct ThermalManager {
    config: ThermalConfig,
    temperature_c: f64,
    over_limit: bool,
}

impl ThermalManager {
    pub fn new(config: ThermalConfig) -> Self {
        let ambient = config.ambient_c;
        Self {
            config,
            temperature_c: ambient,
            over_limit: false,
        }
    }

    pub fn from_value(data: &serde_json::Value, tag: &str) -> Result<Self, SubsystemBuildError> {
        Ok(Self::new(crate::parse_data(data, tag)?))
    }

    pub fn temperature_c(&self) -> f64 {
        self.temperature_c
    }
}

impl Subsystem for ThermalManager {
    fn name(&self) -> &str {
        "thermal"
    }

    fn on_tick(&mut self, ctx: &TickContext<'_>) -> Vec<Event> {
        self.temperature_c += ctx.consumed_kwh * self.config.heat_per_kwh_c;
        self.temperature_c -= self.config.dissipation_c_per_hour * ctx.dt_hours;
        self.temperature_c = self.temperature_c.max(self.config.ambient_c);

        let mut out = Vec::new();
        if self.temperature_c > self.config.limit_c {
            if !self.over_limit {
                self.over_limit = true;
                out.push(Event::ThermalLimitReached {
                    temperature_c: self.temperature_c,
                    time: ctx.time,
                });
            }
        } else {
            self.over_limit = false;
        }
        out
    }
}
