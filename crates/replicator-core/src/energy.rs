//! Energy subsystem: solar generation model plus battery buffer.
//!
//! Generation follows a half-sine daylight profile scaled so that one clear
//! day integrates to the configured peak-sun-hours. The battery applies
//! charge/discharge conversion losses and keeps a minimum reserve that task
//! dispatch may not draw below. Every tick's flows are accounted so that
//! `generated - consumed - losses == battery - battery_initial` holds exactly.

use crate::rng::SimRng;

const ENERGY_EPSILON: f64 = 1e-9;

/// Static energy-system parameters, resolved from the configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EnergyParams {
    pub solar_capacity_kw: f64,
    pub battery_capacity_kwh: f64,
    /// Conversion efficiency when charging, in (0, 1].
    pub charge_efficiency: f64,
    /// Conversion efficiency when discharging, in (0, 1].
    pub discharge_efficiency: f64,
    /// Fraction of capacity tasks may not draw below.
    pub reserve_fraction: f64,
    /// Equivalent peak-sun-hours over one 24 h cycle.
    pub peak_sun_hours: f64,
    /// Hour of day at which generation begins.
    pub sunrise_hour: f64,
    /// Length of the generation window, in hours.
    pub daylight_hours: f64,
    pub enable_weather: bool,
    /// Mean cloud attenuation, in [0, 1]. Only used when weather is enabled.
    pub cloud_cover: f64,
}

impl Default for EnergyParams {
    fn default() -> Self {
        Self {
            solar_capacity_kw: 100.0,
            battery_capacity_kwh: 500.0,
            charge_efficiency: 0.95,
            discharge_efficiency: 0.95,
            reserve_fraction: 0.2,
            peak_sun_hours: 8.0,
            sunrise_hour: 6.0,
            daylight_hours: 12.0,
            enable_weather: false,
            cloud_cover: 0.3,
        }
    }
}

/// Flows accounted for a single tick, in kWh.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyTickResult {
    pub generated_kwh: f64,
    /// Consumption actually served (may be below the request when the
    /// battery empties mid-tick).
    pub consumed_kwh: f64,
    /// Conversion losses plus curtailed generation.
    pub losses_kwh: f64,
    /// Requested consumption that could not be served.
    pub unserved_kwh: f64,
}

/// Battery state plus cumulative accounting.
#[derive(Debug, Clone)]
pub struct EnergySystem {
    params: EnergyParams,
    battery_kwh: f64,
    initial_battery_kwh: f64,
    total_generated_kwh: f64,
    total_consumed_kwh: f64,
    total_losses_kwh: f64,
    /// Cloud factor for the current simulated hour.
    weather_factor: f64,
    last_weather_hour: i64,
}

impl EnergySystem {
    pub fn new(params: EnergyParams, initial_battery_kwh: f64) -> Self {
        let battery = initial_battery_kwh.clamp(0.0, params.battery_capacity_kwh);
        Self {
            params,
            battery_kwh: battery,
            initial_battery_kwh: battery,
            total_generated_kwh: 0.0,
            total_consumed_kwh: 0.0,
            total_losses_kwh: 0.0,
            weather_factor: 1.0,
            last_weather_hour: -1,
        }
    }

    /// The daylight factor at the given simulation time. Scaled so a clear
    /// 24 h cycle integrates to `peak_sun_hours`.
    pub fn sun_factor(&self, time_hours: f64) -> f64 {
        let p = &self.params;
        if p.daylight_hours <= 0.0 {
            return 0.0;
        }
        let hour_of_day = time_hours.rem_euclid(24.0);
        let since_sunrise = hour_of_day - p.sunrise_hour;
        if since_sunrise < 0.0 || since_sunrise > p.daylight_hours {
            return 0.0;
        }
        let amplitude = p.peak_sun_hours * std::f64::consts::PI / (2.0 * p.daylight_hours);
        amplitude * (std::f64::consts::PI * since_sunrise / p.daylight_hours).sin()
    }

    /// Instantaneous solar output in kW, including the weather factor.
    pub fn solar_output_kw(&self, time_hours: f64) -> f64 {
        self.params.solar_capacity_kw * self.sun_factor(time_hours) * self.weather_factor
    }

    /// Resample the cloud factor once per simulated hour.
    fn update_weather(&mut self, time_hours: f64, rng: &mut SimRng) {
        if !self.params.enable_weather {
            self.weather_factor = 1.0;
            return;
        }
        let hour = time_hours.floor() as i64;
        if hour != self.last_weather_hour {
            self.last_weather_hour = hour;
            self.weather_factor = 1.0 - self.params.cloud_cover * rng.next_f64();
        }
    }

    /// Advance one tick: generate from solar, serve `requested_kwh` of
    /// consumption, and settle the difference against the battery.
    pub fn tick(
        &mut self,
        time_hours: f64,
        dt_hours: f64,
        requested_kwh: f64,
        rng: &mut SimRng,
    ) -> EnergyTickResult {
        self.update_weather(time_hours, rng);

        let generated = self.solar_output_kw(time_hours) * dt_hours;
        let requested = requested_kwh.max(0.0);
        let net = generated - requested;

        let mut result = EnergyTickResult {
            generated_kwh: generated,
            consumed_kwh: requested,
            losses_kwh: 0.0,
            unserved_kwh: 0.0,
        };

        if net >= 0.0 {
            let charge = net * self.params.charge_efficiency;
            let conversion_loss = net - charge;
            let space = self.params.battery_capacity_kwh - self.battery_kwh;
            let stored = charge.min(space);
            let spilled = charge - stored;
            self.battery_kwh += stored;
            result.losses_kwh = conversion_loss + spilled;
        } else {
            let deficit = -net;
            let drain_needed = deficit / self.params.discharge_efficiency;
            if drain_needed <= self.battery_kwh + ENERGY_EPSILON {
                let drain = drain_needed.min(self.battery_kwh);
                self.battery_kwh -= drain;
                result.losses_kwh = (drain - deficit).max(0.0);
            } else {
                let drain = self.battery_kwh;
                let delivered = drain * self.params.discharge_efficiency;
                let unserved = deficit - delivered;
                self.battery_kwh = 0.0;
                result.consumed_kwh = requested - unserved;
                result.unserved_kwh = unserved;
                result.losses_kwh = drain - delivered;
            }
        }

        self.battery_kwh = self
            .battery_kwh
            .clamp(0.0, self.params.battery_capacity_kwh);
        self.total_generated_kwh += result.generated_kwh;
        self.total_consumed_kwh += result.consumed_kwh;
        self.total_losses_kwh += result.losses_kwh;
        result
    }

    /// Energy above the dispatch reserve, in kWh.
    pub fn battery_above_reserve(&self) -> f64 {
        (self.battery_kwh - self.reserve_kwh()).max(0.0)
    }

    pub fn reserve_kwh(&self) -> f64 {
        self.params.reserve_fraction * self.params.battery_capacity_kwh
    }

    /// Whether a draw of `power_kw` for one tick can be funded from current
    /// solar output plus the battery above reserve.
    pub fn fundable(&self, power_kw: f64, dt_hours: f64, time_hours: f64) -> bool {
        let need = power_kw * dt_hours;
        let solar = self.solar_output_kw(time_hours) * dt_hours;
        need <= solar + self.battery_above_reserve() + ENERGY_EPSILON
    }

    pub fn battery_kwh(&self) -> f64 {
        self.battery_kwh
    }

    pub fn battery_capacity_kwh(&self) -> f64 {
        self.params.battery_capacity_kwh
    }

    pub fn total_generated_kwh(&self) -> f64 {
        self.total_generated_kwh
    }

    pub fn total_consumed_kwh(&self) -> f64 {
        self.total_consumed_kwh
    }

    pub fn total_losses_kwh(&self) -> f64 {
        self.total_losses_kwh
    }

    /// Conservation residual: should stay within epsilon of zero.
    pub fn conservation_residual(&self) -> f64 {
        self.total_generated_kwh - self.total_consumed_kwh - self.total_losses_kwh
            - (self.battery_kwh - self.initial_battery_kwh)
    }

    pub fn params(&self) -> &EnergyParams {
        &self.params
    }
}
