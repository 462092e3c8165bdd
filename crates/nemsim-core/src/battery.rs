//! Battery storage state and the state threaded between intervals.
//!
//! State of charge is a chain: the SOC at the end of interval `t` is a deterministic
//! function of the SOC at its start and the charge/discharge decision taken in it.
//!
//! ```text
//! soc[t+1] = soc[t] + (η_in · charge − discharge / η_out) · Δt_hours
//! 0 ≤ soc[t+1] ≤ capacity
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RegionId;

/// Numerical slack tolerated on SOC bounds before a state is rejected (MWh).
pub const SOC_TOLERANCE_MWH: f64 = 1e-6;

/// Battery configuration or transition errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BatteryError {
    #[error("energy capacity must be positive, got {0} MWh")]
    InvalidCapacity(f64),
    #[error("power rating must be non-negative, got {0} MW")]
    InvalidPower(f64),
    #[error("efficiency must lie in (0, 1], got {0}")]
    InvalidEfficiency(f64),
    #[error("state of charge {soc} MWh outside [0, {capacity}] MWh")]
    SocOutOfBounds { soc: f64, capacity: f64 },
    #[error("{direction} power {power} MW exceeds rating {rating} MW")]
    PowerExceeded {
        direction: &'static str,
        power: f64,
        rating: f64,
    },
}

/// A grid-scale battery participating in dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    /// Region the battery is connected in
    pub region: RegionId,
    /// Usable energy capacity (MWh)
    pub energy_capacity_mwh: f64,
    /// Charge and discharge power rating (MW)
    pub power_rating_mw: f64,
    /// Current state of charge (MWh)
    pub soc_mwh: f64,
    /// Fraction of charging energy that reaches storage
    pub charge_efficiency: f64,
    /// Fraction of stored energy that reaches the grid
    pub discharge_efficiency: f64,
    /// Wear cost per MWh of throughput ($/MWh)
    #[serde(default)]
    pub degradation_cost: f64,
    /// Value assigned to energy held at the end of an interval ($/MWh)
    #[serde(default)]
    pub stored_energy_value: f64,
}

impl BatteryState {
    /// Create an empty battery, splitting the round-trip efficiency evenly between
    /// charging and discharging.
    pub fn new(
        region: impl Into<String>,
        energy_capacity_mwh: f64,
        power_rating_mw: f64,
        round_trip_efficiency: f64,
    ) -> Result<Self, BatteryError> {
        let one_way = round_trip_efficiency.sqrt();
        let battery = Self {
            region: RegionId::new(region),
            energy_capacity_mwh,
            power_rating_mw,
            soc_mwh: 0.0,
            charge_efficiency: one_way,
            discharge_efficiency: one_way,
            degradation_cost: 0.0,
            stored_energy_value: 0.0,
        };
        battery.validate()?;
        Ok(battery)
    }

    pub fn with_soc(mut self, soc_mwh: f64) -> Result<Self, BatteryError> {
        self.soc_mwh = soc_mwh;
        self.validate()?;
        Ok(self)
    }

    pub fn with_efficiencies(
        mut self,
        charge_efficiency: f64,
        discharge_efficiency: f64,
    ) -> Result<Self, BatteryError> {
        self.charge_efficiency = charge_efficiency;
        self.discharge_efficiency = discharge_efficiency;
        self.validate()?;
        Ok(self)
    }

    pub fn with_costs(mut self, degradation_cost: f64, stored_energy_value: f64) -> Self {
        self.degradation_cost = degradation_cost;
        self.stored_energy_value = stored_energy_value;
        self
    }

    pub fn round_trip_efficiency(&self) -> f64 {
        self.charge_efficiency * self.discharge_efficiency
    }

    /// Check capacity, rating, efficiencies and SOC bounds.
    pub fn validate(&self) -> Result<(), BatteryError> {
        if !(self.energy_capacity_mwh > 0.0) || !self.energy_capacity_mwh.is_finite() {
            return Err(BatteryError::InvalidCapacity(self.energy_capacity_mwh));
        }
        if !(self.power_rating_mw >= 0.0) || !self.power_rating_mw.is_finite() {
            return Err(BatteryError::InvalidPower(self.power_rating_mw));
        }
        for eta in [self.charge_efficiency, self.discharge_efficiency] {
            if !(eta > 0.0 && eta <= 1.0) {
                return Err(BatteryError::InvalidEfficiency(eta));
            }
        }
        if !(self.soc_mwh >= 0.0 && self.soc_mwh <= self.energy_capacity_mwh) {
            return Err(BatteryError::SocOutOfBounds {
                soc: self.soc_mwh,
                capacity: self.energy_capacity_mwh,
            });
        }
        Ok(())
    }

    /// SOC after charging/discharging for `minutes`, without bound checks.
    pub fn next_soc(&self, charge_mw: f64, discharge_mw: f64, minutes: f64) -> f64 {
        let hours = minutes / 60.0;
        self.soc_mwh
            + (self.charge_efficiency * charge_mw - discharge_mw / self.discharge_efficiency) * hours
    }

    /// Apply one interval's decision and return the successor state.
    ///
    /// Solver round-off within [`SOC_TOLERANCE_MWH`] of a bound is clamped; anything
    /// further out is rejected.
    pub fn advance(
        &self,
        charge_mw: f64,
        discharge_mw: f64,
        minutes: f64,
    ) -> Result<Self, BatteryError> {
        let rating = self.power_rating_mw + SOC_TOLERANCE_MWH;
        if charge_mw > rating {
            return Err(BatteryError::PowerExceeded {
                direction: "charge",
                power: charge_mw,
                rating: self.power_rating_mw,
            });
        }
        if discharge_mw > rating {
            return Err(BatteryError::PowerExceeded {
                direction: "discharge",
                power: discharge_mw,
                rating: self.power_rating_mw,
            });
        }
        let soc = self.next_soc(charge_mw.max(0.0), discharge_mw.max(0.0), minutes);
        if soc < -SOC_TOLERANCE_MWH || soc > self.energy_capacity_mwh + SOC_TOLERANCE_MWH {
            return Err(BatteryError::SocOutOfBounds {
                soc,
                capacity: self.energy_capacity_mwh,
            });
        }
        let mut next = self.clone();
        next.soc_mwh = soc.clamp(0.0, self.energy_capacity_mwh);
        Ok(next)
    }
}

/// State handed from one solved interval to the next, and from one cascade to the
/// next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CarriedState {
    pub battery: Option<BatteryState>,
    /// Regional generation of the last extracted interval (ramp baseline)
    #[serde(default)]
    pub generation_mw: BTreeMap<RegionId, f64>,
}

impl CarriedState {
    pub fn new(battery: Option<BatteryState>) -> Self {
        Self {
            battery,
            generation_mw: BTreeMap::new(),
        }
    }

    pub fn generation(&self, region: &RegionId) -> Option<f64> {
        self.generation_mw.get(region).copied()
    }

    /// The part of the state that crosses into another process run.
    ///
    /// Regional generation is a ramp baseline for the directly following interval
    /// only. The terminal interval of a finished run is not adjacent to the first
    /// interval of the next one, so that run ramps from its own snapshots.
    pub fn handed_over(&self) -> Self {
        Self::new(self.battery.clone())
    }
}
