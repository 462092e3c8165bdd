//! Values extracted from a solved interval.

use chrono::NaiveDateTime;
use nemsim_core::{InterconnectorId, RegionId};
use serde::Serialize;

/// Modeled outcome of one region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionResult {
    pub id: RegionId,
    pub demand_mw: f64,
    pub generation_mw: f64,
    pub load_mw: f64,
    /// Net export over adjacent interconnectors, including the region's loss share
    pub net_interchange_mw: f64,
    /// Battery discharge minus charge
    pub storage_mw: f64,
    pub deficit_mw: f64,
    pub surplus_mw: f64,
    /// Offer price of the marginal band, or the penalty price when a slack is used
    pub price: f64,
}

impl RegionResult {
    /// Residual of the region balance; zero up to solver tolerance.
    pub fn balance_residual(&self) -> f64 {
        self.generation_mw - self.load_mw - self.net_interchange_mw + self.storage_mw
            + self.deficit_mw
            - self.surplus_mw
            - self.demand_mw
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterconnectorResult {
    pub id: InterconnectorId,
    pub flow_mw: f64,
    pub losses_mw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatteryResult {
    pub region: RegionId,
    pub charge_mw: f64,
    pub discharge_mw: f64,
    /// State of charge at the end of the interval
    pub soc_mwh: f64,
}

/// Everything the cascade keeps from one solved interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalSolution {
    pub timestamp: NaiveDateTime,
    pub objective: f64,
    pub regions: Vec<RegionResult>,
    pub interconnectors: Vec<InterconnectorResult>,
    pub battery: Option<BatteryResult>,
}

impl IntervalSolution {
    pub fn total_generation_mw(&self) -> f64 {
        self.regions.iter().map(|r| r.generation_mw).sum()
    }

    pub fn region(&self, id: &RegionId) -> Option<&RegionResult> {
        self.regions.iter().find(|r| &r.id == id)
    }

    pub fn interconnector(&self, id: &InterconnectorId) -> Option<&InterconnectorResult> {
        self.interconnectors.iter().find(|ic| &ic.id == id)
    }

    /// The same outcome re-stamped for a later interval (hold-last-state).
    pub fn held_at(&self, timestamp: NaiveDateTime) -> Self {
        let mut held = self.clone();
        held.timestamp = timestamp;
        held
    }
}
