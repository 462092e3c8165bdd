//! Market snapshots as observed by the market operator.
//!
//! A [`MarketSnapshot`] bundles everything one interval needs: regional demand and
//! offers, interconnector limits and loss models, plus the recorded outcome the
//! reconstruction is compared against.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::FormulationError;
use crate::{InterconnectorId, RegionId};

/// A single price band of an offer (generation) or bid (dispatchable load).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Band price ($/MWh)
    pub price: f64,
    /// Band quantity (MW)
    pub quantity_mw: f64,
}

impl Offer {
    pub fn new(price: f64, quantity_mw: f64) -> Self {
        Self { price, quantity_mw }
    }
}

/// Regional state for one interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSnapshot {
    pub id: RegionId,
    /// Total demand to be met in the region (MW)
    pub demand_mw: f64,
    /// Aggregated generation offer stack
    #[serde(default)]
    pub offers: Vec<Offer>,
    /// Aggregated dispatchable-load bid stack
    #[serde(default)]
    pub bids: Vec<Offer>,
    /// Output at the start of the interval, used as the ramp baseline (MW)
    #[serde(default)]
    pub initial_generation_mw: Option<f64>,
    /// Aggregate ramp-up capability (MW/min)
    #[serde(default)]
    pub ramp_up_mw_per_min: Option<f64>,
    /// Aggregate ramp-down capability (MW/min)
    #[serde(default)]
    pub ramp_down_mw_per_min: Option<f64>,
    /// Minimum output committed from history (MW)
    #[serde(default)]
    pub committed_min_mw: f64,
    #[serde(default)]
    pub recorded_price: f64,
    #[serde(default)]
    pub recorded_generation_mw: f64,
    #[serde(default)]
    pub recorded_load_mw: f64,
    #[serde(default)]
    pub recorded_net_interchange_mw: f64,
}

impl RegionSnapshot {
    pub fn new(id: impl Into<String>, demand_mw: f64) -> Self {
        Self {
            id: RegionId::new(id),
            demand_mw,
            offers: Vec::new(),
            bids: Vec::new(),
            initial_generation_mw: None,
            ramp_up_mw_per_min: None,
            ramp_down_mw_per_min: None,
            committed_min_mw: 0.0,
            recorded_price: 0.0,
            recorded_generation_mw: 0.0,
            recorded_load_mw: 0.0,
            recorded_net_interchange_mw: 0.0,
        }
    }

    pub fn with_offer(mut self, offer: Offer) -> Self {
        self.offers.push(offer);
        self
    }

    pub fn with_bid(mut self, bid: Offer) -> Self {
        self.bids.push(bid);
        self
    }

    /// Set the ramp baseline and symmetric-or-not ramp rates (MW/min).
    pub fn with_ramp(mut self, initial_mw: f64, up_mw_per_min: f64, down_mw_per_min: f64) -> Self {
        self.initial_generation_mw = Some(initial_mw);
        self.ramp_up_mw_per_min = Some(up_mw_per_min);
        self.ramp_down_mw_per_min = Some(down_mw_per_min);
        self
    }

    pub fn with_committed_min(mut self, committed_min_mw: f64) -> Self {
        self.committed_min_mw = committed_min_mw;
        self
    }

    pub fn with_recorded(
        mut self,
        price: f64,
        generation_mw: f64,
        load_mw: f64,
        net_interchange_mw: f64,
    ) -> Self {
        self.recorded_price = price;
        self.recorded_generation_mw = generation_mw;
        self.recorded_load_mw = load_mw;
        self.recorded_net_interchange_mw = net_interchange_mw;
        self
    }

    /// Sum of all offered generation (MW).
    pub fn offered_capacity_mw(&self) -> f64 {
        self.offers.iter().map(|o| o.quantity_mw.max(0.0)).sum()
    }

    /// Sum of all bid dispatchable load (MW).
    pub fn bid_capacity_mw(&self) -> f64 {
        self.bids.iter().map(|b| b.quantity_mw.max(0.0)).sum()
    }
}

/// Calibrated interconnector loss model.
///
/// The marginal loss factor is linear in flow and in regional demand, so losses are
/// quadratic-plus-linear in flow:
///
/// ```text
/// loss(f) = (constant + Σ_r c_r · D_r) · f + quadratic · f²
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossModel {
    /// Demand-independent linear coefficient
    pub constant: f64,
    /// Quadratic coefficient (MW⁻¹); must be non-negative for a convex curve
    pub quadratic: f64,
    /// Per-region demand coefficients (MW⁻¹)
    #[serde(default)]
    pub demand_coefficients: BTreeMap<RegionId, f64>,
}

impl LossModel {
    pub fn new(constant: f64, quadratic: f64) -> Self {
        Self {
            constant,
            quadratic,
            demand_coefficients: BTreeMap::new(),
        }
    }

    pub fn with_demand_coefficient(mut self, region: impl Into<String>, coefficient: f64) -> Self {
        self.demand_coefficients
            .insert(RegionId::new(region), coefficient);
        self
    }

    /// Linear loss coefficient for the given regional demands.
    pub fn linear_coefficient(&self, demands: &RegionDemands) -> Result<f64, FormulationError> {
        let mut coefficient = self.constant;
        for (region, c) in &self.demand_coefficients {
            let demand = demands
                .get(region)
                .ok_or_else(|| FormulationError::MissingRegionDemand(region.clone()))?;
            coefficient += c * demand;
        }
        Ok(coefficient)
    }

    /// Evaluate the true (nonlinear) loss at `flow_mw` given a linear coefficient.
    #[inline]
    pub fn loss_at(&self, linear_coefficient: f64, flow_mw: f64) -> f64 {
        linear_coefficient * flow_mw + self.quadratic * flow_mw * flow_mw
    }
}

/// Interconnector state for one interval.
///
/// Positive flow runs from `from_region` to `to_region`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterconnectorSnapshot {
    pub id: InterconnectorId,
    pub from_region: RegionId,
    pub to_region: RegionId,
    /// Limit on flow in the negative direction (MW, positive number)
    pub import_limit_mw: f64,
    /// Limit on flow in the positive direction (MW)
    pub export_limit_mw: f64,
    pub loss_model: LossModel,
    /// Fraction of losses allocated to the from-region
    #[serde(default = "default_loss_share")]
    pub loss_share: f64,
    #[serde(default)]
    pub recorded_flow_mw: f64,
    #[serde(default)]
    pub recorded_losses_mw: f64,
}

fn default_loss_share() -> f64 {
    0.5
}

impl InterconnectorSnapshot {
    pub fn new(
        id: impl Into<String>,
        from_region: impl Into<String>,
        to_region: impl Into<String>,
        import_limit_mw: f64,
        export_limit_mw: f64,
        loss_model: LossModel,
    ) -> Self {
        Self {
            id: InterconnectorId::new(id),
            from_region: RegionId::new(from_region),
            to_region: RegionId::new(to_region),
            import_limit_mw,
            export_limit_mw,
            loss_model,
            loss_share: default_loss_share(),
            recorded_flow_mw: 0.0,
            recorded_losses_mw: 0.0,
        }
    }

    pub fn with_loss_share(mut self, loss_share: f64) -> Self {
        self.loss_share = loss_share;
        self
    }

    pub fn with_recorded(mut self, flow_mw: f64, losses_mw: f64) -> Self {
        self.recorded_flow_mw = flow_mw;
        self.recorded_losses_mw = losses_mw;
        self
    }
}

/// Total demand by region, the input to loss curve calibration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionDemands(BTreeMap<RegionId, f64>);

impl RegionDemands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region: RegionId, demand_mw: f64) {
        self.0.insert(region, demand_mw);
    }

    pub fn get(&self, region: &RegionId) -> Option<f64> {
        self.0.get(region).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RegionId, &f64)> {
        self.0.iter()
    }
}

impl FromIterator<(RegionId, f64)> for RegionDemands {
    fn from_iter<T: IntoIterator<Item = (RegionId, f64)>>(iter: T) -> Self {
        RegionDemands(iter.into_iter().collect())
    }
}

/// Everything recorded by the market operator for one interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub timestamp: NaiveDateTime,
    pub regions: Vec<RegionSnapshot>,
    #[serde(default)]
    pub interconnectors: Vec<InterconnectorSnapshot>,
    #[serde(default)]
    pub recorded_objective: f64,
}

impl MarketSnapshot {
    pub fn new(
        timestamp: NaiveDateTime,
        regions: Vec<RegionSnapshot>,
        interconnectors: Vec<InterconnectorSnapshot>,
    ) -> Self {
        Self {
            timestamp,
            regions,
            interconnectors,
            recorded_objective: 0.0,
        }
    }

    pub fn with_recorded_objective(mut self, objective: f64) -> Self {
        self.recorded_objective = objective;
        self
    }

    pub fn region(&self, id: &RegionId) -> Option<&RegionSnapshot> {
        self.regions.iter().find(|r| &r.id == id)
    }

    pub fn demands(&self) -> RegionDemands {
        self.regions
            .iter()
            .map(|r| (r.id.clone(), r.demand_mw))
            .collect()
    }

    /// Re-stamp a snapshot for another interval, keeping its content.
    pub fn at(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Check that every region referenced by an interconnector exists and that no
    /// region appears twice.
    pub fn validate(&self) -> Result<(), FormulationError> {
        for (i, region) in self.regions.iter().enumerate() {
            if self.regions[..i].iter().any(|r| r.id == region.id) {
                return Err(FormulationError::DuplicateRegion(region.id.clone()));
            }
        }
        for ic in &self.interconnectors {
            for endpoint in [&ic.from_region, &ic.to_region] {
                if self.region(endpoint).is_none() {
                    return Err(FormulationError::UnknownRegion {
                        interconnector: ic.id.clone(),
                        region: endpoint.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
