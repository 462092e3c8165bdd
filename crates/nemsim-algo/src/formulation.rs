//! Assembly of one interval's dispatch problem.
//!
//! # Formulation
//!
//! For every region `r` with offer bands `g_rb`, bid bands `d_rb`, and every
//! interconnector `k` with flow `x_k` and loss `ℓ_k`:
//!
//! ```text
//! minimise   Δh · [ Σ p_rb g_rb − Σ q_rb d_rb + VoLL · δ_r + |floor| · σ_r
//!                   + penalties · slacks + c_deg (charge + discharge) ]
//!            − v_store · soc_end
//!
//! s.t.       Σ g_rb − Σ d_rb + inflow_r + discharge − charge + δ_r − σ_r = D_r
//!            inflow_r = Σ_(k into r) (x_k − (1 − s_k) ℓ_k) − Σ_(k out of r) (x_k + s_k ℓ_k)
//!            ℓ_k on the linearized loss curve of k
//!            base_r − down_r Δt ≤ Σ g_rb ≤ base_r + up_r Δt        (ramp, gated)
//!            Σ g_rb ≥ min(committed_r, offered_r)                   (commitment, gated)
//!            −import_k ≤ x_k ≤ export_k                             (hard or priced)
//!            soc_end = soc + (η_in charge − discharge / η_out) Δh,  0 ≤ soc_end ≤ E
//! ```
//!
//! Deficit `δ` and surplus `σ` slacks exist only where the constraint violation
//! penalty rules allow them; without them an interval whose demand exceeds all supply
//! is infeasible and is reported as such by the backend.

use std::collections::HashMap;

use nemsim_core::{
    BatteryState, CarriedState, FormulationError, InterconnectorId, MarketSnapshot, ProcessKind,
    RegionId, RegionSnapshot, SolveFailure,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::losses::{self, LossCurve, LossCurveSet, LossEncoding};
use crate::policy::{
    applies_every_interval_or_first, applies_every_interval_or_first_p5min, CvpSettings,
};
use crate::problem::{DispatchProblem, LinearExpr, PrimalSolution, ProblemBuilder, Sense, VarId};
use crate::solution::{BatteryResult, IntervalSolution, InterconnectorResult, RegionResult};

/// Dispatch below this is treated as zero when locating the marginal band (MW).
const DISPATCH_EPSILON_MW: f64 = 1e-4;
/// Allowed gap between the solved SOC variable and the recomputed recursion (MWh).
const SOC_CONSISTENCY_MWH: f64 = 1e-3;
/// Allowed gap between a solved loss and its curve, absolute part (MW).
const LOSS_CURVE_TOLERANCE_MW: f64 = 1e-3;
/// Relative part of the loss curve tolerance.
const LOSS_CURVE_TOLERANCE_REL: f64 = 1e-6;

/// Options fixed for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormulationOptions {
    #[serde(default)]
    pub cvp: CvpSettings,
    #[serde(default)]
    pub loss_encoding: LossEncoding,
}

/// Everything one interval's formulation reads.
#[derive(Debug, Clone, Copy)]
pub struct IntervalInputs<'a> {
    pub process: ProcessKind,
    pub interval_index: usize,
    /// Interval length in minutes
    pub minutes: f64,
    pub snapshot: &'a MarketSnapshot,
    pub curves: &'a LossCurveSet,
    pub carried: &'a CarriedState,
}

#[derive(Debug, Clone)]
struct Band {
    var: VarId,
    price: f64,
    quantity: f64,
}

#[derive(Debug, Clone)]
struct RegionVars {
    id: RegionId,
    demand: f64,
    offers: Vec<Band>,
    bids: Vec<Band>,
    deficit: Option<(VarId, f64)>,
    surplus: Option<(VarId, f64)>,
}

#[derive(Debug, Clone)]
struct InterconnectorVars {
    id: InterconnectorId,
    from: usize,
    to: usize,
    loss_share: f64,
    flow: VarId,
    loss: VarId,
    curve: LossCurve,
}

#[derive(Debug, Clone)]
struct BatteryVars {
    region: usize,
    charge: VarId,
    discharge: VarId,
    soc_end: VarId,
}

/// Maps solver values back onto regions, interconnectors and the battery.
#[derive(Debug, Clone)]
pub struct SolutionLayout {
    minutes: f64,
    regions: Vec<RegionVars>,
    interconnectors: Vec<InterconnectorVars>,
    battery: Option<BatteryVars>,
}

/// A formulated interval: the owned problem plus the layout to read its solution.
#[derive(Debug, Clone)]
pub struct FormulatedInterval {
    pub problem: DispatchProblem,
    pub layout: SolutionLayout,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchFormulator {
    options: FormulationOptions,
}

impl DispatchFormulator {
    pub fn new(options: FormulationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FormulationOptions {
        &self.options
    }

    pub fn formulate(&self, inputs: &IntervalInputs<'_>) -> Result<FormulatedInterval, FormulationError> {
        let IntervalInputs {
            process,
            interval_index,
            minutes,
            snapshot,
            curves,
            carried,
        } = *inputs;
        if !(minutes > 0.0) || !minutes.is_finite() {
            return Err(FormulationError::InvalidIntervalLength(minutes));
        }
        snapshot.validate()?;

        let hours = minutes / 60.0;
        let cvp = &self.options.cvp;
        let mut builder = ProblemBuilder::new();
        let index: HashMap<&RegionId, usize> = snapshot
            .regions
            .iter()
            .enumerate()
            .map(|(i, r)| (&r.id, i))
            .collect();

        let mut regions = Vec::with_capacity(snapshot.regions.len());
        let mut balances = Vec::with_capacity(snapshot.regions.len());
        for region in &snapshot.regions {
            let id = &region.id;
            let offers: Vec<Band> = region
                .offers
                .iter()
                .enumerate()
                .map(|(b, offer)| {
                    let var = builder.add_variable(
                        format!("gen_{id}_{b}"),
                        0.0,
                        offer.quantity_mw.max(0.0),
                    );
                    builder.add_objective_term(var, offer.price * hours);
                    Band {
                        var,
                        price: offer.price,
                        quantity: offer.quantity_mw.max(0.0),
                    }
                })
                .collect();
            let bids: Vec<Band> = region
                .bids
                .iter()
                .enumerate()
                .map(|(b, bid)| {
                    let var =
                        builder.add_variable(format!("load_{id}_{b}"), 0.0, bid.quantity_mw.max(0.0));
                    builder.add_objective_term(var, -bid.price * hours);
                    Band {
                        var,
                        price: bid.price,
                        quantity: bid.quantity_mw.max(0.0),
                    }
                })
                .collect();

            let generation = LinearExpr::sum(offers.iter().map(|b| b.var));
            let mut balance = generation.clone();
            for bid in &bids {
                balance.add_term(bid.var, -1.0);
            }

            let deficit = cvp.deficit_cost(process).map(|cost| {
                let var = builder.add_variable(format!("deficit_{id}"), 0.0, f64::INFINITY);
                builder.add_objective_term(var, cost * hours);
                balance.add_term(var, 1.0);
                (var, cvp.value_of_lost_load.unwrap_or(cost))
            });
            let surplus = cvp.surplus_cost(process).map(|cost| {
                let var = builder.add_variable(format!("surplus_{id}"), 0.0, f64::INFINITY);
                builder.add_objective_term(var, cost * hours);
                balance.add_term(var, -1.0);
                (var, cvp.market_price_floor.unwrap_or(-cost))
            });

            if applies_every_interval_or_first_p5min(process, interval_index) {
                self.add_ramp_limits(&mut builder, process, region, carried, &generation, minutes, hours);
            }
            if applies_every_interval_or_first(process, interval_index) && region.committed_min_mw > 0.0 {
                let floor = region.committed_min_mw.min(region.offered_capacity_mw());
                builder.add_constraint(format!("committed_{id}"), generation, Sense::Ge, floor);
            }

            regions.push(RegionVars {
                id: id.clone(),
                demand: region.demand_mw,
                offers,
                bids,
                deficit,
                surplus,
            });
            balances.push(balance);
        }

        let mut interconnectors = Vec::with_capacity(snapshot.interconnectors.len());
        let interconnector_cost = cvp.interconnector_cost(process);
        for ic in &snapshot.interconnectors {
            let curve = curves
                .get(&ic.id)
                .ok_or_else(|| FormulationError::MissingLossCurve(ic.id.clone()))?;
            let (from, to) = match (index.get(&ic.from_region), index.get(&ic.to_region)) {
                (Some(from), Some(to)) => (*from, *to),
                (None, _) => return Err(unknown_region(&ic.id, &ic.from_region)),
                (_, None) => return Err(unknown_region(&ic.id, &ic.to_region)),
            };
            let name = format!("ic_{}", ic.id);
            let (domain_min, domain_max) = curve.domain();
            let flow = match interconnector_cost {
                Some(penalty) => {
                    let flow = builder.add_variable(format!("{name}_flow"), domain_min, domain_max);
                    let over_export = builder.add_variable(format!("{name}_export_slack"), 0.0, f64::INFINITY);
                    let over_import = builder.add_variable(format!("{name}_import_slack"), 0.0, f64::INFINITY);
                    builder.add_objective_term(over_export, penalty * hours);
                    builder.add_objective_term(over_import, penalty * hours);
                    builder.add_constraint(
                        format!("{name}_export_limit"),
                        LinearExpr::new().term(flow, 1.0).term(over_export, -1.0),
                        Sense::Le,
                        ic.export_limit_mw,
                    );
                    builder.add_constraint(
                        format!("{name}_import_limit"),
                        LinearExpr::new().term(flow, 1.0).term(over_import, 1.0),
                        Sense::Ge,
                        -ic.import_limit_mw,
                    );
                    flow
                }
                None => builder.add_variable(
                    format!("{name}_flow"),
                    (-ic.import_limit_mw).max(domain_min),
                    ic.export_limit_mw.min(domain_max),
                ),
            };
            let loss = builder.add_variable(format!("{name}_loss"), f64::NEG_INFINITY, f64::INFINITY);
            losses::constrain(&mut builder, &name, flow, loss, curve, self.options.loss_encoding);

            let share = ic.loss_share.clamp(0.0, 1.0);
            balances[to].add_term(flow, 1.0);
            balances[to].add_term(loss, -(1.0 - share));
            balances[from].add_term(flow, -1.0);
            balances[from].add_term(loss, -share);

            interconnectors.push(InterconnectorVars {
                id: ic.id.clone(),
                from,
                to,
                loss_share: share,
                flow,
                loss,
                curve: curve.clone(),
            });
        }

        let battery = match &carried.battery {
            Some(state) => {
                let region = *index
                    .get(&state.region)
                    .ok_or_else(|| FormulationError::BatteryRegionMissing(state.region.clone()))?;
                let vars = add_battery(&mut builder, state, hours, region);
                balances[region].add_term(vars.discharge, 1.0);
                balances[region].add_term(vars.charge, -1.0);
                Some(vars)
            }
            None => None,
        };

        for (region, balance) in regions.iter().zip(balances) {
            builder.add_constraint(format!("balance_{}", region.id), balance, Sense::Eq, region.demand);
        }

        let problem = builder.build();
        debug!(
            process = %process,
            interval = interval_index,
            variables = problem.num_variables(),
            constraints = problem.num_constraints(),
            "formulated interval"
        );
        Ok(FormulatedInterval {
            problem,
            layout: SolutionLayout {
                minutes,
                regions,
                interconnectors,
                battery,
            },
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn add_ramp_limits(
        &self,
        builder: &mut ProblemBuilder,
        process: ProcessKind,
        region: &RegionSnapshot,
        carried: &CarriedState,
        generation: &LinearExpr,
        minutes: f64,
        hours: f64,
    ) {
        let Some(base) = carried
            .generation(&region.id)
            .or(region.initial_generation_mw)
        else {
            return;
        };
        let id = &region.id;
        let penalty = self.options.cvp.ramp_cost(process);
        let limits = [
            (region.ramp_up_mw_per_min, Sense::Le, "up", 1.0),
            (region.ramp_down_mw_per_min, Sense::Ge, "down", -1.0),
        ];
        for (rate, sense, direction, sign) in limits {
            let Some(rate) = rate else { continue };
            let rhs = base + sign * rate.max(0.0) * minutes;
            let mut expr = generation.clone();
            if let Some(penalty) = penalty {
                let slack = builder.add_variable(format!("ramp_{direction}_slack_{id}"), 0.0, f64::INFINITY);
                builder.add_objective_term(slack, penalty * hours);
                expr.add_term(slack, -sign);
            }
            builder.add_constraint(format!("ramp_{direction}_{id}"), expr, sense, rhs);
        }
    }
}

fn unknown_region(interconnector: &InterconnectorId, region: &RegionId) -> FormulationError {
    FormulationError::UnknownRegion {
        interconnector: interconnector.clone(),
        region: region.clone(),
    }
}

fn add_battery(builder: &mut ProblemBuilder, state: &BatteryState, hours: f64, region: usize) -> BatteryVars {
    let power = state.power_rating_mw;
    let charge = builder.add_variable("battery_charge", 0.0, power);
    let discharge = builder.add_variable("battery_discharge", 0.0, power);
    let soc_end = builder.add_variable("battery_soc_end", 0.0, state.energy_capacity_mwh);
    builder.add_constraint(
        "battery_soc",
        LinearExpr::new()
            .term(soc_end, 1.0)
            .term(charge, -state.charge_efficiency * hours)
            .term(discharge, hours / state.discharge_efficiency),
        Sense::Eq,
        state.soc_mwh,
    );
    builder.add_objective_term(charge, state.degradation_cost * hours);
    builder.add_objective_term(discharge, state.degradation_cost * hours);
    builder.add_objective_term(soc_end, -state.stored_energy_value);
    BatteryVars {
        region,
        charge,
        discharge,
        soc_end,
    }
}

impl SolutionLayout {
    /// Read the solved values and derive the state carried into the next interval.
    ///
    /// Fails when a solved loss is off its curve, or when the solution breaks the
    /// battery's physical bounds by more than solver round-off.
    pub fn extract(
        &self,
        solution: &PrimalSolution,
        snapshot: &MarketSnapshot,
        carried: &CarriedState,
    ) -> Result<(IntervalSolution, CarriedState), SolveFailure> {
        let mut inflow = vec![0.0; self.regions.len()];
        let mut interconnectors = Vec::with_capacity(self.interconnectors.len());
        for ic in &self.interconnectors {
            let flow = solution.value(ic.flow);
            let loss = solution.value(ic.loss);
            let curve_mw = ic.curve.evaluate(flow);
            let tolerance = LOSS_CURVE_TOLERANCE_MW + LOSS_CURVE_TOLERANCE_REL * curve_mw.abs();
            if ic.curve.deviation(flow, loss).abs() > tolerance {
                return Err(SolveFailure::LossesOffCurve {
                    interconnector: ic.id.clone(),
                    flow_mw: flow,
                    loss_mw: loss,
                    curve_mw,
                });
            }
            inflow[ic.to] += flow - (1.0 - ic.loss_share) * loss;
            inflow[ic.from] -= flow + ic.loss_share * loss;
            interconnectors.push(InterconnectorResult {
                id: ic.id.clone(),
                flow_mw: flow,
                losses_mw: loss,
            });
        }

        let mut storage = vec![0.0; self.regions.len()];
        let mut next = CarriedState::new(carried.battery.clone());
        let battery = match (&self.battery, &carried.battery) {
            (Some(vars), Some(state)) => {
                let charge = solution.value(vars.charge);
                let discharge = solution.value(vars.discharge);
                let advanced = state
                    .advance(charge, discharge, self.minutes)
                    .map_err(|e| SolveFailure::Numeric(format!("battery state after solve: {e}")))?;
                let modeled_soc = solution.value(vars.soc_end);
                if (modeled_soc - advanced.soc_mwh).abs() > SOC_CONSISTENCY_MWH {
                    return Err(SolveFailure::Numeric(format!(
                        "modeled state of charge {modeled_soc} MWh disagrees with recursion {} MWh",
                        advanced.soc_mwh
                    )));
                }
                storage[vars.region] = discharge - charge;
                let result = BatteryResult {
                    region: state.region.clone(),
                    charge_mw: charge,
                    discharge_mw: discharge,
                    soc_mwh: advanced.soc_mwh,
                };
                next.battery = Some(advanced);
                Some(result)
            }
            _ => None,
        };

        let regions = self
            .regions
            .iter()
            .enumerate()
            .map(|(i, region)| {
                let generation: f64 = region.offers.iter().map(|b| solution.value(b.var)).sum();
                let load: f64 = region.bids.iter().map(|b| solution.value(b.var)).sum();
                let deficit = region.deficit.map_or(0.0, |(v, _)| solution.value(v));
                let surplus = region.surplus.map_or(0.0, |(v, _)| solution.value(v));
                next.generation_mw.insert(region.id.clone(), generation);
                RegionResult {
                    id: region.id.clone(),
                    demand_mw: region.demand,
                    generation_mw: generation,
                    load_mw: load,
                    net_interchange_mw: -inflow[i],
                    storage_mw: storage[i],
                    deficit_mw: deficit,
                    surplus_mw: surplus,
                    price: region_price(region, solution, deficit, surplus),
                }
            })
            .collect();

        Ok((
            IntervalSolution {
                timestamp: snapshot.timestamp,
                objective: solution.objective(),
                regions,
                interconnectors,
                battery,
            },
            next,
        ))
    }
}

/// Primal estimate of the regional price: the most expensive band that is partially
/// dispatched, else the most expensive dispatched band.
fn region_price(region: &RegionVars, solution: &PrimalSolution, deficit: f64, surplus: f64) -> f64 {
    if let (true, Some((_, price))) = (deficit > DISPATCH_EPSILON_MW, region.deficit) {
        return price;
    }
    if let (true, Some((_, price))) = (surplus > DISPATCH_EPSILON_MW, region.surplus) {
        return price;
    }
    let dispatched: Vec<(&Band, f64)> = region
        .offers
        .iter()
        .map(|band| (band, solution.value(band.var)))
        .filter(|(_, value)| *value > DISPATCH_EPSILON_MW)
        .collect();
    let partial = dispatched
        .iter()
        .filter(|(band, value)| *value < band.quantity - DISPATCH_EPSILON_MW)
        .map(|(band, _)| band.price)
        .fold(f64::NEG_INFINITY, f64::max);
    if partial.is_finite() {
        return partial;
    }
    let highest = dispatched
        .iter()
        .map(|(band, _)| band.price)
        .fold(f64::NEG_INFINITY, f64::max);
    if highest.is_finite() {
        return highest;
    }
    let cheapest = region
        .offers
        .iter()
        .map(|band| band.price)
        .fold(f64::INFINITY, f64::min);
    if cheapest.is_finite() {
        cheapest
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::losses::{LinearizerConfig, LossLinearizer};
    use nemsim_core::{InterconnectorSnapshot, LossModel, Offer};

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot::new(
            "2024-01-01T04:05:00".parse().unwrap(),
            vec![
                RegionSnapshot::new("VIC1", 500.0)
                    .with_offer(Offer::new(20.0, 400.0))
                    .with_offer(Offer::new(60.0, 400.0))
                    .with_ramp(450.0, 10.0, 10.0)
                    .with_committed_min(100.0),
                RegionSnapshot::new("SA1", 200.0).with_offer(Offer::new(90.0, 300.0)),
            ],
            vec![InterconnectorSnapshot::new(
                "V-SA",
                "VIC1",
                "SA1",
                100.0,
                150.0,
                LossModel::new(0.0, 1e-4),
            )],
        )
    }

    fn formulate(
        options: FormulationOptions,
        process: ProcessKind,
        interval_index: usize,
    ) -> FormulatedInterval {
        let snapshot = snapshot();
        let linearizer = LossLinearizer::new(LinearizerConfig::default()).unwrap();
        let curves = LossCurveSet::build(&snapshot, &linearizer).unwrap();
        let carried = CarriedState::default();
        DispatchFormulator::new(options)
            .formulate(&IntervalInputs {
                process,
                interval_index,
                minutes: 5.0,
                snapshot: &snapshot,
                curves: &curves,
                carried: &carried,
            })
            .unwrap()
    }

    #[test]
    fn dispatch_includes_ramp_and_commitment() {
        let f = formulate(FormulationOptions::default(), ProcessKind::Dispatch, 0);
        let up = f.problem.constraint("ramp_up_VIC1").unwrap();
        assert_eq!(up.rhs, 500.0);
        assert_eq!(f.problem.constraint("ramp_down_VIC1").unwrap().rhs, 400.0);
        assert_eq!(f.problem.constraint("committed_VIC1").unwrap().rhs, 100.0);
        assert!(f.problem.constraint("balance_SA1").is_some());
    }

    #[test]
    fn forward_intervals_drop_lead_only_families() {
        let p5_lead = formulate(FormulationOptions::default(), ProcessKind::P5Min, 0);
        assert!(p5_lead.problem.constraint("ramp_up_VIC1").is_some());
        let p5_later = formulate(FormulationOptions::default(), ProcessKind::P5Min, 3);
        assert!(p5_later.problem.constraint("ramp_up_VIC1").is_none());
        assert!(p5_later.problem.constraint("committed_VIC1").is_none());

        let pd_lead = formulate(FormulationOptions::default(), ProcessKind::Predispatch, 0);
        assert!(pd_lead.problem.constraint("ramp_up_VIC1").is_none());
        assert!(pd_lead.problem.constraint("committed_VIC1").is_some());
    }

    #[test]
    fn cvp_slacks_follow_settings() {
        let soft = formulate(FormulationOptions::default(), ProcessKind::Dispatch, 0);
        assert!(soft.problem.variables().iter().any(|v| v.name == "deficit_SA1"));

        let hard = formulate(
            FormulationOptions {
                cvp: CvpSettings::disabled(),
                ..FormulationOptions::default()
            },
            ProcessKind::Dispatch,
            0,
        );
        assert!(!hard.problem.variables().iter().any(|v| v.name.starts_with("deficit")));
        assert!(!hard.problem.variables().iter().any(|v| v.name.starts_with("surplus")));
    }

    #[test]
    fn hard_interconnector_limits_bound_the_flow_variable() {
        let f = formulate(FormulationOptions::default(), ProcessKind::Dispatch, 0);
        let flow = f
            .problem
            .variables()
            .iter()
            .find(|v| v.name == "ic_V-SA_flow")
            .unwrap();
        assert_eq!((flow.lower, flow.upper), (-100.0, 150.0));
        assert!(f.problem.constraint("ic_V-SA_tangent_0").is_some());
    }

    #[test]
    fn soft_interconnector_limits_add_priced_slack() {
        let mut options = FormulationOptions::default();
        options.cvp.interconnector_penalty = Some(5_000.0);
        let f = formulate(options, ProcessKind::Dispatch, 0);
        let flow = f
            .problem
            .variables()
            .iter()
            .find(|v| v.name == "ic_V-SA_flow")
            .unwrap();
        assert_eq!((flow.lower, flow.upper), (-2_000.0, 2_000.0));
        assert!(f.problem.constraint("ic_V-SA_export_limit").is_some());
    }

    #[test]
    fn missing_curve_is_a_formulation_error() {
        let snapshot = snapshot();
        let carried = CarriedState::default();
        let err = DispatchFormulator::default()
            .formulate(&IntervalInputs {
                process: ProcessKind::Dispatch,
                interval_index: 0,
                minutes: 5.0,
                snapshot: &snapshot,
                curves: &LossCurveSet::default(),
                carried: &carried,
            })
            .unwrap_err();
        assert!(matches!(err, FormulationError::MissingLossCurve(_)));
    }

    #[test]
    fn battery_in_unknown_region_is_rejected() {
        let snapshot = snapshot();
        let linearizer = LossLinearizer::new(LinearizerConfig::default()).unwrap();
        let curves = LossCurveSet::build(&snapshot, &linearizer).unwrap();
        let carried = CarriedState::new(Some(BatteryState::new("QLD1", 10.0, 5.0, 0.9).unwrap()));
        let err = DispatchFormulator::default()
            .formulate(&IntervalInputs {
                process: ProcessKind::Dispatch,
                interval_index: 0,
                minutes: 5.0,
                snapshot: &snapshot,
                curves: &curves,
                carried: &carried,
            })
            .unwrap_err();
        assert_eq!(err, FormulationError::BatteryRegionMissing(RegionId::new("QLD1")));
    }
}
