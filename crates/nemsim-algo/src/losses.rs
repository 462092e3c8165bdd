//! Piecewise-linear approximation of interconnector losses.
//!
//! The calibrated loss function of an interconnector is quadratic-plus-linear in flow
//! (see [`LossModel`]). It is sampled at evenly spaced breakpoints over a bounded flow
//! domain and the resulting [`LossCurve`] is encoded into the problem in one of two
//! equivalent ways:
//!
//! ```text
//! tangent:             loss ≥ m_s · (flow − f_s) + l_s          for every segment s
//!                      loss ≤ chord through the two outer breakpoints
//!
//! convex combination:  flow = Σ λ_k f_k,  loss = Σ λ_k l_k,  Σ λ_k = 1,  λ_k ≥ 0
//!                      Σ z_s = 1,  λ_k ≤ z_(k−1) + z_k,  z_s ∈ {0, 1}    (SOS2)
//! ```
//!
//! Curves whose segment slopes decrease anywhere are rejected at construction time.
//! The convex combination is exact on any such curve. The tangent rows only bound the
//! loss from below, so they are exact only while extra losses cost the objective
//! something. With negative-priced offers or forced output the solver may book
//! surplus energy as losses anywhere up to the chord. Callers therefore check solved
//! losses against [`LossCurve::evaluate`].

use std::collections::BTreeMap;

use nemsim_core::{
    CurveConstructionError, FormulationError, InterconnectorId, LossModel, MarketSnapshot,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::problem::{LinearExpr, ProblemBuilder, Sense, VarId};

/// Relative slack allowed when checking that consecutive slopes do not decrease.
const CONVEXITY_TOLERANCE: f64 = 1e-9;

fn default_flow_min() -> f64 {
    -2_000.0
}

fn default_flow_max() -> f64 {
    2_000.0
}

fn default_segments() -> usize {
    40
}

/// Sampling grid of the linearizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearizerConfig {
    #[serde(default = "default_flow_min")]
    pub flow_min_mw: f64,
    #[serde(default = "default_flow_max")]
    pub flow_max_mw: f64,
    #[serde(default = "default_segments")]
    pub segments: usize,
}

impl Default for LinearizerConfig {
    fn default() -> Self {
        Self {
            flow_min_mw: default_flow_min(),
            flow_max_mw: default_flow_max(),
            segments: default_segments(),
        }
    }
}

/// Which constraint encoding represents a loss curve in the problem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LossEncoding {
    /// One inequality per segment; pure LP
    #[default]
    Tangent,
    /// Breakpoint weights with SOS2 binaries; needs a MIP backend
    ConvexCombination,
}

impl LossEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LossEncoding::Tangent => "tangent",
            LossEncoding::ConvexCombination => "convex-combination",
        }
    }

    pub fn needs_integers(&self) -> bool {
        matches!(self, LossEncoding::ConvexCombination)
    }
}

/// A convex piecewise-linear loss curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossCurve {
    breakpoints: Vec<(f64, f64)>,
    slopes: Vec<f64>,
}

impl LossCurve {
    /// Build a curve from `(flow, loss)` points, checking ordering and convexity.
    pub fn from_points(breakpoints: Vec<(f64, f64)>) -> Result<Self, CurveConstructionError> {
        if breakpoints.len() < 2 {
            return Err(CurveConstructionError::TooFewBreakpoints {
                count: breakpoints.len(),
            });
        }
        if let Some(index) = breakpoints
            .iter()
            .position(|(f, l)| !f.is_finite() || !l.is_finite())
        {
            return Err(CurveConstructionError::NonFinite { index });
        }
        for (index, pair) in breakpoints.windows(2).enumerate() {
            if pair[1].0 <= pair[0].0 {
                return Err(CurveConstructionError::NonIncreasingFlow {
                    index: index + 1,
                    previous: pair[0].0,
                    current: pair[1].0,
                });
            }
        }

        let slopes: Vec<f64> = breakpoints
            .windows(2)
            .map(|pair| (pair[1].1 - pair[0].1) / (pair[1].0 - pair[0].0))
            .collect();
        for (segment, pair) in slopes.windows(2).enumerate() {
            let (before, after) = (pair[0], pair[1]);
            let slack = CONVEXITY_TOLERANCE * (1.0 + before.abs().max(after.abs()));
            if after < before - slack {
                return Err(CurveConstructionError::NonConvex {
                    segment: segment + 1,
                    slope_before: before,
                    slope_after: after,
                    breakpoints: breakpoints[segment..segment + 3].to_vec(),
                });
            }
        }

        Ok(Self {
            breakpoints,
            slopes,
        })
    }

    pub fn breakpoints(&self) -> &[(f64, f64)] {
        &self.breakpoints
    }

    pub fn slopes(&self) -> &[f64] {
        &self.slopes
    }

    pub fn segments(&self) -> usize {
        self.slopes.len()
    }

    /// Flow range covered by the breakpoints.
    pub fn domain(&self) -> (f64, f64) {
        let first = self.breakpoints[0].0;
        let last = self.breakpoints[self.breakpoints.len() - 1].0;
        (first, last)
    }

    /// Linear interpolation between breakpoints; end segments are extrapolated.
    pub fn evaluate(&self, flow: f64) -> f64 {
        let segment = self
            .breakpoints
            .windows(2)
            .position(|pair| flow <= pair[1].0)
            .unwrap_or(self.slopes.len() - 1);
        let (f0, l0) = self.breakpoints[segment];
        let (f1, l1) = self.breakpoints[segment + 1];
        l0 + (flow - f0) / (f1 - f0) * (l1 - l0)
    }

    /// Gap between a solved loss and the curve at the solved flow.
    pub fn deviation(&self, flow: f64, loss: f64) -> f64 {
        loss - self.evaluate(flow)
    }

    /// Pointwise maximum of the segment lines, which the tangent encoding enforces.
    pub fn tangent_bound(&self, flow: f64) -> f64 {
        self.slopes
            .iter()
            .zip(&self.breakpoints)
            .map(|(m, (f, l))| m * (flow - f) + l)
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Samples loss models on a fixed flow grid.
#[derive(Debug, Clone)]
pub struct LossLinearizer {
    flows: Vec<f64>,
}

impl LossLinearizer {
    pub fn new(config: LinearizerConfig) -> Result<Self, CurveConstructionError> {
        let LinearizerConfig {
            flow_min_mw: min,
            flow_max_mw: max,
            segments,
        } = config;
        if !(min.is_finite() && max.is_finite() && min < max) || segments == 0 {
            return Err(CurveConstructionError::InvalidDomain { min, max, segments });
        }
        let width = (max - min) / segments as f64;
        let mut flows: Vec<f64> = (0..=segments).map(|i| min + width * i as f64).collect();
        // Zero flow must sit on a breakpoint so that no flow means no losses.
        if min < 0.0 && max > 0.0 && !flows.iter().any(|f| f.abs() < 1e-9) {
            let at = flows.partition_point(|f| *f < 0.0);
            flows.insert(at, 0.0);
        }
        for flow in flows.iter_mut() {
            if flow.abs() < 1e-9 {
                *flow = 0.0;
            }
        }
        Ok(Self { flows })
    }

    pub fn breakpoint_flows(&self) -> &[f64] {
        &self.flows
    }

    /// Sample an arbitrary loss function on the grid.
    pub fn sample(&self, loss: impl Fn(f64) -> f64) -> Result<LossCurve, CurveConstructionError> {
        LossCurve::from_points(self.flows.iter().map(|f| (*f, loss(*f))).collect())
    }

    /// Curve of `model` for a given linear coefficient (see [`LossModel::linear_coefficient`]).
    pub fn build(
        &self,
        model: &LossModel,
        linear_coefficient: f64,
    ) -> Result<LossCurve, CurveConstructionError> {
        self.sample(|flow| model.loss_at(linear_coefficient, flow))
    }
}

/// Failure while building the curves of one snapshot.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CurveSetError {
    #[error(transparent)]
    Formulation(#[from] FormulationError),
    #[error("loss curve for {interconnector}: {source}")]
    Curve {
        interconnector: InterconnectorId,
        #[source]
        source: CurveConstructionError,
    },
}

/// The loss curves of one snapshot, keyed by interconnector. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossCurveSet {
    curves: BTreeMap<InterconnectorId, LossCurve>,
}

impl LossCurveSet {
    pub fn build(
        snapshot: &MarketSnapshot,
        linearizer: &LossLinearizer,
    ) -> Result<Self, CurveSetError> {
        let demands = snapshot.demands();
        let mut curves = BTreeMap::new();
        for ic in &snapshot.interconnectors {
            let coefficient = ic.loss_model.linear_coefficient(&demands)?;
            let curve = linearizer
                .build(&ic.loss_model, coefficient)
                .map_err(|source| CurveSetError::Curve {
                    interconnector: ic.id.clone(),
                    source,
                })?;
            curves.insert(ic.id.clone(), curve);
        }
        Ok(Self { curves })
    }

    pub fn insert(&mut self, id: InterconnectorId, curve: LossCurve) {
        self.curves.insert(id, curve);
    }

    pub fn get(&self, id: &InterconnectorId) -> Option<&LossCurve> {
        self.curves.get(id)
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }
}

/// Tie `loss` to `flow` through `curve` using the chosen encoding.
pub fn constrain(
    builder: &mut ProblemBuilder,
    name: &str,
    flow: VarId,
    loss: VarId,
    curve: &LossCurve,
    encoding: LossEncoding,
) {
    match encoding {
        LossEncoding::Tangent => constrain_tangent(builder, name, flow, loss, curve),
        LossEncoding::ConvexCombination => {
            constrain_convex_combination(builder, name, flow, loss, curve)
        }
    }
}

fn constrain_tangent(
    builder: &mut ProblemBuilder,
    name: &str,
    flow: VarId,
    loss: VarId,
    curve: &LossCurve,
) {
    for (s, (slope, (f, l))) in curve.slopes().iter().zip(curve.breakpoints()).enumerate() {
        builder.add_constraint(
            format!("{name}_tangent_{s}"),
            LinearExpr::new().term(loss, 1.0).term(flow, -slope),
            Sense::Ge,
            l - slope * f,
        );
    }
    let (first, last) = (curve.breakpoints()[0], curve.breakpoints()[curve.segments()]);
    let chord = (last.1 - first.1) / (last.0 - first.0);
    builder.add_constraint(
        format!("{name}_chord"),
        LinearExpr::new().term(loss, 1.0).term(flow, -chord),
        Sense::Le,
        first.1 - chord * first.0,
    );
}

fn constrain_convex_combination(
    builder: &mut ProblemBuilder,
    name: &str,
    flow: VarId,
    loss: VarId,
    curve: &LossCurve,
) {
    let points = curve.breakpoints();
    let weights: Vec<VarId> = (0..points.len())
        .map(|k| builder.add_variable(format!("{name}_lambda_{k}"), 0.0, 1.0))
        .collect();
    let selectors: Vec<VarId> = (0..curve.segments())
        .map(|s| builder.add_binary(format!("{name}_segment_{s}")))
        .collect();

    builder.add_constraint(
        format!("{name}_weights"),
        LinearExpr::sum(weights.iter().copied()),
        Sense::Eq,
        1.0,
    );

    let mut flow_def = LinearExpr::new().term(flow, 1.0);
    let mut loss_def = LinearExpr::new().term(loss, 1.0);
    for (weight, (f, l)) in weights.iter().zip(points) {
        flow_def.add_term(*weight, -f);
        loss_def.add_term(*weight, -l);
    }
    builder.add_constraint(format!("{name}_flow"), flow_def, Sense::Eq, 0.0);
    builder.add_constraint(format!("{name}_loss"), loss_def, Sense::Eq, 0.0);

    builder.add_constraint(
        format!("{name}_one_segment"),
        LinearExpr::sum(selectors.iter().copied()),
        Sense::Eq,
        1.0,
    );
    // λ_k may be positive only when one of its adjacent segments is selected.
    for (k, weight) in weights.iter().enumerate() {
        let mut adjacency = LinearExpr::new().term(*weight, 1.0);
        if k > 0 {
            adjacency.add_term(selectors[k - 1], -1.0);
        }
        if k < selectors.len() {
            adjacency.add_term(selectors[k], -1.0);
        }
        builder.add_constraint(format!("{name}_sos2_{k}"), adjacency, Sense::Le, 0.0);
    }
}
