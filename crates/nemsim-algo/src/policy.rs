//! Rules deciding which constraint families apply to an interval.
//!
//! All three predicates are pure functions of the process kind and interval index (or
//! of the penalty configuration), so the formulator's choice of hard bounds, priced
//! slacks and lead-interval-only constraints is reproducible from the inputs alone.

use nemsim_core::ProcessKind;
use serde::{Deserialize, Serialize};

/// True for every dispatch interval and for the lead interval of a forecast run.
///
/// Used for constraints fixed from history, such as committed minimum output.
pub fn applies_every_interval_or_first(process: ProcessKind, interval_index: usize) -> bool {
    match process {
        ProcessKind::Dispatch => true,
        ProcessKind::P5Min | ProcessKind::Predispatch => interval_index == 0,
    }
}

/// Like [`applies_every_interval_or_first`] but never true for predispatch.
pub fn applies_every_interval_or_first_p5min(process: ProcessKind, interval_index: usize) -> bool {
    match process {
        ProcessKind::Dispatch => true,
        ProcessKind::P5Min => interval_index == 0,
        ProcessKind::Predispatch => false,
    }
}

/// Whether a constraint with the given penalty is relaxed with a priced slack.
pub fn cvp_applicable(
    process: ProcessKind,
    dispatch_enabled: bool,
    predispatch_enabled: bool,
    penalty: Option<f64>,
) -> bool {
    if penalty.is_none() {
        return false;
    }
    match process {
        ProcessKind::Dispatch => dispatch_enabled,
        ProcessKind::P5Min | ProcessKind::Predispatch => predispatch_enabled,
    }
}

fn default_true() -> bool {
    true
}

fn default_value_of_lost_load() -> Option<f64> {
    Some(16_600.0)
}

fn default_market_price_floor() -> Option<f64> {
    Some(-1_000.0)
}

/// Constraint violation penalty configuration, loaded once per process invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvpSettings {
    #[serde(default = "default_true")]
    pub dispatch_enabled: bool,
    #[serde(default = "default_true")]
    pub predispatch_enabled: bool,
    /// Price of unserved energy ($/MWh); prices the region deficit slack
    #[serde(default = "default_value_of_lost_load")]
    pub value_of_lost_load: Option<f64>,
    /// Market floor price ($/MWh); its magnitude prices the region surplus slack
    #[serde(default = "default_market_price_floor")]
    pub market_price_floor: Option<f64>,
    #[serde(default)]
    pub ramp_penalty: Option<f64>,
    #[serde(default)]
    pub interconnector_penalty: Option<f64>,
}

impl Default for CvpSettings {
    fn default() -> Self {
        Self {
            dispatch_enabled: true,
            predispatch_enabled: true,
            value_of_lost_load: default_value_of_lost_load(),
            market_price_floor: default_market_price_floor(),
            ramp_penalty: None,
            interconnector_penalty: None,
        }
    }
}

impl CvpSettings {
    /// Settings with every soft constraint hard.
    pub fn disabled() -> Self {
        Self {
            dispatch_enabled: false,
            predispatch_enabled: false,
            ..Self::default()
        }
    }

    /// The penalty to apply for `process`, or `None` when the constraint stays hard.
    pub fn penalty(&self, process: ProcessKind, penalty: Option<f64>) -> Option<f64> {
        if cvp_applicable(
            process,
            self.dispatch_enabled,
            self.predispatch_enabled,
            penalty,
        ) {
            penalty
        } else {
            None
        }
    }

    pub fn deficit_cost(&self, process: ProcessKind) -> Option<f64> {
        self.penalty(process, self.value_of_lost_load)
    }

    pub fn surplus_cost(&self, process: ProcessKind) -> Option<f64> {
        self.penalty(process, self.market_price_floor)
            .map(|floor| floor.abs())
    }

    pub fn ramp_cost(&self, process: ProcessKind) -> Option<f64> {
        self.penalty(process, self.ramp_penalty)
    }

    pub fn interconnector_cost(&self, process: ProcessKind) -> Option<f64> {
        self.penalty(process, self.interconnector_penalty)
    }
}
