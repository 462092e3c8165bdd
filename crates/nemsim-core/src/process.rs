use std::fmt;

use serde::{Deserialize, Serialize};

/// Market process being reconstructed.
///
/// The three processes share one formulation; they differ in interval length,
/// horizon and which constraint families apply to forward intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    /// Real-time 5-minute dispatch (single interval)
    Dispatch,
    /// 5-minute-ahead pre-dispatch (12 intervals)
    P5Min,
    /// 30-minute pre-dispatch to the end of the trading day
    Predispatch,
}

impl ProcessKind {
    pub const ALL: [ProcessKind; 3] = [
        ProcessKind::Dispatch,
        ProcessKind::P5Min,
        ProcessKind::Predispatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Dispatch => "dispatch",
            ProcessKind::P5Min => "p5min",
            ProcessKind::Predispatch => "predispatch",
        }
    }

    /// Nominal interval length in minutes.
    pub fn step_minutes(&self) -> i64 {
        match self {
            ProcessKind::Dispatch | ProcessKind::P5Min => 5,
            ProcessKind::Predispatch => 30,
        }
    }

    /// True for the forward-looking processes (P5MIN and PREDISPATCH).
    pub fn is_forecast(&self) -> bool {
        !matches!(self, ProcessKind::Dispatch)
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dispatch" => Ok(ProcessKind::Dispatch),
            "p5min" | "p5" => Ok(ProcessKind::P5Min),
            "predispatch" | "pd" => Ok(ProcessKind::Predispatch),
            _ => Err(format!(
                "Unknown process kind: {} (expected dispatch, p5min or predispatch)",
                s
            )),
        }
    }
}
