//! TOML run configuration.
//!
//! ```toml
//! [cvp]
//! dispatch_enabled = true
//! predispatch_enabled = true
//! value_of_lost_load = 16600.0
//! market_price_floor = -1000.0
//!
//! [solver]
//! backend = "clarabel"
//! timeout_seconds = 30.0
//! loss_encoding = "tangent"
//!
//! [linearizer]
//! flow_min_mw = -2000.0
//! flow_max_mw = 2000.0
//! segments = 40
//!
//! [run]
//! failure_policy = "abort"        # required, "abort" or "hold-last-state"
//! comparison_tolerance = 0.001
//!
//! [battery]
//! region = "SA1"
//! energy_capacity_mwh = 129.0
//! power_rating_mw = 100.0
//! round_trip_efficiency = 0.85
//! ```
//!
//! Every value except `failure_policy` has a default. The configuration is loaded
//! once per process and is read-only afterwards.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use nemsim_algo::{
    CascadeConfig, CvpSettings, FailurePolicy, FormulationOptions, LinearizerConfig,
    LossEncoding, LpSolverKind, ResultComparator, DEFAULT_TOLERANCE,
};
use nemsim_core::{BatteryError, BatteryState, CurveConstructionError, RegionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid run configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("[run] failure_policy must be set to \"abort\" or \"hold-last-state\"")]
    MissingFailurePolicy,

    #[error("loss encoding {encoding} needs an integer-capable backend, {backend} is LP only")]
    EncodingNeedsIntegers {
        encoding: &'static str,
        backend: LpSolverKind,
    },

    #[error("comparison tolerance must be a non-negative number, got {0}")]
    InvalidTolerance(f64),

    #[error("solver timeout must be positive, got {0} s")]
    InvalidTimeout(f64),

    #[error("battery overrides need a [battery] section naming its region")]
    BatteryOverrideWithoutBattery,

    #[error("invalid battery: {0}")]
    Battery(#[from] BatteryError),

    #[error("invalid linearizer: {0}")]
    Linearizer(#[from] CurveConstructionError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverSection {
    #[serde(default)]
    pub backend: LpSolverKind,
    /// Per-interval deadline; absent means wait for the backend
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub loss_encoding: LossEncoding,
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default)]
    pub failure_policy: Option<FailurePolicy>,
    #[serde(default = "default_tolerance")]
    pub comparison_tolerance: f64,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            failure_policy: None,
            comparison_tolerance: default_tolerance(),
        }
    }
}

fn default_round_trip() -> f64 {
    0.85
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryConfig {
    pub region: RegionId,
    pub energy_capacity_mwh: f64,
    pub power_rating_mw: f64,
    #[serde(default = "default_round_trip")]
    pub round_trip_efficiency: f64,
    #[serde(default)]
    pub initial_soc_mwh: f64,
    #[serde(default)]
    pub degradation_cost: f64,
    #[serde(default)]
    pub stored_energy_value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub cvp: CvpSettings,
    #[serde(default)]
    pub solver: SolverSection,
    #[serde(default)]
    pub linearizer: LinearizerConfig,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub battery: Option<BatteryConfig>,
}

impl RunConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading run configuration {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    /// Checks that do not depend on the chosen failure policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let encoding = self.solver.loss_encoding;
        if encoding.needs_integers() && !self.solver.backend.supports_integers() {
            return Err(ConfigError::EncodingNeedsIntegers {
                encoding: encoding.as_str(),
                backend: self.solver.backend,
            });
        }
        let tolerance = self.run.comparison_tolerance;
        if !(tolerance >= 0.0) || !tolerance.is_finite() {
            return Err(ConfigError::InvalidTolerance(tolerance));
        }
        if let Some(seconds) = self.solver.timeout_seconds {
            if !(seconds > 0.0) || !seconds.is_finite() {
                return Err(ConfigError::InvalidTimeout(seconds));
            }
        }
        Ok(())
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.run.failure_policy = Some(policy);
        self
    }

    pub fn failure_policy(&self) -> Result<FailurePolicy, ConfigError> {
        self.run.failure_policy.ok_or(ConfigError::MissingFailurePolicy)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.solver
            .timeout_seconds
            .filter(|s| *s > 0.0 && s.is_finite())
            .map(Duration::from_secs_f64)
    }

    pub fn cascade_config(&self) -> Result<CascadeConfig, ConfigError> {
        self.validate()?;
        let config = CascadeConfig::new(self.failure_policy()?)?
            .with_solver(self.solver.backend)
            .with_timeout(self.timeout())
            .with_formulation(FormulationOptions {
                cvp: self.cvp.clone(),
                loss_encoding: self.solver.loss_encoding,
            })
            .with_linearizer(self.linearizer)?;
        Ok(config)
    }

    pub fn comparator(&self) -> ResultComparator {
        ResultComparator::new(self.run.comparison_tolerance)
    }

    /// Initial battery, with energy capacity and power rating optionally overridden.
    pub fn battery_state(
        &self,
        capacity_mwh: Option<f64>,
        power_mw: Option<f64>,
    ) -> Result<Option<BatteryState>, ConfigError> {
        let Some(battery) = &self.battery else {
            if capacity_mwh.is_some() || power_mw.is_some() {
                return Err(ConfigError::BatteryOverrideWithoutBattery);
            }
            return Ok(None);
        };
        let state = BatteryState::new(
            battery.region.as_str(),
            capacity_mwh.unwrap_or(battery.energy_capacity_mwh),
            power_mw.unwrap_or(battery.power_rating_mw),
            battery.round_trip_efficiency,
        )?
        .with_costs(battery.degradation_cost, battery.stored_energy_value)
        .with_soc(battery.initial_soc_mwh)?;
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_takes_defaults() {
        let config = RunConfig::from_toml_str("[run]\nfailure_policy = \"abort\"\n").unwrap();
        assert_eq!(config.failure_policy().unwrap(), FailurePolicy::Abort);
        assert_eq!(config.cvp, CvpSettings::default());
        assert_eq!(config.solver.backend, LpSolverKind::Clarabel);
        assert_eq!(config.linearizer, LinearizerConfig::default());
        assert_eq!(config.run.comparison_tolerance, 1e-3);
        assert!(config.timeout().is_none());
        assert!(config.battery_state(None, None).unwrap().is_none());
    }

    #[test]
    fn failure_policy_must_be_explicit() {
        let config = RunConfig::from_toml_str("[cvp]\ndispatch_enabled = false\n").unwrap();
        assert!(!config.cvp.dispatch_enabled);
        assert!(matches!(
            config.cascade_config(),
            Err(ConfigError::MissingFailurePolicy)
        ));
        let fixed = config.with_failure_policy(FailurePolicy::HoldLastState);
        assert_eq!(
            fixed.cascade_config().unwrap().failure_policy,
            FailurePolicy::HoldLastState
        );
    }

    #[test]
    fn convex_combination_needs_mip_backend() {
        let text = r#"
            [solver]
            backend = "clarabel"
            loss_encoding = "convex-combination"
            [run]
            failure_policy = "abort"
        "#;
        assert!(matches!(
            RunConfig::from_toml_str(text),
            Err(ConfigError::EncodingNeedsIntegers { .. })
        ));
        let ok = text.replace("clarabel", "microlp");
        let config = RunConfig::from_toml_str(&ok).unwrap();
        let cascade = config.cascade_config().unwrap();
        assert_eq!(cascade.solver, LpSolverKind::Microlp);
        assert_eq!(
            cascade.formulation.loss_encoding,
            LossEncoding::ConvexCombination
        );
    }

    #[test]
    fn battery_overrides_apply() {
        let text = r#"
            [run]
            failure_policy = "hold-last-state"
            comparison_tolerance = 0.01
            [solver]
            timeout_seconds = 2.5
            [battery]
            region = "SA1"
            energy_capacity_mwh = 129.0
            power_rating_mw = 100.0
            initial_soc_mwh = 20.0
            stored_energy_value = 80.0
        "#;
        let config = RunConfig::from_toml_str(text).unwrap();
        assert_eq!(config.timeout(), Some(Duration::from_millis(2_500)));
        assert_eq!(config.comparator().tolerance(), 0.01);

        let battery = config.battery_state(Some(200.0), None).unwrap().unwrap();
        assert_eq!(battery.energy_capacity_mwh, 200.0);
        assert_eq!(battery.power_rating_mw, 100.0);
        assert_eq!(battery.soc_mwh, 20.0);
        assert_eq!(battery.stored_energy_value, 80.0);
        assert!((battery.round_trip_efficiency() - 0.85).abs() < 1e-12);

        assert!(matches!(
            config.battery_state(Some(10.0), None),
            Err(ConfigError::Battery(_))
        ));
    }

    #[test]
    fn override_without_battery_section_is_rejected() {
        let config = RunConfig::default().with_failure_policy(FailurePolicy::Abort);
        assert!(matches!(
            config.battery_state(None, Some(50.0)),
            Err(ConfigError::BatteryOverrideWithoutBattery)
        ));
    }

    #[test]
    fn unknown_policy_is_a_parse_error() {
        let err = RunConfig::from_toml_str("[run]\nfailure_policy = \"retry\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn bad_linearizer_is_reported() {
        let config = RunConfig::from_toml_str(
            "[linearizer]\nflow_min_mw = 10.0\nflow_max_mw = -10.0\n[run]\nfailure_policy = \"abort\"\n",
        )
        .unwrap();
        assert!(matches!(
            config.cascade_config(),
            Err(ConfigError::Linearizer(_))
        ));
    }
}
