use serde::{Deserialize, Serialize};

use crate::error::{ReconError, Result};

/// Initial step size: derived from a Lipschitz / norm estimate, or fixed.
///
/// Serialised as the string `"auto"` or as a number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StepRepr", into = "StepRepr")]
pub enum StepSize {
    #[default]
    Auto,
    Fixed(f64),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StepRepr {
    Name(String),
    Value(f64),
}

impl TryFrom<StepRepr> for StepSize {
    type Error = String;

    fn try_from(repr: StepRepr) -> std::result::Result<Self, String> {
        match repr {
            StepRepr::Name(s) if s == "auto" => Ok(StepSize::Auto),
            StepRepr::Name(s) => Err(format!("unknown step size {s:?}, expected \"auto\" or a number")),
            StepRepr::Value(v) => Ok(StepSize::Fixed(v)),
        }
    }
}

impl From<StepSize> for StepRepr {
    fn from(step: StepSize) -> Self {
        match step {
            StepSize::Auto => StepRepr::Name("auto".to_string()),
            StepSize::Fixed(v) => StepRepr::Value(v),
        }
    }
}

/// Per-run settings shared by every algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub max_iterations: usize,
    /// Relative objective change that counts as converged; 0 disables it.
    pub tolerance: f64,
    /// Relative iterate change that counts as converged.
    pub iterate_tolerance: Option<f64>,
    pub initial_step: StepSize,
    /// Momentum extrapolation, where the algorithm supports it.
    pub acceleration: bool,
    /// Evaluate the objective every this many iterations.
    pub objective_interval: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 0.0,
            iterate_tolerance: None,
            initial_step: StepSize::Auto,
            acceleration: false,
            objective_interval: 1,
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(ReconError::config("max_iterations must be positive"));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(ReconError::config(format!(
                "tolerance must be finite and non-negative, got {}",
                self.tolerance
            )));
        }
        if let Some(t) = self.iterate_tolerance {
            if !(t.is_finite() && t >= 0.0) {
                return Err(ReconError::config(format!(
                    "iterate_tolerance must be finite and non-negative, got {t}"
                )));
            }
        }
        if let StepSize::Fixed(s) = self.initial_step {
            if !(s.is_finite() && s > 0.0) {
                return Err(ReconError::InvalidStep { step: s });
            }
        }
        if self.objective_interval == 0 {
            return Err(ReconError::config("objective_interval must be at least 1"));
        }
        Ok(())
    }

    /// Run options must agree with the construction options on the settings
    /// that shaped the algorithm.
    pub(crate) fn ensure_consistent_with(&self, built: &SolverOptions, algorithm: &str) -> Result<()> {
        if self.acceleration != built.acceleration || self.initial_step != built.initial_step {
            return Err(ReconError::config(format!(
                "{algorithm} was built with acceleration = {}, initial_step = {:?} \
                 but the solver got acceleration = {}, initial_step = {:?}",
                built.acceleration, built.initial_step, self.acceleration, self.initial_step
            )));
        }
        Ok(())
    }

    /// Rejects `acceleration` for algorithms without a momentum variant.
    pub(crate) fn reject_acceleration(&self, algorithm: &str) -> Result<()> {
        if self.acceleration {
            return Err(ReconError::config(format!("{algorithm} does not support acceleration")));
        }
        Ok(())
    }
}
