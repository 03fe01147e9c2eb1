use serde::{Deserialize, Serialize};

use crate::error::{ReconError, Result};

/// Armijo backtracking: shrink the step by `beta` until
/// `f(x + a d) <= f(x) + c a <grad f(x), d>`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmijoBacktracking {
    pub beta: f64,
    pub max_steps: usize,
    pub c_armijo: f64,
}

impl ArmijoBacktracking {
    pub fn new(beta: f64, max_steps: usize, c_armijo: f64) -> Result<Self> {
        if !(beta > 0.0 && beta < 1.0) {
            return Err(ReconError::config(format!("Armijo beta must lie in (0, 1), got {beta}")));
        }
        if !(c_armijo > 0.0 && c_armijo < 1.0) {
            return Err(ReconError::config(format!(
                "Armijo constant must lie in (0, 1), got {c_armijo}"
            )));
        }
        if max_steps == 0 {
            return Err(ReconError::config("Armijo max_steps must be positive"));
        }
        Ok(Self {
            beta,
            max_steps,
            c_armijo,
        })
    }

    /// Backtrack from `alpha0`.
    ///
    /// `eval_cost(alpha)` returns the trial objective, `None` for an invalid
    /// (non-finite) trial point. `dphi0` is the directional derivative at
    /// `alpha = 0` and must be negative for a descent direction.
    pub(crate) fn search(
        &self,
        alpha0: f64,
        cost0: f64,
        dphi0: f64,
        eval_cost: &mut dyn FnMut(f64) -> Result<Option<f64>>,
    ) -> Result<f64> {
        let mut alpha = alpha0;
        for _ in 0..self.max_steps {
            let Some(cost_trial) = eval_cost(alpha)? else {
                alpha *= self.beta;
                continue;
            };
            let rhs = cost0 + self.c_armijo * alpha * dphi0;
            if rhs.is_finite() && cost_trial <= rhs {
                return Ok(alpha);
            }
            alpha *= self.beta;
        }
        Err(ReconError::ConvergenceFailure {
            what: "Armijo backtracking".to_string(),
            iterations: self.max_steps,
        })
    }
}

impl Default for ArmijoBacktracking {
    fn default() -> Self {
        Self {
            beta: 0.5,
            max_steps: 20,
            c_armijo: 1e-4,
        }
    }
}
