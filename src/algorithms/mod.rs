//! Iterative solvers and the state machine that drives them.
//!
//! Each variant implements [`Algorithm`], a single `update` plus read-only
//! accessors. [`Solver`] owns one algorithm instance and is the only place
//! where iteration counting, non-finite detection, callbacks and stopping
//! decisions happen, so the variants stay free of bookkeeping.

mod callback;
mod cgls;
mod gd;
mod options;
mod pdhg;
mod preconditioner;
mod proximal_gradient;
mod sirt;
mod solver;
mod spdhg;
mod step_policy;

use serde::Serialize;

use crate::array::DataArray;
use crate::error::Result;
use crate::stopping::{ConvergenceController, StoppingCriterion};

pub use callback::{Callback, IterationInfo, LogCallback};
pub use cgls::Cgls;
pub use gd::GradientDescent;
pub use options::{SolverOptions, StepSize};
pub use pdhg::Pdhg;
pub use preconditioner::Preconditioner;
pub use proximal_gradient::ProximalGradient;
pub use sirt::Sirt;
pub use solver::{Solution, Solver};
pub use spdhg::{Spdhg, SpdhgSteps};
pub use step_policy::ArmijoBacktracking;

/// Lifecycle of a solver run.
///
/// `Ready -> Running -> {Converged, MaxIterationsReached, Cancelled, Failed}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ready,
    Running,
    Converged,
    MaxIterationsReached,
    Cancelled,
    Failed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Ready | Status::Running)
    }
}

/// One iterative method: owns its iterate and auxiliary variables.
pub trait Algorithm: Send {
    fn name(&self) -> &'static str;

    /// Advance the iterate by one iteration.
    fn update(&mut self) -> Result<()>;

    fn solution(&self) -> &DataArray;

    /// Primal objective at the current iterate.
    fn objective(&self) -> Result<f64>;

    /// Dual objective, for primal-dual methods whose conjugates are known.
    fn dual_objective(&self) -> Result<Option<f64>> {
        Ok(None)
    }

    /// Relative residual tracked by the method itself, if any.
    fn residual_norm(&self) -> Option<f64> {
        None
    }

    /// Options the method was built with; `Solver::new` refuses run options
    /// whose `acceleration` or `initial_step` differ from them.
    fn built_with(&self) -> Option<&SolverOptions> {
        None
    }

    /// Stopping criteria implied by `options` for this method.
    fn criteria(&self, options: &SolverOptions) -> Vec<StoppingCriterion> {
        ConvergenceController::from_options(options).criteria().to_vec()
    }
}
