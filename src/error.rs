use crate::algorithms::Status;

/// Errors raised by operators, functions and algorithms.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconError {
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    #[error(
        "adjoint inconsistency for {operator}: <Ax, y> = {lhs:.6e}, <x, A*y> = {rhs:.6e} (relative error {relative_error:.3e})"
    )]
    AdjointInconsistency {
        operator: String,
        lhs: f64,
        rhs: f64,
        relative_error: f64,
    },

    #[error("{function} is not differentiable, use its proximal map instead")]
    NotDifferentiable { function: String },

    #[error("{function} has no closed-form proximal map")]
    NotProximable { function: String },

    #[error("{operator} is nonlinear and has no adjoint; use jacobian_adjoint")]
    NotLinear { operator: String },

    #[error("{what} is not implemented for {target}")]
    NotImplemented { what: &'static str, target: String },

    #[error("step size must be positive and finite, got {step}")]
    InvalidStep { step: f64 },

    #[error("unstable step sizes: {detail}")]
    UnstableStepSizes { detail: String },

    #[error("{what} did not converge within {iterations} iterations")]
    ConvergenceFailure { what: String, iterations: usize },

    #[error("non-finite {quantity} at iteration {iteration}")]
    NonFinite {
        quantity: &'static str,
        iteration: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("algorithm already terminated ({status:?})")]
    AlgorithmTerminated { status: Status },

    #[error("invalid sampler: {0}")]
    InvalidSampler(String),
}

impl ReconError {
    pub(crate) fn shape(
        context: impl Into<String>,
        expected: impl std::fmt::Debug,
        found: impl std::fmt::Debug,
    ) -> Self {
        ReconError::ShapeMismatch {
            context: context.into(),
            expected: format!("{expected:?}"),
            found: format!("{found:?}"),
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        ReconError::InvalidConfiguration(msg.into())
    }
}

/// Convenience alias for `Result<T, ReconError>`.
pub type Result<T> = std::result::Result<T, ReconError>;
