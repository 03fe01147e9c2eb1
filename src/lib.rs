//! Iterative reconstruction for tomographic inverse problems.
//!
//! Problems are stated as an [`Objective`] over labelled arrays
//! ([`DataArray`]), built from forward models ([`operators`]) and convex
//! terms ([`functions`]), and solved by one of the [`algorithms`] driven by a
//! [`Solver`] that applies the stopping rules in [`stopping`].

pub mod algorithms;
pub mod array;
pub mod error;
pub mod functions;
pub mod objective;
pub mod operators;
pub mod sampler;
pub mod stopping;

pub use algorithms::{Algorithm, Solution, Solver, SolverOptions, Status, StepSize};
pub use array::{AxisLabel, AxisSpec, DataArray, Geometry};
pub use error::{ReconError, Result};
pub use functions::Function;
pub use objective::{Objective, Role, Term};
pub use operators::Operator;
pub use sampler::Sampler;
pub use stopping::{CancelToken, ConvergenceController, ConvergenceLog, StopReason, StoppingCriterion};
