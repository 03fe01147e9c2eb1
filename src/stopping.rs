//! Stopping criteria, cooperative cancellation and the convergence log.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::algorithms::{SolverOptions, Status};

/// Shared cancellation flag, checked once after every completed step.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What the controller sees after a completed iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IterationSnapshot {
    /// Number of completed iterations.
    pub iteration: usize,
    /// Objective at this iteration, when it was evaluated.
    pub objective: Option<f64>,
    /// Most recent earlier objective value.
    pub previous_objective: Option<f64>,
    /// `||x_k - x_{k-1}|| / ||x_k||`
    pub change: f64,
    /// Algorithm-specific relative residual, if the algorithm tracks one.
    pub residual: Option<f64>,
}

#[derive(Clone, Debug)]
pub enum StoppingCriterion {
    MaxIterations(usize),
    /// `|f_k - f_{k-1}| <= tol * max(1, |f_{k-1}|)`, only between finite values.
    ObjectiveTolerance(f64),
    IterateTolerance(f64),
    ResidualTolerance(f64),
    Cancellation(CancelToken),
}

impl StoppingCriterion {
    pub fn check(&self, s: &IterationSnapshot) -> Option<StopReason> {
        match self {
            StoppingCriterion::MaxIterations(n) => (s.iteration >= *n).then_some(StopReason::MaxIterations {
                iterations: s.iteration,
            }),
            StoppingCriterion::ObjectiveTolerance(tol) => {
                let (f, prev) = (s.objective?, s.previous_objective?);
                if !(f.is_finite() && prev.is_finite()) {
                    return None;
                }
                let change = (f - prev).abs();
                (change <= tol * prev.abs().max(1.0)).then_some(StopReason::ObjectiveTolerance {
                    change,
                    tolerance: *tol,
                })
            }
            StoppingCriterion::IterateTolerance(tol) => (s.change <= *tol).then_some(StopReason::IterateTolerance {
                change: s.change,
                tolerance: *tol,
            }),
            StoppingCriterion::ResidualTolerance(tol) => {
                let r = s.residual?;
                (r <= *tol).then_some(StopReason::ResidualTolerance {
                    residual: r,
                    tolerance: *tol,
                })
            }
            StoppingCriterion::Cancellation(token) => token.is_cancelled().then_some(StopReason::Cancelled {
                iteration: s.iteration,
            }),
        }
    }
}

/// Why a run ended.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    MaxIterations { iterations: usize },
    ObjectiveTolerance { change: f64, tolerance: f64 },
    IterateTolerance { change: f64, tolerance: f64 },
    ResidualTolerance { residual: f64, tolerance: f64 },
    Cancelled { iteration: usize },
    NonFinite { quantity: &'static str, iteration: usize },
    Error { message: String },
}

impl StopReason {
    /// Terminal status this reason maps to.
    pub fn status(&self) -> Status {
        match self {
            StopReason::MaxIterations { .. } => Status::MaxIterationsReached,
            StopReason::ObjectiveTolerance { .. }
            | StopReason::IterateTolerance { .. }
            | StopReason::ResidualTolerance { .. } => Status::Converged,
            StopReason::Cancelled { .. } => Status::Cancelled,
            StopReason::NonFinite { .. } | StopReason::Error { .. } => Status::Failed,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::MaxIterations { iterations } => {
                write!(f, "reached the iteration cap ({iterations} iterations)")
            }
            StopReason::ObjectiveTolerance { change, tolerance } => write!(
                f,
                "converged: objective change {change:.3e} within tolerance {tolerance:.3e}"
            ),
            StopReason::IterateTolerance { change, tolerance } => write!(
                f,
                "converged: relative iterate change {change:.3e} within tolerance {tolerance:.3e}"
            ),
            StopReason::ResidualTolerance { residual, tolerance } => write!(
                f,
                "converged: relative residual {residual:.3e} within tolerance {tolerance:.3e}"
            ),
            StopReason::Cancelled { iteration } => write!(f, "cancelled after iteration {iteration}"),
            StopReason::NonFinite { quantity, iteration } => {
                write!(f, "failed: non-finite {quantity} at iteration {iteration}")
            }
            StopReason::Error { message } => write!(f, "failed: {message}"),
        }
    }
}

/// Ordered list of criteria combined by logical OR; the first match wins.
#[derive(Clone, Debug, Default)]
pub struct ConvergenceController {
    criteria: Vec<StoppingCriterion>,
}

impl ConvergenceController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Iteration cap, plus objective / iterate tolerances when enabled.
    pub fn from_options(options: &SolverOptions) -> Self {
        let mut c = Self::new().with(StoppingCriterion::MaxIterations(options.max_iterations));
        if options.tolerance > 0.0 {
            c = c.with(StoppingCriterion::ObjectiveTolerance(options.tolerance));
        }
        if let Some(tol) = options.iterate_tolerance {
            c = c.with(StoppingCriterion::IterateTolerance(tol));
        }
        c
    }

    pub fn with(mut self, criterion: StoppingCriterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// Cancellation is checked before every other criterion.
    pub fn with_cancellation(mut self, token: CancelToken) -> Self {
        self.criteria.insert(0, StoppingCriterion::Cancellation(token));
        self
    }

    pub fn criteria(&self) -> &[StoppingCriterion] {
        &self.criteria
    }

    pub fn check(&self, snapshot: &IterationSnapshot) -> Option<StopReason> {
        self.criteria.iter().find_map(|c| c.check(snapshot))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub objective: Option<f64>,
    pub dual_objective: Option<f64>,
    pub change: f64,
}

impl IterationRecord {
    /// Primal-dual gap, when both objectives were evaluated.
    pub fn gap(&self) -> Option<f64> {
        Some(self.objective? - self.dual_objective?)
    }
}

/// History of one solver run, owned by that run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConvergenceLog {
    records: Vec<IterationRecord>,
    stop_reason: Option<StopReason>,
}

impl ConvergenceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    pub(crate) fn finish(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
    }

    pub fn history(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    /// Evaluated objective values in iteration order.
    pub fn objective_values(&self) -> Vec<f64> {
        self.records.iter().filter_map(|r| r.objective).collect()
    }

    /// Most recent evaluated objective.
    pub fn last_objective(&self) -> Option<f64> {
        self.records.iter().rev().find_map(|r| r.objective)
    }
}
