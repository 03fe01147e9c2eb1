use std::fmt;

use log::{debug, info, warn};

use super::{Algorithm, Callback, IterationInfo, SolverOptions, Status};
use crate::array::DataArray;
use crate::error::{ReconError, Result};
use crate::stopping::{
    CancelToken, ConvergenceController, ConvergenceLog, IterationRecord, IterationSnapshot, StopReason,
    StoppingCriterion,
};

/// Final iterate of a run together with its history.
#[derive(Clone, Debug)]
pub struct Solution {
    pub x: DataArray,
    pub status: Status,
    pub log: ConvergenceLog,
}

/// Drives one [`Algorithm`] through its lifecycle.
pub struct Solver<A: Algorithm> {
    algorithm: A,
    options: SolverOptions,
    controller: ConvergenceController,
    status: Status,
    iteration: usize,
    log: ConvergenceLog,
    last_objective: Option<f64>,
    callbacks: Vec<Box<dyn Callback>>,
}

impl<A: Algorithm> fmt::Debug for Solver<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Solver")
            .field("algorithm", &self.algorithm.name())
            .field("status", &self.status)
            .field("iteration", &self.iteration)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl<A: Algorithm> Solver<A> {
    /// Validates `options` and records the objective at the initial iterate.
    ///
    /// Fails when `options` contradict the ones `algorithm` was built with.
    pub fn new(algorithm: A, options: SolverOptions) -> Result<Self> {
        options.validate()?;
        if let Some(built) = algorithm.built_with() {
            options.ensure_consistent_with(built, algorithm.name())?;
        }
        let mut controller = ConvergenceController::new();
        for c in algorithm.criteria(&options) {
            controller = controller.with(c);
        }

        let objective = algorithm.objective()?;
        if objective.is_nan() {
            return Err(ReconError::NonFinite {
                quantity: "objective",
                iteration: 0,
            });
        }
        let dual_objective = algorithm.dual_objective()?;
        let mut log = ConvergenceLog::new();
        log.push(IterationRecord {
            iteration: 0,
            objective: Some(objective),
            dual_objective,
            change: 0.0,
        });
        info!("{} set up, initial objective {:.6e}", algorithm.name(), objective);

        Ok(Self {
            algorithm,
            options,
            controller,
            status: Status::Ready,
            iteration: 0,
            log,
            last_objective: Some(objective),
            callbacks: Vec::new(),
        })
    }

    pub fn with_callback(mut self, callback: impl Callback + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.controller = self.controller.with_cancellation(token);
        self
    }

    pub fn with_criterion(mut self, criterion: StoppingCriterion) -> Self {
        self.controller = self.controller.with(criterion);
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Completed iterations.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn algorithm(&self) -> &A {
        &self.algorithm
    }

    pub fn solution(&self) -> &DataArray {
        self.algorithm.solution()
    }

    pub fn log(&self) -> &ConvergenceLog {
        &self.log
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    fn terminate(&mut self, reason: StopReason) {
        self.status = reason.status();
        match self.status {
            Status::Failed => warn!("{} stopped: {}", self.algorithm.name(), reason),
            _ => info!("{} stopped: {}", self.algorithm.name(), reason),
        }
        self.log.finish(reason);
    }

    fn fail(&mut self, error: ReconError) -> ReconError {
        let reason = match &error {
            ReconError::NonFinite { quantity, iteration } => StopReason::NonFinite {
                quantity: *quantity,
                iteration: *iteration,
            },
            other => StopReason::Error {
                message: other.to_string(),
            },
        };
        self.terminate(reason);
        error
    }

    /// Run one iteration and evaluate the stopping criteria.
    ///
    /// After a terminal transition this returns
    /// [`ReconError::AlgorithmTerminated`] and leaves all state untouched.
    pub fn step(&mut self) -> Result<Status> {
        if self.status.is_terminal() {
            return Err(ReconError::AlgorithmTerminated { status: self.status });
        }
        if self.status == Status::Ready {
            self.status = Status::Running;
        }

        let previous = self.algorithm.solution().clone();
        if let Err(e) = self.algorithm.update() {
            return Err(self.fail(e));
        }
        self.iteration += 1;
        let iteration = self.iteration;

        let x = self.algorithm.solution();
        if x.first_non_finite().is_some() {
            return Err(self.fail(ReconError::NonFinite {
                quantity: "iterate",
                iteration,
            }));
        }
        let change = match x.sub(&previous) {
            Ok(d) => d.norm() / x.norm().max(f64::MIN_POSITIVE),
            Err(e) => return Err(self.fail(e)),
        };

        let evaluate = iteration % self.options.objective_interval == 0;
        let (objective, dual_objective) = if evaluate {
            let objective = match self.algorithm.objective() {
                Ok(v) => v,
                Err(e) => return Err(self.fail(e)),
            };
            if objective.is_nan() {
                return Err(self.fail(ReconError::NonFinite {
                    quantity: "objective",
                    iteration,
                }));
            }
            let dual = match self.algorithm.dual_objective() {
                Ok(v) => v,
                Err(e) => return Err(self.fail(e)),
            };
            (Some(objective), dual)
        } else {
            (None, None)
        };

        let record = IterationRecord {
            iteration,
            objective,
            dual_objective,
            change,
        };
        debug!(
            "{} iteration {}: objective {:?}, change {:.3e}",
            self.algorithm.name(),
            iteration,
            objective,
            change
        );
        self.log.push(record);

        let info = IterationInfo {
            solver: self.algorithm.name(),
            iteration,
            x: self.algorithm.solution(),
            objective,
            dual_objective,
            change,
        };
        for cb in &mut self.callbacks {
            cb.on_iteration(&info);
        }

        let snapshot = IterationSnapshot {
            iteration,
            objective,
            previous_objective: if objective.is_some() { self.last_objective } else { None },
            change,
            residual: self.algorithm.residual_norm(),
        };
        if objective.is_some() {
            self.last_objective = objective;
        }
        if let Some(reason) = self.controller.check(&snapshot) {
            self.terminate(reason);
        }
        Ok(self.status)
    }

    /// Step until a terminal state and return the final iterate.
    pub fn run(&mut self) -> Result<Solution> {
        while !self.status.is_terminal() {
            self.step()?;
        }
        Ok(Solution {
            x: self.algorithm.solution().clone(),
            status: self.status,
            log: self.log.clone(),
        })
    }
}
