use std::sync::{Arc, Mutex};

use recon_optim::algorithms::{Cgls, GradientDescent, IterationInfo, ProximalGradient};
use recon_optim::functions::LeastSquares;
use recon_optim::operators::IdentityOperator;
use recon_optim::{
    Algorithm, AxisLabel, CancelToken, DataArray, Geometry, Objective, Operator, ReconError, Solver, SolverOptions,
    Status, StepSize, StopReason,
};

fn least_squares(b: Vec<f64>) -> (Objective, Geometry) {
    let g = Geometry::vector(AxisLabel::Horizontal, b.len()).unwrap();
    let b = DataArray::from_vec(g.clone(), b).unwrap();
    let id: Arc<dyn Operator> = Arc::new(IdentityOperator::new(g.clone()));
    let objective = Objective::new(g.clone())
        .smooth(Arc::new(LeastSquares::new(id, b).unwrap()))
        .unwrap();
    (objective, g)
}

fn gd_solver(options: SolverOptions) -> Solver<GradientDescent> {
    let (objective, g) = least_squares(vec![1.0, -2.0, 0.5]);
    let gd = GradientDescent::new(objective, DataArray::zeros(&g), &options).unwrap();
    Solver::new(gd, options).unwrap()
}

/// Halves its iterate and turns it into NaN after `poison_at` updates.
#[derive(Debug)]
struct Poisoned {
    x: DataArray,
    updates: usize,
    poison_at: usize,
}

impl Algorithm for Poisoned {
    fn name(&self) -> &'static str {
        "poisoned"
    }

    fn update(&mut self) -> recon_optim::Result<()> {
        self.updates += 1;
        if self.updates == self.poison_at {
            self.x.fill(f64::NAN);
        } else {
            self.x.scale(0.5);
        }
        Ok(())
    }

    fn solution(&self) -> &DataArray {
        &self.x
    }

    fn objective(&self) -> recon_optim::Result<f64> {
        Ok(self.x.squared_norm())
    }
}

#[test]
fn starts_ready_and_records_the_initial_objective() {
    let solver = gd_solver(SolverOptions::default());
    assert_eq!(solver.status(), Status::Ready);
    assert_eq!(solver.iteration(), 0);
    let first = solver.log().history()[0];
    assert_eq!(first.iteration, 0);
    assert_eq!(first.objective, Some(0.5 * (1.0 + 4.0 + 0.25)));
}

#[test]
fn stepping_after_termination_is_rejected_without_side_effects() {
    let options = SolverOptions {
        max_iterations: 3,
        ..SolverOptions::default()
    };
    let mut solver = gd_solver(options);
    let solution = solver.run().unwrap();
    assert_eq!(solution.status, Status::MaxIterationsReached);

    let before = solver.solution().clone();
    let records = solver.log().history().len();
    for _ in 0..2 {
        assert!(matches!(
            solver.step(),
            Err(ReconError::AlgorithmTerminated {
                status: Status::MaxIterationsReached
            })
        ));
    }
    assert_eq!(solver.solution(), &before);
    assert_eq!(solver.log().history().len(), records);
    assert_eq!(solver.iteration(), 3);
}

#[test]
fn cancellation_takes_effect_within_one_step() {
    let token = CancelToken::new();
    let trigger = token.clone();
    let options = SolverOptions {
        max_iterations: 1000,
        ..SolverOptions::default()
    };
    let mut solver = gd_solver(options)
        .with_cancel_token(token)
        .with_callback(move |info: &IterationInfo<'_>| {
            if info.iteration == 4 {
                trigger.cancel();
            }
        });
    let solution = solver.run().unwrap();
    assert_eq!(solution.status, Status::Cancelled);
    assert_eq!(solver.iteration(), 4);
    assert_eq!(solution.log.stop_reason(), Some(&StopReason::Cancelled { iteration: 4 }));
}

#[test]
fn objective_tolerance_converges() {
    let options = SolverOptions {
        max_iterations: 500,
        tolerance: 1e-10,
        ..SolverOptions::default()
    };
    let mut solver = gd_solver(options);
    let solution = solver.run().unwrap();
    assert_eq!(solution.status, Status::Converged);
    assert!(matches!(
        solution.log.stop_reason(),
        Some(StopReason::ObjectiveTolerance { .. })
    ));
    assert!(solver.iteration() < 500);
}

#[test]
fn non_finite_iterate_fails_the_run() {
    let g = Geometry::vector(AxisLabel::Horizontal, 2).unwrap();
    let poisoned = Poisoned {
        x: DataArray::full(&g, 1.0),
        updates: 0,
        poison_at: 3,
    };
    let mut solver = Solver::new(poisoned, SolverOptions::default()).unwrap();
    assert_eq!(solver.step().unwrap(), Status::Running);
    assert_eq!(solver.step().unwrap(), Status::Running);
    assert!(matches!(
        solver.step(),
        Err(ReconError::NonFinite {
            quantity: "iterate",
            iteration: 3
        })
    ));
    assert_eq!(solver.status(), Status::Failed);
    assert_eq!(
        solver.log().stop_reason(),
        Some(&StopReason::NonFinite {
            quantity: "iterate",
            iteration: 3
        })
    );
    assert!(matches!(solver.step(), Err(ReconError::AlgorithmTerminated { .. })));
}

#[test]
fn objective_interval_skips_evaluations() {
    let options = SolverOptions {
        max_iterations: 6,
        objective_interval: 3,
        ..SolverOptions::default()
    };
    let mut solver = gd_solver(options);
    solver.run().unwrap();
    let evaluated: Vec<usize> = solver
        .log()
        .history()
        .iter()
        .filter(|r| r.objective.is_some())
        .map(|r| r.iteration)
        .collect();
    assert_eq!(evaluated, vec![0, 3, 6]);
}

#[test]
fn callbacks_see_every_iteration() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let options = SolverOptions {
        max_iterations: 5,
        ..SolverOptions::default()
    };
    let mut solver = gd_solver(options).with_callback(move |info: &IterationInfo<'_>| {
        if let Ok(mut v) = sink.lock() {
            v.push((info.iteration, info.objective.is_some()));
        }
    });
    solver.run().unwrap();
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, (1..=5).map(|i| (i, true)).collect::<Vec<_>>());
}

#[test]
fn convergence_log_serialises_to_json() {
    let options = SolverOptions {
        max_iterations: 2,
        ..SolverOptions::default()
    };
    let solution = gd_solver(options).run().unwrap();
    let json = serde_json::to_value(&solution.log).unwrap();
    assert_eq!(json["records"].as_array().unwrap().len(), 3);
    assert_eq!(json["stop_reason"]["reason"], "max_iterations");
}

#[test]
fn run_options_must_match_the_construction_options() {
    let g = Geometry::vector(AxisLabel::Horizontal, 2).unwrap();
    let id: Arc<dyn Operator> = Arc::new(IdentityOperator::new(g.clone()));
    let b = DataArray::from_vec(g.clone(), vec![1.0, 2.0]).unwrap();
    let cgls = Cgls::new(id, b, DataArray::zeros(&g), &SolverOptions::default()).unwrap();
    let contradicting = SolverOptions {
        acceleration: true,
        initial_step: StepSize::Fixed(0.1),
        ..SolverOptions::default()
    };
    assert!(matches!(
        Solver::new(cgls, contradicting),
        Err(ReconError::InvalidConfiguration(_))
    ));

    let (objective, g) = least_squares(vec![1.0, -2.0, 0.5]);
    let ista = ProximalGradient::new(objective, DataArray::zeros(&g), &SolverOptions::default()).unwrap();
    let accelerated = SolverOptions {
        acceleration: true,
        ..SolverOptions::default()
    };
    assert!(Solver::new(ista, accelerated).is_err());
}

#[test]
fn stopping_settings_may_differ_from_the_construction_options() {
    let (objective, g) = least_squares(vec![1.0, -2.0, 0.5]);
    let gd = GradientDescent::new(objective, DataArray::zeros(&g), &SolverOptions::default()).unwrap();
    let options = SolverOptions {
        max_iterations: 7,
        tolerance: 1e-6,
        ..SolverOptions::default()
    };
    assert!(Solver::new(gd, options).is_ok());
}
