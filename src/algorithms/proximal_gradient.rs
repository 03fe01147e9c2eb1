use log::{debug, info, warn};

use super::{Algorithm, ArmijoBacktracking, Preconditioner, SolverOptions, StepSize};
use crate::array::DataArray;
use crate::error::{ReconError, Result};
use crate::functions::check_step;
use crate::objective::Objective;

/// Forward-backward splitting on `F(x) + G(x)`: ISTA, or FISTA with
/// `acceleration`.
///
/// `F` is the sum of the smooth terms, `G` the single proximable term (the
/// zero function when there is none). Default steps are `0.99 * 2/L` for
/// ISTA and `1/L` for FISTA; with a zero smooth part the step is 1. Without
/// a Lipschitz estimate the step starts at 1 and backtracks until
/// `F(z) <= F(y) + <grad F(y), z - y> + ||z - y||^2 / (2 step)` holds for
/// the proximal point `z`.
#[derive(Debug)]
pub struct ProximalGradient {
    objective: Objective,
    x: DataArray,
    /// Extrapolated point; equals `x` without acceleration.
    y: DataArray,
    t: f64,
    step: f64,
    lipschitz: Option<f64>,
    accelerated: bool,
    line_search: Option<ArmijoBacktracking>,
    preconditioner: Option<Preconditioner>,
    options: SolverOptions,
}

impl ProximalGradient {
    pub fn new(objective: Objective, x0: DataArray, options: &SolverOptions) -> Result<Self> {
        options.validate()?;
        x0.ensure_geometry(objective.domain(), "ProximalGradient initial iterate")?;
        if let Some(t) = objective.dual_term() {
            return Err(ReconError::config(format!(
                "ProximalGradient cannot handle the dual term {}, use a primal-dual method",
                t.function().name()
            )));
        }

        let accelerated = options.acceleration;
        let has_smooth = objective.smooth_terms().next().is_some();
        let lipschitz = if has_smooth {
            objective.smooth_lipschitz()
        } else {
            Some(0.0)
        };
        let (step, line_search) = match options.initial_step {
            StepSize::Fixed(s) => (s, None),
            StepSize::Auto => match lipschitz {
                Some(l) if l > 0.0 => (if accelerated { 1.0 / l } else { 0.99 * 2.0 / l }, None),
                Some(_) => (1.0, None),
                None => {
                    info!("ProximalGradient: no Lipschitz estimate, backtracking on the smooth part");
                    (1.0, Some(ArmijoBacktracking::default()))
                }
            },
        };
        check_step(step)?;

        let algorithm = Self {
            objective,
            y: x0.clone(),
            x: x0,
            t: 1.0,
            step,
            lipschitz,
            accelerated,
            line_search,
            preconditioner: None,
            options: *options,
        };
        if algorithm.is_provably_convergent() == Ok(false) {
            warn!(
                "{} step {:.3e} exceeds the convergence bound for L = {:?}",
                algorithm.name(),
                step,
                lipschitz
            );
        }
        info!("{} configured with step {:.6e}", algorithm.name(), step);
        Ok(algorithm)
    }

    /// Backtrack from the current step in every iteration. Only `beta` and
    /// `max_steps` are used.
    pub fn with_backtracking(self, backtracking: ArmijoBacktracking) -> Result<Self> {
        if self.preconditioner.is_some() {
            return Err(ReconError::config(
                "ProximalGradient backtracking is not available with a preconditioner",
            ));
        }
        Ok(Self {
            line_search: Some(backtracking),
            ..self
        })
    }

    pub fn with_preconditioner(self, preconditioner: Preconditioner) -> Result<Self> {
        if self.line_search.is_some() {
            return Err(ReconError::config(
                "ProximalGradient backtracking is not available with a preconditioner",
            ));
        }
        preconditioner
            .values()
            .ensure_geometry(self.objective.domain(), "ProximalGradient preconditioner")?;
        Ok(Self {
            preconditioner: Some(preconditioner),
            ..self
        })
    }

    /// Current step; never grows under backtracking.
    pub fn step_size(&self) -> f64 {
        self.step
    }

    pub fn is_accelerated(&self) -> bool {
        self.accelerated
    }

    pub fn is_backtracking(&self) -> bool {
        self.line_search.is_some()
    }

    /// Whether the step satisfies the classical bound: `step <= 0.99 * 2/L`
    /// for ISTA, `step <= 1/L` for FISTA.
    ///
    /// Unknown with a preconditioner or without a Lipschitz estimate.
    pub fn is_provably_convergent(&self) -> Result<bool> {
        if self.preconditioner.is_some() {
            return Err(ReconError::NotImplemented {
                what: "convergence check",
                target: "preconditioned proximal gradient".to_string(),
            });
        }
        let l = self.lipschitz.ok_or_else(|| ReconError::NotImplemented {
            what: "convergence check",
            target: "objective without a Lipschitz estimate".to_string(),
        })?;
        if l == 0.0 {
            return Ok(true);
        }
        let bound = if self.accelerated { 1.0 / l } else { 0.99 * 2.0 / l };
        Ok(self.step <= bound)
    }

    fn forward_backward(&self, point: &DataArray, gradient: &DataArray, step: f64) -> Result<DataArray> {
        let forward = point.sapyb(1.0, gradient, -step)?;
        match self.objective.proximable_term() {
            Some(_) => self.objective.proximal(&forward, step),
            None => Ok(forward),
        }
    }

    /// One proximal-gradient step from `point`, shrinking `self.step` first
    /// when backtracking.
    fn descend(&mut self, point: &DataArray) -> Result<DataArray> {
        let mut gradient = self.objective.smooth_gradient(point)?;
        if let Some(p) = &self.preconditioner {
            gradient = p.apply(&gradient)?;
        }
        let Some(backtracking) = self.line_search else {
            return self.forward_backward(point, &gradient, self.step);
        };

        let f0 = self.objective.smooth_value(point)?;
        let mut step = self.step;
        for _ in 0..backtracking.max_steps {
            let z = self.forward_backward(point, &gradient, step)?;
            let d = z.sub(point)?;
            let fz = self.objective.smooth_value(&z)?;
            let bound = f0 + gradient.dot(&d)? + d.squared_norm() / (2.0 * step);
            if fz.is_finite() && fz <= bound {
                if step < self.step {
                    debug!("{}: step reduced to {:.3e}", self.name(), step);
                }
                self.step = step;
                return Ok(z);
            }
            step *= backtracking.beta;
        }
        Err(ReconError::ConvergenceFailure {
            what: format!("{} backtracking", self.name()),
            iterations: backtracking.max_steps,
        })
    }
}

impl Algorithm for ProximalGradient {
    fn name(&self) -> &'static str {
        if self.accelerated {
            "fista"
        } else {
            "ista"
        }
    }

    fn update(&mut self) -> Result<()> {
        if !self.accelerated {
            let x = self.x.clone();
            self.x = self.descend(&x)?;
            return Ok(());
        }
        let y = self.y.clone();
        let x_new = self.descend(&y)?;
        let t_new = 0.5 * (1.0 + (1.0 + 4.0 * self.t * self.t).sqrt());
        let momentum = (self.t - 1.0) / t_new;
        // y = x_new + momentum (x_new - x)
        self.y = x_new.sapyb(1.0 + momentum, &self.x, -momentum)?;
        self.x = x_new;
        self.t = t_new;
        Ok(())
    }

    fn solution(&self) -> &DataArray {
        &self.x
    }

    fn objective(&self) -> Result<f64> {
        self.objective.value(&self.x)
    }

    fn built_with(&self) -> Option<&SolverOptions> {
        Some(&self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{AxisLabel, Geometry};
    use crate::functions::{IndicatorBox, L1Norm, LeastSquares};
    use crate::operators::{IdentityOperator, MatrixOperator, Operator, TransmissionOperator};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::sync::Arc;

    fn lasso(accelerated: bool) -> (ProximalGradient, f64) {
        let a = MatrixOperator::from_matrix(array![[1.0, 0.5], [0.0, 1.0], [1.0, -1.0]]).unwrap();
        let domain = a.domain().clone();
        let b = DataArray::from_vec(a.range().clone(), vec![1.0, 2.0, -0.5]).unwrap();
        let ls = LeastSquares::new(Arc::new(a), b).unwrap();
        let obj = Objective::new(domain.clone())
            .smooth(Arc::new(ls))
            .unwrap()
            .proximable(Arc::new(L1Norm::new(0.1).unwrap()))
            .unwrap();
        let l = obj.smooth_lipschitz().unwrap();
        let options = SolverOptions {
            acceleration: accelerated,
            ..SolverOptions::default()
        };
        (ProximalGradient::new(obj, DataArray::zeros(&domain), &options).unwrap(), l)
    }

    #[test]
    fn default_steps_follow_the_variant() {
        let (ista, l) = lasso(false);
        assert_abs_diff_eq!(ista.step_size(), 0.99 * 2.0 / l);
        assert_eq!(ista.name(), "ista");
        let (fista, l) = lasso(true);
        assert_abs_diff_eq!(fista.step_size(), 1.0 / l);
        assert_eq!(fista.is_provably_convergent(), Ok(true));
    }

    #[test]
    fn ista_and_fista_reach_the_same_minimiser() {
        let (mut ista, _) = lasso(false);
        let (mut fista, _) = lasso(true);
        for _ in 0..2000 {
            ista.update().unwrap();
            fista.update().unwrap();
        }
        for (a, b) in ista.solution().to_vec().iter().zip(fista.solution().to_vec()) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn ista_bound_keeps_the_safety_factor() {
        let g = Geometry::vector(AxisLabel::Horizontal, 2).unwrap();
        let b = DataArray::from_vec(g.clone(), vec![1.0, 1.0]).unwrap();
        let ls = LeastSquares::new(Arc::new(IdentityOperator::new(g.clone())), b).unwrap();
        let obj = Objective::new(g.clone()).smooth(Arc::new(ls)).unwrap();
        let l = obj.smooth_lipschitz().unwrap();
        let ista = |step: f64| {
            let options = SolverOptions {
                initial_step: StepSize::Fixed(step),
                ..SolverOptions::default()
            };
            ProximalGradient::new(obj.clone(), DataArray::zeros(&g), &options).unwrap()
        };
        assert_eq!(ista(1.97 / l).is_provably_convergent(), Ok(true));
        assert_eq!(ista(1.995 / l).is_provably_convergent(), Ok(false));
    }

    #[test]
    fn backtracks_without_a_lipschitz_estimate() {
        let projector: Arc<dyn Operator> =
            Arc::new(MatrixOperator::from_matrix(array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]).unwrap());
        let domain = projector.domain().clone();
        let forward: Arc<dyn Operator> = Arc::new(TransmissionOperator::new(projector, 10.0).unwrap());
        let truth = DataArray::from_vec(domain.clone(), vec![0.5, 0.2]).unwrap();
        let counts = forward.apply(&truth).unwrap();
        let obj = Objective::new(domain.clone())
            .smooth(Arc::new(LeastSquares::new(forward, counts).unwrap()))
            .unwrap()
            .proximable(Arc::new(IndicatorBox::non_negative()))
            .unwrap();
        assert!(obj.smooth_lipschitz().is_none());

        let mut ista = ProximalGradient::new(obj, DataArray::zeros(&domain), &SolverOptions::default()).unwrap();
        assert!(ista.is_backtracking());
        assert_eq!(ista.step_size(), 1.0);
        let mut previous = ista.objective().unwrap();
        for _ in 0..20 {
            ista.update().unwrap();
            let current = ista.objective().unwrap();
            assert!(current <= previous + 1e-12, "objective increased: {previous} -> {current}");
            previous = current;
        }
        assert!(ista.step_size() < 1.0);
    }

    #[test]
    fn backtracking_excludes_a_preconditioner() {
        let (ista, _) = lasso(false);
        let g = ista.solution().geometry().clone();
        let p = Preconditioner::diagonal(DataArray::full(&g, 0.5)).unwrap();
        let ista = ista.with_backtracking(ArmijoBacktracking::default()).unwrap();
        assert!(ista.with_preconditioner(p).is_err());
    }

    #[test]
    fn oversized_step_is_not_provably_convergent() {
        let g = Geometry::vector(AxisLabel::Horizontal, 2).unwrap();
        let b = DataArray::from_vec(g.clone(), vec![1.0, 1.0]).unwrap();
        let ls = LeastSquares::new(Arc::new(IdentityOperator::new(g.clone())), b).unwrap();
        let obj = Objective::new(g.clone()).smooth(Arc::new(ls)).unwrap();
        let options = SolverOptions {
            initial_step: StepSize::Fixed(1.5),
            acceleration: true,
            ..SolverOptions::default()
        };
        let pg = ProximalGradient::new(obj, DataArray::zeros(&g), &options).unwrap();
        assert_eq!(pg.is_provably_convergent(), Ok(false));
    }

    #[test]
    fn projection_only_problem_uses_unit_step() {
        let g = Geometry::vector(AxisLabel::Horizontal, 3).unwrap();
        let obj = Objective::new(g.clone())
            .proximable(Arc::new(IndicatorBox::non_negative()))
            .unwrap();
        let x0 = DataArray::from_vec(g, vec![-1.0, 2.0, -3.0]).unwrap();
        let mut pg = ProximalGradient::new(obj, x0, &SolverOptions::default()).unwrap();
        assert_eq!(pg.step_size(), 1.0);
        pg.update().unwrap();
        assert_eq!(pg.solution().to_vec(), vec![0.0, 2.0, 0.0]);
    }

    #[test]
    fn dual_terms_are_rejected() {
        let g = Geometry::vector(AxisLabel::Horizontal, 2).unwrap();
        let id: Arc<dyn Operator> = Arc::new(IdentityOperator::new(g.clone()));
        let obj = Objective::new(g.clone())
            .dual(Arc::new(L1Norm::new(1.0).unwrap()), id)
            .unwrap();
        assert!(ProximalGradient::new(obj, DataArray::zeros(&g), &SolverOptions::default()).is_err());
    }
}
