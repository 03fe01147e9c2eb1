use std::sync::Arc;

use log::info;

use super::{Algorithm, SolverOptions, StepSize};
use crate::array::DataArray;
use crate::error::{ReconError, Result};
use crate::functions::{check_step, Function, ZeroFunction};
use crate::objective::Objective;
use crate::operators::Operator;

// Relative slack on tau sigma ||K||^2 <= 1 for rounding in the norm estimate.
const STEP_SLACK: f64 = 1e-10;

/// Primal-dual hybrid gradient (Chambolle-Pock) for `min_x f(K x) + g(x)`.
///
/// `f(K x)` is the objective's dual term and `g` its proximable term (zero
/// when absent). Each iteration takes a proximal step on the conjugate of `f`
/// and on `g`, then over-relaxes with `theta = 1`.
#[derive(Debug)]
pub struct Pdhg {
    objective: Objective,
    operator: Arc<dyn Operator>,
    f: Arc<dyn Function>,
    g: Arc<dyn Function>,
    x: DataArray,
    x_bar: DataArray,
    y: DataArray,
    tau: f64,
    sigma: f64,
    theta: f64,
    options: SolverOptions,
}

impl Pdhg {
    /// Default steps: `sigma = tau = 1/||K||`, or with a fixed initial step
    /// `tau`, `sigma = 1/(tau ||K||^2)`.
    pub fn new(objective: Objective, x0: DataArray, options: &SolverOptions) -> Result<Self> {
        options.validate()?;
        let norm = dual_operator(&objective)?.norm()?;
        if norm == 0.0 {
            return Err(ReconError::config("PDHG operator has zero norm"));
        }
        let (tau, sigma) = match options.initial_step {
            StepSize::Auto => (1.0 / norm, 1.0 / norm),
            StepSize::Fixed(tau) => (tau, 1.0 / (tau * norm * norm)),
        };
        Self::build(objective, x0, options, tau, sigma, norm)
    }

    /// Explicit primal (`tau`) and dual (`sigma`) steps.
    ///
    /// Fails with [`ReconError::UnstableStepSizes`] unless
    /// `tau sigma ||K||^2 <= 1`.
    pub fn with_step_sizes(
        objective: Objective,
        x0: DataArray,
        options: &SolverOptions,
        tau: f64,
        sigma: f64,
    ) -> Result<Self> {
        options.validate()?;
        let norm = dual_operator(&objective)?.norm()?;
        Self::build(objective, x0, options, tau, sigma, norm)
    }

    fn build(
        objective: Objective,
        x0: DataArray,
        options: &SolverOptions,
        tau: f64,
        sigma: f64,
        norm: f64,
    ) -> Result<Self> {
        options.reject_acceleration("PDHG")?;
        check_step(tau)?;
        check_step(sigma)?;
        x0.ensure_geometry(objective.domain(), "PDHG initial iterate")?;
        if let Some(t) = objective.smooth_terms().next() {
            return Err(ReconError::config(format!(
                "PDHG takes no smooth terms, move {} into the dual term",
                t.function().name()
            )));
        }
        let product = tau * sigma * norm * norm;
        if product > 1.0 + STEP_SLACK {
            return Err(ReconError::UnstableStepSizes {
                detail: format!(
                    "tau * sigma * ||K||^2 = {tau} * {sigma} * {norm}^2 = {product:.6} > 1"
                ),
            });
        }

        let operator = dual_operator(&objective)?;
        let (f, g) = {
            let dual = objective.dual_term().ok_or_else(|| ReconError::config("PDHG needs a dual term"))?;
            let g = match objective.proximable_term() {
                Some(t) => t.weighted_function()?,
                None => Arc::new(ZeroFunction) as Arc<dyn Function>,
            };
            (dual.weighted_function()?, g)
        };
        let y = DataArray::zeros(operator.range());
        info!("PDHG configured with tau {tau:.6e}, sigma {sigma:.6e}, ||K|| {norm:.6e}");
        Ok(Self {
            objective,
            operator,
            f,
            g,
            x_bar: x0.clone(),
            x: x0,
            y,
            tau,
            sigma,
            theta: 1.0,
            options: *options,
        })
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn dual(&self) -> &DataArray {
        &self.y
    }

    /// `primal - dual`, when the dual objective is available.
    pub fn primal_dual_gap(&self) -> Result<Option<f64>> {
        let primal = self.objective()?;
        Ok(self.dual_objective()?.map(|d| primal - d))
    }
}

fn dual_operator(objective: &Objective) -> Result<Arc<dyn Operator>> {
    let term = objective
        .dual_term()
        .ok_or_else(|| ReconError::config("PDHG needs a dual term f(K x)"))?;
    let op = term.operator_or_identity(objective.domain());
    if !op.is_linear() {
        return Err(ReconError::NotLinear {
            operator: op.name().to_string(),
        });
    }
    Ok(op)
}

/// `Ok(None)` for conjugates that are not implemented.
fn conjugate_or_none(f: &dyn Function, y: &DataArray) -> Result<Option<f64>> {
    match f.convex_conjugate(y) {
        Ok(v) => Ok(Some(v)),
        Err(ReconError::NotImplemented { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

impl Algorithm for Pdhg {
    fn name(&self) -> &'static str {
        "pdhg"
    }

    fn update(&mut self) -> Result<()> {
        // y = prox_{sigma f*}(y + sigma K x_bar)
        let ascent = self.y.sapyb(1.0, &self.operator.apply(&self.x_bar)?, self.sigma)?;
        self.y = self.f.proximal_conjugate(&ascent, self.sigma)?;

        // x = prox_{tau g}(x - tau K* y)
        let descent = self.x.sapyb(1.0, &self.operator.adjoint(&self.y)?, -self.tau)?;
        let x_new = self.g.proximal(&descent, self.tau)?;

        self.x_bar = x_new.sapyb(1.0 + self.theta, &self.x, -self.theta)?;
        self.x = x_new;
        Ok(())
    }

    fn solution(&self) -> &DataArray {
        &self.x
    }

    fn objective(&self) -> Result<f64> {
        self.objective.value(&self.x)
    }

    /// `-f*(y) - g*(-K* y)`
    fn dual_objective(&self) -> Result<Option<f64>> {
        let Some(fc) = conjugate_or_none(self.f.as_ref(), &self.y)? else {
            return Ok(None);
        };
        let kty = self.operator.adjoint(&self.y)?.scaled(-1.0);
        let Some(gc) = conjugate_or_none(self.g.as_ref(), &kty)? else {
            return Ok(None);
        };
        Ok(Some(-fc - gc))
    }

    fn built_with(&self) -> Option<&SolverOptions> {
        Some(&self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{AxisLabel, Geometry};
    use crate::functions::{L1Norm, L2NormSquared};
    use crate::objective::Term;
    use crate::operators::{IdentityOperator, ScaledOperator};
    use approx::assert_abs_diff_eq;

    fn denoising(b: Vec<f64>) -> (Objective, Geometry) {
        let g = Geometry::vector(AxisLabel::Horizontal, b.len()).unwrap();
        let data = DataArray::from_vec(g.clone(), b).unwrap();
        let fidelity = L2NormSquared::new(0.5).unwrap().with_data(data);
        let id: Arc<dyn Operator> = Arc::new(IdentityOperator::new(g.clone()));
        let obj = Objective::new(g.clone())
            .dual(Arc::new(fidelity), id)
            .unwrap()
            .proximable(Arc::new(L1Norm::new(1.0).unwrap()))
            .unwrap();
        (obj, g)
    }

    #[test]
    fn converges_to_soft_thresholding_with_vanishing_gap() {
        let (obj, g) = denoising(vec![3.0, 0.5, -2.0]);
        let mut pdhg = Pdhg::new(obj, DataArray::zeros(&g), &SolverOptions::default()).unwrap();
        for _ in 0..300 {
            pdhg.update().unwrap();
        }
        let x = pdhg.solution().to_vec();
        for (v, expected) in x.iter().zip([2.0, 0.0, -1.0]) {
            assert_abs_diff_eq!(*v, expected, epsilon = 1e-6);
        }
        assert!(pdhg.primal_dual_gap().unwrap().unwrap().abs() < 1e-6);
    }

    #[test]
    fn unstable_steps_are_rejected_at_construction() {
        let g = Geometry::vector(AxisLabel::Horizontal, 3).unwrap();
        let k: Arc<dyn Operator> =
            Arc::new(ScaledOperator::new(Arc::new(IdentityOperator::new(g.clone())), 2.0).unwrap());
        let obj = Objective::new(g.clone())
            .dual(Arc::new(L1Norm::new(1.0).unwrap()), k)
            .unwrap();
        let err = Pdhg::with_step_sizes(obj, DataArray::zeros(&g), &SolverOptions::default(), 1.0, 1.0)
            .unwrap_err();
        assert!(matches!(err, ReconError::UnstableStepSizes { .. }));
    }

    #[test]
    fn default_steps_satisfy_the_bound() {
        let g = Geometry::vector(AxisLabel::Horizontal, 2).unwrap();
        let k: Arc<dyn Operator> =
            Arc::new(ScaledOperator::new(Arc::new(IdentityOperator::new(g.clone())), 4.0).unwrap());
        let obj = Objective::new(g.clone())
            .dual(Arc::new(L1Norm::new(1.0).unwrap()), k)
            .unwrap();
        let pdhg = Pdhg::new(obj, DataArray::zeros(&g), &SolverOptions::default()).unwrap();
        assert_abs_diff_eq!(pdhg.tau(), 0.25);
        assert_abs_diff_eq!(pdhg.sigma() * pdhg.tau() * 16.0, 1.0);
    }

    #[test]
    fn requires_a_dual_term_and_no_smooth_terms() {
        let g = Geometry::vector(AxisLabel::Horizontal, 2).unwrap();
        let only_prox = Objective::new(g.clone())
            .proximable(Arc::new(L1Norm::new(1.0).unwrap()))
            .unwrap();
        assert!(Pdhg::new(only_prox, DataArray::zeros(&g), &SolverOptions::default()).is_err());

        let (obj, g) = denoising(vec![1.0, 1.0]);
        let obj = obj
            .with_term(Term::smooth(Arc::new(L2NormSquared::new(1.0).unwrap())))
            .unwrap();
        assert!(matches!(
            Pdhg::new(obj, DataArray::zeros(&g), &SolverOptions::default()),
            Err(ReconError::InvalidConfiguration(_))
        ));
    }
}
