use std::sync::Arc;

use log::{info, warn};

use super::{Algorithm, SolverOptions, StepSize};
use crate::array::DataArray;
use crate::error::{ReconError, Result};
use crate::functions::{check_step, BlockFunction, Function, ZeroFunction};
use crate::operators::{BlockOperator, Operator};
use crate::sampler::Sampler;

/// Step-size configuration for [`Spdhg`].
///
/// Any of `sigma` / `tau` left as `None` is derived from the other (or both
/// from `gamma` and `rho`) so that `sigma_i tau ||K_i||^2 <= rho p_i`.
#[derive(Clone, Debug, PartialEq)]
pub struct SpdhgSteps {
    pub sigma: Option<Vec<f64>>,
    pub tau: Option<f64>,
    /// Trade-off between primal and dual steps.
    pub gamma: f64,
    pub rho: f64,
}

impl Default for SpdhgSteps {
    fn default() -> Self {
        Self {
            sigma: None,
            tau: None,
            gamma: 1.0,
            rho: 0.99,
        }
    }
}

/// Stochastic PDHG for `min_x sum_i f_i(K_i x) + g(x)`.
///
/// Every iteration updates the dual variable of one subset `i`, drawn from a
/// [`Sampler`], and corrects the primal extrapolation by `1/p_i` of the
/// back-projected change.
#[derive(Debug)]
pub struct Spdhg {
    operator: BlockOperator,
    f: BlockFunction,
    g: Arc<dyn Function>,
    sampler: Sampler,
    prob: Vec<f64>,
    sigma: Vec<f64>,
    tau: f64,
    theta: f64,
    x: DataArray,
    y: Vec<DataArray>,
    z: DataArray,
    z_bar: DataArray,
    options: SolverOptions,
}

impl Spdhg {
    /// `g = None` stands for the zero function.
    pub fn new(
        operator: BlockOperator,
        f: BlockFunction,
        g: Option<Arc<dyn Function>>,
        x0: DataArray,
        sampler: Sampler,
        steps: SpdhgSteps,
        options: &SolverOptions,
    ) -> Result<Self> {
        options.validate()?;
        options.reject_acceleration("SPDHG")?;
        if let StepSize::Fixed(_) = options.initial_step {
            return Err(ReconError::config("SPDHG takes its steps from SpdhgSteps, initial_step must be auto"));
        }
        let n = operator.len();
        if f.len() != n {
            return Err(ReconError::shape("SPDHG: functions per operator", n, f.len()));
        }
        for (k, part) in operator.layout().parts().iter().enumerate() {
            if let Some(d) = f.part(k).and_then(|fk| fk.domain()) {
                d.ensure_matches(part, "SPDHG: function vs operator range")?;
            }
        }
        if sampler.num_subsets() != n {
            return Err(ReconError::InvalidSampler(format!(
                "sampler draws from {} subsets but there are {n} operators",
                sampler.num_subsets()
            )));
        }
        x0.ensure_geometry(operator.domain(), "SPDHG initial iterate")?;

        let prob = sampler.prob_weights();
        let norms = operator.part_norms()?;
        let (sigma, tau) = step_sizes(&steps, &prob, &norms)?;
        for i in 0..n {
            let product = sigma[i] * tau * norms[i] * norms[i];
            if product > prob[i] * (1.0 + 1e-10) {
                return Err(ReconError::UnstableStepSizes {
                    detail: format!(
                        "subset {i}: sigma * tau * ||K_i||^2 = {product:.6} exceeds p_i = {:.6}",
                        prob[i]
                    ),
                });
            }
        }

        let y = operator
            .layout()
            .parts()
            .iter()
            .map(DataArray::zeros)
            .collect();
        let z = DataArray::zeros(operator.domain());
        info!(
            "SPDHG configured with {n} subsets ({} sampling), tau {tau:.6e}",
            sampler.kind()
        );
        Ok(Self {
            g: g.unwrap_or_else(|| Arc::new(ZeroFunction)),
            z_bar: z.clone(),
            z,
            y,
            x: x0,
            operator,
            f,
            sampler,
            prob,
            sigma,
            tau,
            theta: 1.0,
            options: *options,
        })
    }

    pub fn sigma(&self) -> &[f64] {
        &self.sigma
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn prob_weights(&self) -> &[f64] {
        &self.prob
    }
}

fn step_sizes(steps: &SpdhgSteps, prob: &[f64], norms: &[f64]) -> Result<(Vec<f64>, f64)> {
    let (gamma, rho) = (steps.gamma, steps.rho);
    if !(gamma.is_finite() && gamma > 0.0 && rho.is_finite() && rho > 0.0) {
        return Err(ReconError::config("SPDHG gamma and rho must be positive"));
    }
    if norms.iter().any(|&n| n <= 0.0) {
        return Err(ReconError::config("SPDHG operators must have positive norms"));
    }
    let sigma = match (&steps.sigma, steps.tau) {
        (Some(sigma), _) => {
            if sigma.len() != norms.len() {
                return Err(ReconError::shape("SPDHG sigma", norms.len(), sigma.len()));
            }
            for &s in sigma {
                check_step(s)?;
            }
            sigma.clone()
        }
        (None, None) => norms.iter().map(|n| gamma * rho / n).collect(),
        (None, Some(tau)) => {
            check_step(tau)?;
            norms
                .iter()
                .zip(prob)
                .map(|(n, p)| gamma * rho * p / (tau * n * n))
                .collect()
        }
    };
    let tau = match steps.tau {
        Some(tau) => {
            check_step(tau)?;
            tau
        }
        None => {
            let tau = prob
                .iter()
                .zip(norms)
                .zip(&sigma)
                .map(|((p, n), s)| p / (s * n * n))
                .filter(|v| *v > 1e-8)
                .fold(f64::INFINITY, f64::min);
            if !tau.is_finite() {
                return Err(ReconError::config("SPDHG: every subset has zero probability"));
            }
            tau * rho / gamma
        }
    };
    Ok((sigma, tau))
}

impl Algorithm for Spdhg {
    fn name(&self) -> &'static str {
        "spdhg"
    }

    fn update(&mut self) -> Result<()> {
        // x = prox_{tau g}(x - tau z_bar)
        let descent = self.x.sapyb(1.0, &self.z_bar, -self.tau)?;
        self.x = self.g.proximal(&descent, self.tau)?;

        let i = self.sampler.next_index();
        let (Some(op), Some(fi)) = (self.operator.get(i), self.f.part(i)) else {
            return Err(ReconError::InvalidSampler(format!("sampled subset {i} does not exist")));
        };
        let sigma = self.sigma[i];

        // y_i = prox_{sigma_i f_i*}(y_i + sigma_i K_i x)
        let ascent = self.y[i].sapyb(1.0, &op.apply(&self.x)?, sigma)?;
        let y_new = fi.proximal_conjugate(&ascent, sigma)?;

        // back-project the dual change and extrapolate
        let delta = op.adjoint(&y_new.sub(&self.y[i])?)?;
        self.z.add_scaled(1.0, &delta)?;
        self.z_bar = self.z.sapyb(1.0, &delta, self.theta / self.prob[i])?;
        self.y[i] = y_new;
        Ok(())
    }

    fn solution(&self) -> &DataArray {
        &self.x
    }

    fn objective(&self) -> Result<f64> {
        let kx = self.operator.apply(&self.x)?;
        Ok(self.f.value(&kx)? + self.g.value(&self.x)?)
    }

    /// `-sum_i f_i*(y_i) - g*(-sum_i K_i* y_i)`
    fn dual_objective(&self) -> Result<Option<f64>> {
        let y = self.operator.layout().concat(&self.y)?;
        let fc = match self.f.convex_conjugate(&y) {
            Ok(v) => v,
            Err(ReconError::NotImplemented { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let kty = self.operator.adjoint(&y)?.scaled(-1.0);
        match self.g.convex_conjugate(&kty) {
            Ok(gc) => Ok(Some(-fc - gc)),
            Err(ReconError::NotImplemented { .. }) => {
                warn!("SPDHG: no conjugate for {}, dual objective unavailable", self.g.name());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn built_with(&self) -> Option<&SolverOptions> {
        Some(&self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{AxisLabel, Geometry};
    use crate::functions::{IndicatorBox, L2NormSquared};
    use crate::operators::MatrixOperator;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn rows() -> (BlockOperator, BlockFunction, Geometry) {
        let domain = Geometry::vector(AxisLabel::Custom("voxel".to_string()), 2).unwrap();
        let a1 = MatrixOperator::new(
            array![[1.0, 1.0]],
            domain.clone(),
            Geometry::vector(AxisLabel::Angle, 1).unwrap(),
        )
        .unwrap();
        let a2 = MatrixOperator::new(
            array![[1.0, -1.0], [2.0, 0.0]],
            domain.clone(),
            Geometry::vector(AxisLabel::Angle, 2).unwrap(),
        )
        .unwrap();
        let op = BlockOperator::new(vec![Arc::new(a1), Arc::new(a2)]).unwrap();
        let parts = op.layout().parts().to_vec();
        let b1 = DataArray::from_vec(parts[0].clone(), vec![3.0]).unwrap();
        let b2 = DataArray::from_vec(parts[1].clone(), vec![-1.0, 2.0]).unwrap();
        let f = BlockFunction::new(
            vec![
                Arc::new(L2NormSquared::new(0.5).unwrap().with_data(b1)),
                Arc::new(L2NormSquared::new(0.5).unwrap().with_data(b2)),
            ],
            op.layout().clone(),
        )
        .unwrap();
        (op, f, domain)
    }

    #[test]
    fn default_steps_satisfy_the_subset_condition() {
        let (op, f, domain) = rows();
        let norms = op.part_norms().unwrap();
        let sampler = Sampler::random_with_replacement(2, None, Some(1)).unwrap();
        let spdhg = Spdhg::new(
            op,
            f,
            None,
            DataArray::zeros(&domain),
            sampler,
            SpdhgSteps::default(),
            &SolverOptions::default(),
        )
        .unwrap();
        for i in 0..2 {
            assert_abs_diff_eq!(spdhg.sigma()[i], 0.99 / norms[i], epsilon = 1e-12);
            assert!(spdhg.sigma()[i] * spdhg.tau() * norms[i] * norms[i] <= 0.5);
        }
    }

    #[test]
    fn solves_a_consistent_system() {
        let (op, f, domain) = rows();
        let sampler = Sampler::sequential(2).unwrap();
        let mut spdhg = Spdhg::new(
            op,
            f,
            Some(Arc::new(IndicatorBox::new(-10.0, 10.0).unwrap())),
            DataArray::zeros(&domain),
            sampler,
            SpdhgSteps::default(),
            &SolverOptions::default(),
        )
        .unwrap();
        for _ in 0..4000 {
            spdhg.update().unwrap();
        }
        // x1 + x2 = 3, x1 - x2 = -1, 2 x1 = 2
        let x = spdhg.solution().to_vec();
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(x[1], 2.0, epsilon = 1e-4);
        assert!(spdhg.objective().unwrap() < 1e-7);
    }

    #[test]
    fn explicit_steps_are_checked_per_subset() {
        let (op, f, domain) = rows();
        let sampler = Sampler::sequential(2).unwrap();
        let steps = SpdhgSteps {
            sigma: Some(vec![1.0, 1.0]),
            tau: Some(1.0),
            ..SpdhgSteps::default()
        };
        let err = Spdhg::new(op, f, None, DataArray::zeros(&domain), sampler, steps, &SolverOptions::default())
            .unwrap_err();
        assert!(matches!(err, ReconError::UnstableStepSizes { .. }));
    }

    #[test]
    fn fixed_initial_step_is_rejected() {
        let (op, f, domain) = rows();
        let options = SolverOptions {
            initial_step: StepSize::Fixed(0.1),
            ..SolverOptions::default()
        };
        assert!(matches!(
            Spdhg::new(op, f, None, DataArray::zeros(&domain), Sampler::sequential(2).unwrap(), SpdhgSteps::default(), &options),
            Err(ReconError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn sampler_must_match_the_number_of_subsets() {
        let (op, f, domain) = rows();
        let sampler = Sampler::sequential(3).unwrap();
        assert!(matches!(
            Spdhg::new(op, f, None, DataArray::zeros(&domain), sampler, SpdhgSteps::default(), &SolverOptions::default()),
            Err(ReconError::InvalidSampler(_))
        ));
    }
}
