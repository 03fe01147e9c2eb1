use std::sync::Arc;

use log::{debug, info};

use super::{Algorithm, SolverOptions, StepSize};
use crate::array::DataArray;
use crate::error::{ReconError, Result};
use crate::operators::Operator;
use crate::stopping::StoppingCriterion;

/// Conjugate gradient on the normal equations `A* A x = A* b`.
///
/// Only `apply` and `adjoint` of `A` are used. `SolverOptions::tolerance`
/// is the relative residual `||A* r_k|| / ||A* r_0||` to stop at.
#[derive(Debug)]
pub struct Cgls {
    operator: Arc<dyn Operator>,
    data: DataArray,
    x: DataArray,
    r: DataArray,
    p: DataArray,
    gamma: f64,
    norm_s: f64,
    norm_s0: f64,
    options: SolverOptions,
}

impl Cgls {
    pub fn new(operator: Arc<dyn Operator>, data: DataArray, x0: DataArray, options: &SolverOptions) -> Result<Self> {
        options.validate()?;
        options.reject_acceleration("CGLS")?;
        if let StepSize::Fixed(_) = options.initial_step {
            return Err(ReconError::config("CGLS chooses its own steps, initial_step must be auto"));
        }
        if !operator.is_linear() {
            return Err(ReconError::NotLinear {
                operator: operator.name().to_string(),
            });
        }
        data.ensure_geometry(operator.range(), "CGLS data")?;
        x0.ensure_geometry(operator.domain(), "CGLS initial iterate")?;

        let r = data.sub(&operator.apply(&x0)?)?;
        let s = operator.adjoint(&r)?;
        let norm_s = s.norm();
        info!("CGLS set up, ||A* r0|| = {norm_s:.6e}");
        Ok(Self {
            operator,
            data,
            x: x0,
            r,
            p: s,
            gamma: norm_s * norm_s,
            norm_s,
            norm_s0: norm_s,
            options: *options,
        })
    }

    /// Current residual `b - A x`.
    pub fn residual(&self) -> &DataArray {
        &self.r
    }

    pub fn data(&self) -> &DataArray {
        &self.data
    }
}

impl Algorithm for Cgls {
    fn name(&self) -> &'static str {
        "cgls"
    }

    fn update(&mut self) -> Result<()> {
        let q = self.operator.apply(&self.p)?;
        let delta = q.squared_norm();
        if delta == 0.0 || self.gamma == 0.0 {
            debug!("CGLS: search direction vanished, iterate is stationary");
            return Ok(());
        }
        let alpha = self.gamma / delta;
        self.x.add_scaled(alpha, &self.p)?;
        self.r.add_scaled(-alpha, &q)?;

        let s = self.operator.adjoint(&self.r)?;
        self.norm_s = s.norm();
        let gamma_new = self.norm_s * self.norm_s;
        let beta = gamma_new / self.gamma;
        self.gamma = gamma_new;
        self.p = s.sapyb(1.0, &self.p, beta)?;
        Ok(())
    }

    fn solution(&self) -> &DataArray {
        &self.x
    }

    /// `1/2 ||A x - b||^2` from the recursively updated residual.
    fn objective(&self) -> Result<f64> {
        Ok(0.5 * self.r.squared_norm())
    }

    fn residual_norm(&self) -> Option<f64> {
        if self.norm_s0 == 0.0 {
            return Some(0.0);
        }
        Some(self.norm_s / self.norm_s0)
    }

    fn built_with(&self) -> Option<&SolverOptions> {
        Some(&self.options)
    }

    fn criteria(&self, options: &SolverOptions) -> Vec<StoppingCriterion> {
        let mut criteria = vec![StoppingCriterion::MaxIterations(options.max_iterations)];
        if options.tolerance > 0.0 {
            criteria.push(StoppingCriterion::ResidualTolerance(options.tolerance));
        }
        if let Some(tol) = options.iterate_tolerance {
            criteria.push(StoppingCriterion::IterateTolerance(tol));
        }
        criteria
    }
}
