//! Total variation with an FGP (fast gradient projection) proximal map.
//!
//! The proximal map of `w TV` at step `tau` is the denoising problem
//! `min_z 1/2 ||z - x||^2 + lambda TV(z)` with `lambda = w tau`. It is solved
//! on the dual variable `p` (one vector per pixel) with accelerated projected
//! gradient steps, see Beck & Teboulle, "Fast gradient-based algorithms for
//! constrained total variation image denoising and deblurring problems"
//! (2009). The inner loop is always capped by `TvOptions::max_iterations`.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::norms::L1Norm;
use super::{check_input, check_step, Function, MixedL21Norm};
use crate::array::{AxisLabel, DataArray, Geometry};
use crate::error::{ReconError, Result};
use crate::operators::{GradientOperator, Operator};

/// Inner sub-solver settings for [`TotalVariation::proximal`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TvOptions {
    pub max_iterations: usize,
    /// Relative change of the primal estimate below which the inner loop
    /// stops early. Zero always runs `max_iterations`.
    pub tolerance: f64,
    /// Pointwise Euclidean norm of the gradient (otherwise absolute values).
    pub isotropic: bool,
    /// Share one gradient norm across the `channel` axis.
    pub couple_channels: bool,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl Default for TvOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-6,
            isotropic: true,
            couple_channels: true,
            lower: None,
            upper: None,
        }
    }
}

// Dual steps are halved on a non-finite inner iterate at most this often.
const MAX_RESTARTS: usize = 3;

/// `w * || grad x ||_{2,1}` (or `||grad x||_1` when anisotropic).
#[derive(Clone, Debug)]
pub struct TotalVariation {
    weight: f64,
    options: TvOptions,
    gradient: GradientOperator,
    pointwise: MixedL21Norm,
}

impl TotalVariation {
    pub fn new(geometry: Geometry, weight: f64, options: TvOptions) -> Result<Self> {
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(ReconError::config("TV weight must be non-negative"));
        }
        if options.max_iterations == 0 {
            return Err(ReconError::config("TV inner solver needs max_iterations > 0"));
        }
        if !(options.tolerance.is_finite() && options.tolerance >= 0.0) {
            return Err(ReconError::config("TV tolerance must be non-negative"));
        }
        if let (Some(lo), Some(hi)) = (options.lower, options.upper) {
            if lo > hi {
                return Err(ReconError::config("TV box lower bound exceeds upper bound"));
            }
        }
        let pointwise = MixedL21Norm::new(1.0)?;
        let pointwise = if options.couple_channels && geometry.index_of(&AxisLabel::Channel).is_some() {
            pointwise.coupled_channels()
        } else {
            pointwise
        };
        Ok(Self {
            weight,
            options,
            gradient: GradientOperator::new(geometry)?,
            pointwise,
        })
    }

    pub fn with_voxel_sizes(self, sizes: Vec<f64>) -> Result<Self> {
        Ok(Self {
            gradient: self.gradient.with_voxel_sizes(sizes)?,
            ..self
        })
    }

    pub fn options(&self) -> &TvOptions {
        &self.options
    }

    fn project_box(&self, x: &DataArray) -> DataArray {
        let lo = self.options.lower.unwrap_or(f64::NEG_INFINITY);
        let hi = self.options.upper.unwrap_or(f64::INFINITY);
        if lo == f64::NEG_INFINITY && hi == f64::INFINITY {
            x.clone()
        } else {
            x.map(|v| v.clamp(lo, hi))
        }
    }

    /// Projection onto the dual unit ball (pointwise or elementwise).
    fn project_dual(&self, p: &DataArray) -> Result<DataArray> {
        if self.options.isotropic {
            self.pointwise.proximal_conjugate(p, 1.0)
        } else {
            L1Norm::new(1.0)?.proximal_conjugate(p, 1.0)
        }
    }

    fn fgp(&self, x: &DataArray, lambda: f64, dual_step: f64) -> Result<Option<DataArray>> {
        let mut p = DataArray::zeros(self.gradient.range());
        let mut r = p.clone();
        let mut t = 1.0_f64;
        let mut z = self.project_box(x);

        for k in 0..self.options.max_iterations {
            // z = P_C(x - lambda D^T r)
            let z_new = self.project_box(&x.sapyb(1.0, &self.gradient.adjoint(&r)?, -lambda)?);
            if !z_new.is_finite() {
                return Ok(None);
            }
            // p = P_P(r + D z / (lambda ||D||^2))
            let ascent = self.gradient.apply(&z_new)?;
            let p_new = self.project_dual(&r.sapyb(1.0, &ascent, dual_step)?)?;

            let t_new = 0.5 * (1.0 + (1.0 + 4.0 * t * t).sqrt());
            r = p_new.sapyb(1.0 + (t - 1.0) / t_new, &p, -(t - 1.0) / t_new)?;

            let change = z_new.sub(&z)?.norm();
            let scale = z_new.norm().max(f64::MIN_POSITIVE);
            p = p_new;
            t = t_new;
            z = z_new;
            if self.options.tolerance > 0.0 && k > 0 && change <= self.options.tolerance * scale {
                debug!("TotalVariation: FGP stopped after {} iterations", k + 1);
                break;
            }
        }
        Ok(Some(z))
    }
}

impl Function for TotalVariation {
    fn name(&self) -> &str {
        "TotalVariation"
    }

    fn domain(&self) -> Option<&Geometry> {
        Some(self.gradient.domain())
    }

    fn value(&self, x: &DataArray) -> Result<f64> {
        check_input(self, x)?;
        let g = self.gradient.apply(x)?;
        let tv = if self.options.isotropic {
            self.pointwise.value(&g)?
        } else {
            g.data().iter().map(|v| v.abs()).sum()
        };
        Ok(self.weight * tv)
    }

    fn proximal(&self, x: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        check_input(self, x)?;
        let lambda = self.weight * step;
        if lambda == 0.0 {
            return Ok(self.project_box(x));
        }
        let norm = self.gradient.norm()?;
        let mut dual_step = 1.0 / (lambda * norm * norm);
        for attempt in 0..=MAX_RESTARTS {
            if let Some(z) = self.fgp(x, lambda, dual_step)? {
                return Ok(z);
            }
            warn!(
                "TotalVariation: non-finite inner iterate, restarting with smaller dual step (attempt {})",
                attempt + 1
            );
            dual_step *= 0.5;
        }
        Err(ReconError::ConvergenceFailure {
            what: "TotalVariation proximal sub-solver".to_string(),
            iterations: self.options.max_iterations * (MAX_RESTARTS + 1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn image(ny: usize, nx: usize) -> Geometry {
        Geometry::new([(AxisLabel::HorizontalY, ny), (AxisLabel::HorizontalX, nx)]).unwrap()
    }

    #[test]
    fn value_of_a_step_edge() {
        let g = image(2, 4);
        let tv = TotalVariation::new(g.clone(), 2.0, TvOptions::default()).unwrap();
        let x = DataArray::from_vec(g, vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]).unwrap();
        // one unit jump per row
        assert_abs_diff_eq!(tv.value(&x).unwrap(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn prox_of_a_constant_image_is_the_image() {
        let g = image(4, 4);
        let tv = TotalVariation::new(g.clone(), 1.0, TvOptions::default()).unwrap();
        let x = DataArray::full(&g, 3.0);
        let z = tv.proximal(&x, 0.5).unwrap();
        for v in z.to_vec() {
            assert_abs_diff_eq!(v, 3.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn prox_decreases_the_prox_objective() {
        let g = image(6, 6);
        let tv = TotalVariation::new(
            g.clone(),
            0.3,
            TvOptions {
                max_iterations: 200,
                ..TvOptions::default()
            },
        )
        .unwrap();
        let values: Vec<f64> = (0..36).map(|i| ((i * 7919) % 13) as f64 / 13.0).collect();
        let x = DataArray::from_vec(g, values).unwrap();
        let tau = 1.0;
        let z = tv.proximal(&x, tau).unwrap();
        let objective = |u: &DataArray| tv.value(u).unwrap() + u.sub(&x).unwrap().squared_norm() / (2.0 * tau);
        assert!(objective(&z) < objective(&x));
        // the mean is preserved by TV denoising without constraints
        assert_abs_diff_eq!(z.sum(), x.sum(), epsilon = 1e-8);
    }

    #[test]
    fn box_constraint_is_respected() {
        let g = image(3, 3);
        let opts = TvOptions {
            lower: Some(0.0),
            upper: Some(0.5),
            ..TvOptions::default()
        };
        let tv = TotalVariation::new(g.clone(), 0.1, opts).unwrap();
        let x = DataArray::from_vec(g, vec![-1.0, 0.2, 0.9, 0.4, 2.0, 0.1, 0.0, 0.3, 0.6]).unwrap();
        let z = tv.proximal(&x, 1.0).unwrap();
        assert!(z.to_vec().iter().all(|v| *v >= 0.0 && *v <= 0.5));
    }

    #[test]
    fn restarts_are_bounded_before_failing() {
        let g = image(3, 3);
        let tv = TotalVariation::new(
            g.clone(),
            1.0,
            TvOptions {
                max_iterations: 5,
                ..TvOptions::default()
            },
        )
        .unwrap();
        let mut x = DataArray::full(&g, 1.0);
        x.data_mut()[[1, 1]] = f64::NAN;
        let err = tv.proximal(&x, 1.0).unwrap_err();
        assert!(matches!(
            err,
            ReconError::ConvergenceFailure { iterations: 20, .. }
        ));
    }

    #[test]
    fn tv_is_not_smooth() {
        let g = image(2, 2);
        let tv = TotalVariation::new(g.clone(), 1.0, TvOptions::default()).unwrap();
        assert!(tv.gradient(&DataArray::zeros(&g)).is_err());
    }
}
