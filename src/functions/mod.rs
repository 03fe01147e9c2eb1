//! Scalar objective terms: values, gradients and proximal maps.

mod combinators;
mod indicator;
mod kullback_leibler;
mod least_squares;
mod norms;
mod total_variation;

use std::fmt;

use crate::array::{DataArray, Geometry};
use crate::error::{ReconError, Result};

pub use combinators::{BlockFunction, ScaledFunction, SumFunction};
pub use indicator::{IndicatorBox, ZeroFunction};
pub use kullback_leibler::KullbackLeibler;
pub use least_squares::LeastSquares;
pub use norms::{L1Norm, L2NormSquared, MixedL21Norm};
pub use total_variation::{TotalVariation, TvOptions};

/// A convex (or at least proper, lower semicontinuous) objective term.
///
/// `value` may be `+inf` to encode a hard constraint. `gradient` is only
/// available for smooth functions, `proximal` only where a closed form or a
/// bounded sub-solver exists; the defaults report the missing capability.
pub trait Function: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Geometry the function is bound to, `None` if it accepts any.
    fn domain(&self) -> Option<&Geometry> {
        None
    }

    fn value(&self, x: &DataArray) -> Result<f64>;

    fn is_differentiable(&self) -> bool {
        false
    }

    fn gradient(&self, _x: &DataArray) -> Result<DataArray> {
        Err(ReconError::NotDifferentiable {
            function: self.name().to_string(),
        })
    }

    /// Lipschitz constant of the gradient.
    fn lipschitz(&self) -> Option<f64> {
        None
    }

    /// `argmin_z f(z) + ||z - x||^2 / (2 step)`
    fn proximal(&self, _x: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        Err(ReconError::NotProximable {
            function: self.name().to_string(),
        })
    }

    fn convex_conjugate(&self, _x: &DataArray) -> Result<f64> {
        Err(ReconError::NotImplemented {
            what: "convex conjugate",
            target: self.name().to_string(),
        })
    }

    /// Proximal map of `step * f*`.
    ///
    /// Defaults to the Moreau identity
    /// `prox_{s f*}(x) = x - s prox_{f/s}(x/s)`.
    fn proximal_conjugate(&self, x: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        let p = self.proximal(&x.scaled(1.0 / step), 1.0 / step)?;
        x.sapyb(1.0, &p, -step)
    }
}

/// Reject non-positive or non-finite step sizes.
pub fn check_step(step: f64) -> Result<()> {
    if step.is_finite() && step > 0.0 {
        Ok(())
    } else {
        Err(ReconError::InvalidStep { step })
    }
}

pub(crate) fn check_input<F: Function + ?Sized>(f: &F, x: &DataArray) -> Result<()> {
    match f.domain() {
        Some(g) => x.ensure_geometry(g, f.name()),
        None => Ok(()),
    }
}

fn check_reference(b: Option<&DataArray>, x: &DataArray, name: &str) -> Result<()> {
    match b {
        Some(b) => x.ensure_geometry(b.geometry(), name),
        None => Ok(()),
    }
}

/// `x - b`, or `x` when there is no reference.
fn shifted(x: &DataArray, b: Option<&DataArray>) -> Result<DataArray> {
    match b {
        Some(b) => x.sub(b),
        None => Ok(x.clone()),
    }
}
