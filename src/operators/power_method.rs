use log::{debug, warn};
use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::Operator;
use crate::array::{DataArray, Geometry};
use crate::error::{ReconError, Result};

/// Settings for the power iteration on `A* A`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerMethod {
    pub max_iterations: usize,
    /// Relative change of the eigenvalue estimate that counts as stable.
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for PowerMethod {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-5,
            seed: 5,
        }
    }
}

pub(crate) fn random_array(geometry: &Geometry, rng: &mut StdRng) -> DataArray {
    let data = ArrayD::random_using(IxDyn(&geometry.shape()), Uniform::new(-1.0, 1.0), rng);
    // shape comes from the geometry
    DataArray::from_array(geometry.clone(), data).unwrap_or_else(|_| DataArray::zeros(geometry))
}

/// Estimate `||A||` as the square root of the dominant eigenvalue of `A* A`.
///
/// Power iteration approaches the eigenvalue from below, so the stable
/// value is inflated by `method.tolerance` before the square root.
///
/// Fails with [`ReconError::ConvergenceFailure`] if the estimate has not
/// stabilised after `method.max_iterations` steps; callers may then supply
/// a bound of their own.
pub fn estimate_norm<O: Operator + ?Sized>(op: &O, method: &PowerMethod) -> Result<f64> {
    if !op.is_linear() {
        return Err(ReconError::NotLinear {
            operator: op.name().to_string(),
        });
    }
    let mut rng = StdRng::seed_from_u64(method.seed);
    let mut x = random_array(op.domain(), &mut rng);
    let n0 = x.norm();
    if n0 == 0.0 {
        return Ok(0.0);
    }
    x.scale(1.0 / n0);

    let mut previous = 0.0;
    for k in 0..method.max_iterations {
        let y = op.adjoint(&op.apply(&x)?)?;
        let eigen = y.norm();
        if !eigen.is_finite() {
            break;
        }
        if eigen == 0.0 {
            return Ok(0.0);
        }
        x = y.scaled(1.0 / eigen);
        if k > 0 && (eigen - previous).abs() <= method.tolerance * eigen {
            debug!("{}: power method stable after {} iterations", op.name(), k + 1);
            return Ok((eigen * (1.0 + method.tolerance)).sqrt());
        }
        previous = eigen;
    }
    Err(ReconError::ConvergenceFailure {
        what: format!("power method for {}", op.name()),
        iterations: method.max_iterations,
    })
}

/// Outcome of a dot-product test.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdjointReport {
    /// `<A x, y>`
    pub lhs: f64,
    /// `<x, A* y>`
    pub rhs: f64,
    pub relative_error: f64,
    pub passed: bool,
}

/// Dot-product test of the adjoint on random vectors.
///
/// With `strict` an inconsistency is returned as
/// [`ReconError::AdjointInconsistency`]; otherwise it is logged and reported.
pub fn check_adjoint<O: Operator + ?Sized>(
    op: &O,
    tolerance: f64,
    strict: bool,
    seed: u64,
) -> Result<AdjointReport> {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = random_array(op.domain(), &mut rng);
    let y = random_array(op.range(), &mut rng);

    let lhs = op.apply(&x)?.dot(&y)?;
    let rhs = x.dot(&op.adjoint(&y)?)?;
    let scale = lhs.abs().max(rhs.abs()).max(f64::MIN_POSITIVE);
    let relative_error = (lhs - rhs).abs() / scale;
    let passed = relative_error <= tolerance;

    if !passed {
        if strict {
            return Err(ReconError::AdjointInconsistency {
                operator: op.name().to_string(),
                lhs,
                rhs,
                relative_error,
            });
        }
        warn!(
            "{}: adjoint check failed, relative error {:.3e} > {:.3e}",
            op.name(),
            relative_error,
            tolerance
        );
    }
    Ok(AdjointReport {
        lhs,
        rhs,
        relative_error,
        passed,
    })
}
