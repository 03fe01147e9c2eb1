use std::sync::Arc;

use log::debug;

use super::{check_input, Function};
use crate::array::{DataArray, Geometry};
use crate::error::{ReconError, Result};
use crate::operators::Operator;

/// Data fidelity `c * || A(x) - b ||^2_W`.
///
/// With the default `c = 1/2` and no weight this is `1/2 ||A x - b||^2`
/// whose gradient is `A*(A x - b)`. Nonlinear forward models use the
/// adjoint of their Jacobian.
#[derive(Clone, Debug)]
pub struct LeastSquares {
    op: Arc<dyn Operator>,
    b: DataArray,
    c: f64,
    weight: Option<DataArray>,
}

impl LeastSquares {
    pub fn new(op: Arc<dyn Operator>, b: DataArray) -> Result<Self> {
        b.ensure_geometry(op.range(), "LeastSquares: data vs operator range")?;
        Ok(Self {
            op,
            b,
            c: 0.5,
            weight: None,
        })
    }

    pub fn with_constant(self, c: f64) -> Result<Self> {
        if !(c.is_finite() && c > 0.0) {
            return Err(ReconError::config("LeastSquares constant must be positive"));
        }
        Ok(Self { c, ..self })
    }

    /// Diagonal weighting `W` in range space, entries must be non-negative.
    pub fn with_weight(self, weight: DataArray) -> Result<Self> {
        weight.ensure_geometry(self.op.range(), "LeastSquares: weight vs operator range")?;
        if weight.data().iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return Err(ReconError::config("LeastSquares weights must be non-negative"));
        }
        Ok(Self {
            weight: Some(weight),
            ..self
        })
    }

    pub fn operator(&self) -> &Arc<dyn Operator> {
        &self.op
    }

    pub fn data(&self) -> &DataArray {
        &self.b
    }

    /// `A(x) - b`
    pub fn residual(&self, x: &DataArray) -> Result<DataArray> {
        self.op.apply(x)?.sub(&self.b)
    }
}

impl Function for LeastSquares {
    fn name(&self) -> &str {
        "LeastSquares"
    }

    fn domain(&self) -> Option<&Geometry> {
        Some(self.op.domain())
    }

    fn value(&self, x: &DataArray) -> Result<f64> {
        check_input(self, x)?;
        let r = self.residual(x)?;
        let total = match &self.weight {
            Some(w) => r.mul(&r)?.dot(w)?,
            None => r.squared_norm(),
        };
        Ok(self.c * total)
    }

    fn is_differentiable(&self) -> bool {
        true
    }

    fn gradient(&self, x: &DataArray) -> Result<DataArray> {
        check_input(self, x)?;
        let mut r = self.residual(x)?;
        if let Some(w) = &self.weight {
            r = r.mul(w)?;
        }
        Ok(self.op.jacobian_adjoint(x, &r)?.scaled(2.0 * self.c))
    }

    fn lipschitz(&self) -> Option<f64> {
        if !self.op.is_linear() {
            return None;
        }
        let norm = match self.op.norm() {
            Ok(n) => n,
            Err(e) => {
                debug!("LeastSquares: no operator norm ({e})");
                return None;
            }
        };
        let w = self.weight.as_ref().map_or(1.0, |w| w.max_abs());
        Some(2.0 * self.c * w * norm * norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::AxisLabel;
    use crate::operators::{IdentityOperator, MatrixOperator};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn value_and_gradient_on_identity() {
        let g = Geometry::vector(AxisLabel::Horizontal, 3).unwrap();
        let b = DataArray::from_vec(g.clone(), vec![1.0, 2.0, 3.0]).unwrap();
        let f = LeastSquares::new(Arc::new(IdentityOperator::new(g.clone())), b).unwrap();
        let x = DataArray::zeros(&g);
        assert_abs_diff_eq!(f.value(&x).unwrap(), 7.0);
        assert_eq!(f.gradient(&x).unwrap().to_vec(), vec![-1.0, -2.0, -3.0]);
        assert_abs_diff_eq!(f.lipschitz().unwrap(), 1.0);
    }

    #[test]
    fn weighted_gradient_matches_finite_differences() {
        let a = MatrixOperator::from_matrix(array![[1.0, 2.0], [0.5, -1.0], [0.0, 3.0]]).unwrap();
        let b = DataArray::from_vec(a.range().clone(), vec![1.0, 0.0, 2.0]).unwrap();
        let w = DataArray::from_vec(a.range().clone(), vec![1.0, 2.0, 0.5]).unwrap();
        let f = LeastSquares::new(Arc::new(a), b).unwrap().with_weight(w).unwrap();
        let x = DataArray::from_vec(f.domain().unwrap().clone(), vec![0.2, -0.4]).unwrap();
        let g = f.gradient(&x).unwrap().to_vec();
        let h = 1e-6;
        for k in 0..2 {
            let mut xp = x.clone();
            xp.data_mut()[[k]] += h;
            let mut xm = x.clone();
            xm.data_mut()[[k]] -= h;
            let fd = (f.value(&xp).unwrap() - f.value(&xm).unwrap()) / (2.0 * h);
            assert_abs_diff_eq!(g[k], fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn data_must_live_in_the_range() {
        let g = Geometry::vector(AxisLabel::Horizontal, 3).unwrap();
        let other = Geometry::vector(AxisLabel::Angle, 3).unwrap();
        let b = DataArray::zeros(&other);
        assert!(LeastSquares::new(Arc::new(IdentityOperator::new(g)), b).is_err());
    }

    #[test]
    fn has_no_closed_form_prox() {
        let g = Geometry::vector(AxisLabel::Horizontal, 1).unwrap();
        let f = LeastSquares::new(Arc::new(IdentityOperator::new(g.clone())), DataArray::zeros(&g)).unwrap();
        assert!(matches!(
            f.proximal(&DataArray::zeros(&g), 1.0),
            Err(ReconError::NotProximable { .. })
        ));
    }
}
