use std::sync::Arc;

use super::{check_domain, check_range, estimate_norm, NormCache, Operator, PowerMethod};
use crate::array::{DataArray, Geometry};
use crate::error::{ReconError, Result};

/// `I: X -> X`
#[derive(Clone, Debug)]
pub struct IdentityOperator {
    geometry: Geometry,
}

impl IdentityOperator {
    pub fn new(geometry: Geometry) -> Self {
        Self { geometry }
    }
}

impl Operator for IdentityOperator {
    fn name(&self) -> &str {
        "IdentityOperator"
    }

    fn domain(&self) -> &Geometry {
        &self.geometry
    }

    fn range(&self) -> &Geometry {
        &self.geometry
    }

    fn apply(&self, x: &DataArray) -> Result<DataArray> {
        check_domain(self, x)?;
        Ok(x.clone())
    }

    fn adjoint(&self, y: &DataArray) -> Result<DataArray> {
        check_range(self, y)?;
        Ok(y.clone())
    }

    fn norm(&self) -> Result<f64> {
        Ok(1.0)
    }
}

/// `s * A`
#[derive(Clone, Debug)]
pub struct ScaledOperator {
    inner: Arc<dyn Operator>,
    scalar: f64,
}

impl ScaledOperator {
    pub fn new(inner: Arc<dyn Operator>, scalar: f64) -> Result<Self> {
        if !scalar.is_finite() {
            return Err(ReconError::config("operator scale must be finite"));
        }
        Ok(Self { inner, scalar })
    }
}

impl Operator for ScaledOperator {
    fn name(&self) -> &str {
        "ScaledOperator"
    }

    fn domain(&self) -> &Geometry {
        self.inner.domain()
    }

    fn range(&self) -> &Geometry {
        self.inner.range()
    }

    fn is_linear(&self) -> bool {
        self.inner.is_linear()
    }

    fn apply(&self, x: &DataArray) -> Result<DataArray> {
        Ok(self.inner.apply(x)?.scaled(self.scalar))
    }

    fn adjoint(&self, y: &DataArray) -> Result<DataArray> {
        Ok(self.inner.adjoint(y)?.scaled(self.scalar))
    }

    fn jacobian_adjoint(&self, x: &DataArray, y: &DataArray) -> Result<DataArray> {
        Ok(self.inner.jacobian_adjoint(x, y)?.scaled(self.scalar))
    }

    fn norm(&self) -> Result<f64> {
        Ok(self.scalar.abs() * self.inner.norm()?)
    }
}

/// Elementwise multiplication by a fixed array.
#[derive(Clone, Debug)]
pub struct DiagonalOperator {
    diagonal: DataArray,
}

impl DiagonalOperator {
    pub fn new(diagonal: DataArray) -> Self {
        Self { diagonal }
    }

    /// Keep entries where `mask` is true, zero the rest.
    pub fn mask(geometry: Geometry, mask: &[bool]) -> Result<Self> {
        let values = mask.iter().map(|&keep| if keep { 1.0 } else { 0.0 }).collect();
        Ok(Self::new(DataArray::from_vec(geometry, values)?))
    }

    pub fn diagonal(&self) -> &DataArray {
        &self.diagonal
    }
}

impl Operator for DiagonalOperator {
    fn name(&self) -> &str {
        "DiagonalOperator"
    }

    fn domain(&self) -> &Geometry {
        self.diagonal.geometry()
    }

    fn range(&self) -> &Geometry {
        self.diagonal.geometry()
    }

    fn apply(&self, x: &DataArray) -> Result<DataArray> {
        check_domain(self, x)?;
        x.mul(&self.diagonal)
    }

    fn adjoint(&self, y: &DataArray) -> Result<DataArray> {
        check_range(self, y)?;
        y.mul(&self.diagonal)
    }

    fn norm(&self) -> Result<f64> {
        Ok(self.diagonal.max_abs())
    }
}

/// `outer ∘ inner`
#[derive(Clone, Debug)]
pub struct CompositionOperator {
    outer: Arc<dyn Operator>,
    inner: Arc<dyn Operator>,
    norm: NormCache,
}

impl CompositionOperator {
    pub fn new(outer: Arc<dyn Operator>, inner: Arc<dyn Operator>) -> Result<Self> {
        outer
            .domain()
            .ensure_matches(inner.range(), "CompositionOperator: outer domain vs inner range")?;
        Ok(Self {
            outer,
            inner,
            norm: NormCache::new(),
        })
    }

    /// Compose a chain applied right to left: `ops[0] ∘ ops[1] ∘ ...`.
    pub fn chain(ops: Vec<Arc<dyn Operator>>) -> Result<Arc<dyn Operator>> {
        let mut iter = ops.into_iter().rev();
        let mut acc = iter
            .next()
            .ok_or_else(|| ReconError::config("cannot compose an empty operator list"))?;
        for outer in iter {
            acc = Arc::new(CompositionOperator::new(outer, acc)?);
        }
        Ok(acc)
    }

    pub fn with_norm(self, bound: f64) -> Self {
        Self {
            norm: NormCache::preset(bound),
            ..self
        }
    }
}

impl Operator for CompositionOperator {
    fn name(&self) -> &str {
        "CompositionOperator"
    }

    fn domain(&self) -> &Geometry {
        self.inner.domain()
    }

    fn range(&self) -> &Geometry {
        self.outer.range()
    }

    fn is_linear(&self) -> bool {
        self.outer.is_linear() && self.inner.is_linear()
    }

    fn apply(&self, x: &DataArray) -> Result<DataArray> {
        self.outer.apply(&self.inner.apply(x)?)
    }

    fn adjoint(&self, y: &DataArray) -> Result<DataArray> {
        self.inner.adjoint(&self.outer.adjoint(y)?)
    }

    fn jacobian_adjoint(&self, x: &DataArray, y: &DataArray) -> Result<DataArray> {
        // chain rule: J_inner(x)* J_outer(inner(x))*
        let inner_x = self.inner.apply(x)?;
        let v = self.outer.jacobian_adjoint(&inner_x, y)?;
        self.inner.jacobian_adjoint(x, &v)
    }

    fn norm(&self) -> Result<f64> {
        self.norm
            .get_or_estimate(|| estimate_norm(self, &PowerMethod::default()))
    }
}

/// `A + B` on identical geometries.
#[derive(Clone, Debug)]
pub struct SumOperator {
    left: Arc<dyn Operator>,
    right: Arc<dyn Operator>,
    norm: NormCache,
}

impl SumOperator {
    pub fn new(left: Arc<dyn Operator>, right: Arc<dyn Operator>) -> Result<Self> {
        left.domain()
            .ensure_matches(right.domain(), "SumOperator: domains")?;
        left.range()
            .ensure_matches(right.range(), "SumOperator: ranges")?;
        Ok(Self {
            left,
            right,
            norm: NormCache::new(),
        })
    }
}

impl Operator for SumOperator {
    fn name(&self) -> &str {
        "SumOperator"
    }

    fn domain(&self) -> &Geometry {
        self.left.domain()
    }

    fn range(&self) -> &Geometry {
        self.left.range()
    }

    fn is_linear(&self) -> bool {
        self.left.is_linear() && self.right.is_linear()
    }

    fn apply(&self, x: &DataArray) -> Result<DataArray> {
        self.left.apply(x)?.add(&self.right.apply(x)?)
    }

    fn adjoint(&self, y: &DataArray) -> Result<DataArray> {
        self.left.adjoint(y)?.add(&self.right.adjoint(y)?)
    }

    fn jacobian_adjoint(&self, x: &DataArray, y: &DataArray) -> Result<DataArray> {
        self.left
            .jacobian_adjoint(x, y)?
            .add(&self.right.jacobian_adjoint(x, y)?)
    }

    fn norm(&self) -> Result<f64> {
        // triangle inequality when both parts are cheap, power method otherwise
        self.norm.get_or_estimate(|| match (self.left.norm(), self.right.norm()) {
            (Ok(a), Ok(b)) => Ok(a + b),
            _ => estimate_norm(self, &PowerMethod::default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::AxisLabel;
    use crate::operators::{check_adjoint, MatrixOperator};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn line(n: usize) -> Geometry {
        Geometry::vector(AxisLabel::Horizontal, n).unwrap()
    }

    #[test]
    fn identity_rejects_wrong_geometry() {
        let op = IdentityOperator::new(line(3));
        let x = DataArray::zeros(&line(4));
        assert!(matches!(op.apply(&x), Err(ReconError::ShapeMismatch { .. })));
    }

    #[test]
    fn composition_applies_in_order_and_reverses_adjoint() {
        let a: Arc<dyn Operator> =
            Arc::new(MatrixOperator::from_matrix(array![[1.0, 2.0], [0.0, 1.0], [1.0, 1.0]]).unwrap());
        let b: Arc<dyn Operator> =
            Arc::new(MatrixOperator::from_matrix(array![[2.0, 0.0, 1.0], [1.0, 1.0, 1.0]]).unwrap());
        // b: R^3 -> R^2, a: R^2 -> R^3
        let ab = CompositionOperator::new(a.clone(), b.clone()).unwrap();
        let x = DataArray::from_vec(b.domain().clone(), vec![1.0, -1.0, 2.0]).unwrap();
        let expected = a.apply(&b.apply(&x).unwrap()).unwrap();
        assert_eq!(ab.apply(&x).unwrap(), expected);
        assert!(check_adjoint(&ab, 1e-12, true, 11).unwrap().passed);
    }

    #[test]
    fn composition_checks_geometry() {
        let a: Arc<dyn Operator> = Arc::new(IdentityOperator::new(line(2)));
        let b: Arc<dyn Operator> = Arc::new(IdentityOperator::new(line(3)));
        assert!(CompositionOperator::new(a, b).is_err());
    }

    #[test]
    fn scaled_and_sum_operators() {
        let id: Arc<dyn Operator> = Arc::new(IdentityOperator::new(line(3)));
        let two = ScaledOperator::new(id.clone(), 2.0).unwrap();
        assert_relative_eq!(two.norm().unwrap(), 2.0);
        let sum = SumOperator::new(id.clone(), Arc::new(two)).unwrap();
        let x = DataArray::from_vec(line(3), vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(sum.apply(&x).unwrap().to_vec(), vec![3.0, 6.0, 9.0]);
        assert!(check_adjoint(&sum, 1e-12, true, 2).unwrap().passed);
    }

    #[test]
    fn mask_zeroes_entries() {
        let op = DiagonalOperator::mask(line(3), &[true, false, true]).unwrap();
        let x = DataArray::from_vec(line(3), vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(op.apply(&x).unwrap().to_vec(), vec![1.0, 0.0, 3.0]);
        assert_relative_eq!(op.norm().unwrap(), 1.0);
    }
}
