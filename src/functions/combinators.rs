use std::sync::Arc;

use super::{check_input, check_step, Function};
use crate::array::{DataArray, Geometry};
use crate::error::{ReconError, Result};
use crate::operators::BlockLayout;

/// `alpha * f` with `alpha >= 0`.
#[derive(Clone, Debug)]
pub struct ScaledFunction {
    inner: Arc<dyn Function>,
    alpha: f64,
}

impl ScaledFunction {
    pub fn new(inner: Arc<dyn Function>, alpha: f64) -> Result<Self> {
        if !(alpha.is_finite() && alpha >= 0.0) {
            return Err(ReconError::config("function scale must be non-negative"));
        }
        Ok(Self { inner, alpha })
    }
}

impl Function for ScaledFunction {
    fn name(&self) -> &str {
        "ScaledFunction"
    }

    fn domain(&self) -> Option<&Geometry> {
        self.inner.domain()
    }

    fn value(&self, x: &DataArray) -> Result<f64> {
        if self.alpha == 0.0 {
            check_input(self, x)?;
            return Ok(0.0);
        }
        Ok(self.alpha * self.inner.value(x)?)
    }

    fn is_differentiable(&self) -> bool {
        self.inner.is_differentiable()
    }

    fn gradient(&self, x: &DataArray) -> Result<DataArray> {
        Ok(self.inner.gradient(x)?.scaled(self.alpha))
    }

    fn lipschitz(&self) -> Option<f64> {
        self.inner.lipschitz().map(|l| self.alpha * l)
    }

    fn proximal(&self, x: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        if self.alpha == 0.0 {
            check_input(self, x)?;
            return Ok(x.clone());
        }
        self.inner.proximal(x, self.alpha * step)
    }

    fn convex_conjugate(&self, y: &DataArray) -> Result<f64> {
        if self.alpha == 0.0 {
            return Ok(if y.max_abs() == 0.0 { 0.0 } else { f64::INFINITY });
        }
        // (a f)*(y) = a f*(y / a)
        Ok(self.alpha * self.inner.convex_conjugate(&y.scaled(1.0 / self.alpha))?)
    }

    fn proximal_conjugate(&self, y: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        if self.alpha == 0.0 {
            return Ok(DataArray::zeros(y.geometry()));
        }
        let a = self.alpha;
        Ok(self
            .inner
            .proximal_conjugate(&y.scaled(1.0 / a), step / a)?
            .scaled(a))
    }
}

/// `f_0 + f_1 + ...` over one shared domain.
///
/// Values and gradients add up; there is deliberately no proximal map, the
/// proximal map of a sum is not the sum of the proximal maps.
#[derive(Clone, Debug)]
pub struct SumFunction {
    terms: Vec<Arc<dyn Function>>,
    domain: Option<Geometry>,
}

impl SumFunction {
    pub fn new(terms: Vec<Arc<dyn Function>>) -> Result<Self> {
        if terms.is_empty() {
            return Err(ReconError::config("sum of functions needs at least one term"));
        }
        let mut domain: Option<Geometry> = None;
        for t in &terms {
            if let Some(g) = t.domain() {
                match &domain {
                    Some(d) => d.ensure_matches(g, "SumFunction: term domains")?,
                    None => domain = Some(g.clone()),
                }
            }
        }
        Ok(Self { terms, domain })
    }

    pub fn terms(&self) -> &[Arc<dyn Function>] {
        &self.terms
    }
}

impl Function for SumFunction {
    fn name(&self) -> &str {
        "SumFunction"
    }

    fn domain(&self) -> Option<&Geometry> {
        self.domain.as_ref()
    }

    fn value(&self, x: &DataArray) -> Result<f64> {
        check_input(self, x)?;
        let mut total = 0.0;
        for t in &self.terms {
            total += t.value(x)?;
        }
        Ok(total)
    }

    fn is_differentiable(&self) -> bool {
        self.terms.iter().all(|t| t.is_differentiable())
    }

    fn gradient(&self, x: &DataArray) -> Result<DataArray> {
        check_input(self, x)?;
        let mut acc = DataArray::zeros(x.geometry());
        for t in &self.terms {
            acc.add_scaled(1.0, &t.gradient(x)?)?;
        }
        Ok(acc)
    }

    fn lipschitz(&self) -> Option<f64> {
        self.terms.iter().map(|t| t.lipschitz()).sum()
    }
}

/// Separable sum `sum_i f_i(y_i)` over the parts of a [`BlockLayout`].
///
/// Proximal maps of separable sums do split, so unlike [`SumFunction`] this
/// one is proximable blockwise.
#[derive(Clone, Debug)]
pub struct BlockFunction {
    parts: Vec<Arc<dyn Function>>,
    layout: BlockLayout,
}

impl BlockFunction {
    pub fn new(parts: Vec<Arc<dyn Function>>, layout: BlockLayout) -> Result<Self> {
        if parts.len() != layout.len() {
            return Err(ReconError::shape("BlockFunction parts", layout.len(), parts.len()));
        }
        for (f, g) in parts.iter().zip(layout.parts()) {
            if let Some(d) = f.domain() {
                g.ensure_matches(d, "BlockFunction: part domain")?;
            }
        }
        Ok(Self { parts, layout })
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn part(&self, i: usize) -> Option<&Arc<dyn Function>> {
        self.parts.get(i)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn blockwise<F>(&self, y: &DataArray, f: F) -> Result<DataArray>
    where
        F: Fn(&Arc<dyn Function>, &DataArray) -> Result<DataArray>,
    {
        let split = self.layout.split(y)?;
        let mapped = self
            .parts
            .iter()
            .zip(&split)
            .map(|(func, part)| f(func, part))
            .collect::<Result<Vec<_>>>()?;
        self.layout.concat(&mapped)
    }
}

impl Function for BlockFunction {
    fn name(&self) -> &str {
        "BlockFunction"
    }

    fn domain(&self) -> Option<&Geometry> {
        Some(self.layout.geometry())
    }

    fn value(&self, y: &DataArray) -> Result<f64> {
        let split = self.layout.split(y)?;
        let mut total = 0.0;
        for (f, part) in self.parts.iter().zip(&split) {
            total += f.value(part)?;
        }
        Ok(total)
    }

    fn is_differentiable(&self) -> bool {
        self.parts.iter().all(|f| f.is_differentiable())
    }

    fn gradient(&self, y: &DataArray) -> Result<DataArray> {
        self.blockwise(y, |f, part| f.gradient(part))
    }

    fn lipschitz(&self) -> Option<f64> {
        self.parts
            .iter()
            .map(|f| f.lipschitz())
            .try_fold(0.0_f64, |m, l| l.map(|l| m.max(l)))
    }

    fn proximal(&self, y: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        self.blockwise(y, |f, part| f.proximal(part, step))
    }

    fn convex_conjugate(&self, y: &DataArray) -> Result<f64> {
        let split = self.layout.split(y)?;
        let mut total = 0.0;
        for (f, part) in self.parts.iter().zip(&split) {
            total += f.convex_conjugate(part)?;
        }
        Ok(total)
    }

    fn proximal_conjugate(&self, y: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        self.blockwise(y, |f, part| f.proximal_conjugate(part, step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::AxisLabel;
    use crate::functions::{L1Norm, L2NormSquared, ZeroFunction};
    use approx::assert_abs_diff_eq;

    fn line(values: Vec<f64>) -> DataArray {
        let g = Geometry::vector(AxisLabel::Horizontal, values.len()).unwrap();
        DataArray::from_vec(g, values).unwrap()
    }

    #[test]
    fn scaled_prox_rescales_the_step() {
        let f = ScaledFunction::new(Arc::new(L1Norm::new(1.0).unwrap()), 2.0).unwrap();
        let z = f.proximal(&line(vec![5.0, -1.0]), 1.5).unwrap();
        assert_eq!(z.to_vec(), vec![2.0, 0.0]);
        assert_abs_diff_eq!(f.value(&line(vec![1.0, -1.0])).unwrap(), 4.0);
    }

    #[test]
    fn scaled_conjugate_prox_matches_moreau() {
        let inner: Arc<dyn Function> = Arc::new(L2NormSquared::new(0.5).unwrap().with_data(line(vec![1.0, 2.0])));
        let f = ScaledFunction::new(inner, 3.0).unwrap();
        let y = line(vec![0.4, -1.2]);
        let s = 0.6;
        let closed = f.proximal_conjugate(&y, s).unwrap();
        let p = f.proximal(&y.scaled(1.0 / s), 1.0 / s).unwrap();
        let moreau = y.sapyb(1.0, &p, -s).unwrap();
        for (a, b) in closed.to_vec().iter().zip(moreau.to_vec()) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn sum_adds_values_and_gradients_but_refuses_prox() {
        let a: Arc<dyn Function> = Arc::new(L2NormSquared::new(1.0).unwrap());
        let b: Arc<dyn Function> = Arc::new(ZeroFunction);
        let s = SumFunction::new(vec![a.clone(), b, a]).unwrap();
        let x = line(vec![1.0, 2.0]);
        assert_abs_diff_eq!(s.value(&x).unwrap(), 10.0);
        assert_eq!(s.gradient(&x).unwrap().to_vec(), vec![4.0, 8.0]);
        assert_eq!(s.lipschitz(), Some(4.0));
        assert!(matches!(s.proximal(&x, 1.0), Err(ReconError::NotProximable { .. })));
    }

    #[test]
    fn sum_with_non_smooth_term_has_no_gradient() {
        let a: Arc<dyn Function> = Arc::new(L2NormSquared::new(1.0).unwrap());
        let b: Arc<dyn Function> = Arc::new(L1Norm::new(1.0).unwrap());
        let s = SumFunction::new(vec![a, b]).unwrap();
        assert!(!s.is_differentiable());
        assert!(s.gradient(&line(vec![1.0])).is_err());
        assert_eq!(s.lipschitz(), None);
    }

    #[test]
    fn block_function_is_separable() {
        let g1 = Geometry::vector(AxisLabel::Horizontal, 2).unwrap();
        let g2 = Geometry::vector(AxisLabel::Angle, 1).unwrap();
        let layout = BlockLayout::new(vec![g1, g2]).unwrap();
        let f = BlockFunction::new(
            vec![Arc::new(L1Norm::new(1.0).unwrap()), Arc::new(L2NormSquared::new(0.5).unwrap())],
            layout.clone(),
        )
        .unwrap();
        let y = DataArray::from_vec(layout.geometry().clone(), vec![3.0, -0.5, 4.0]).unwrap();
        assert_abs_diff_eq!(f.value(&y).unwrap(), 3.5 + 8.0);
        let z = f.proximal(&y, 1.0).unwrap();
        assert_eq!(z.to_vec(), vec![2.0, 0.0, 2.0]);
    }
}
