use ndarray::{ArrayD, Axis};

use super::{check_reference, check_step, shifted, Function};
use crate::array::{AxisLabel, DataArray, Geometry};
use crate::error::{ReconError, Result};

/// `c * ||x - b||_2^2`
#[derive(Clone, Debug)]
pub struct L2NormSquared {
    c: f64,
    b: Option<DataArray>,
}

impl L2NormSquared {
    pub fn new(c: f64) -> Result<Self> {
        if !(c.is_finite() && c > 0.0) {
            return Err(ReconError::config("L2NormSquared needs c > 0"));
        }
        Ok(Self { c, b: None })
    }

    pub fn with_data(self, b: DataArray) -> Self {
        Self { b: Some(b), ..self }
    }
}

impl Function for L2NormSquared {
    fn name(&self) -> &str {
        "L2NormSquared"
    }

    fn domain(&self) -> Option<&Geometry> {
        self.b.as_ref().map(|b| b.geometry())
    }

    fn value(&self, x: &DataArray) -> Result<f64> {
        check_reference(self.b.as_ref(), x, self.name())?;
        Ok(self.c * shifted(x, self.b.as_ref())?.squared_norm())
    }

    fn is_differentiable(&self) -> bool {
        true
    }

    fn gradient(&self, x: &DataArray) -> Result<DataArray> {
        check_reference(self.b.as_ref(), x, self.name())?;
        Ok(shifted(x, self.b.as_ref())?.scaled(2.0 * self.c))
    }

    fn lipschitz(&self) -> Option<f64> {
        Some(2.0 * self.c)
    }

    fn proximal(&self, x: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        check_reference(self.b.as_ref(), x, self.name())?;
        let k = 2.0 * self.c * step;
        // (x + 2 c tau b) / (1 + 2 c tau)
        match &self.b {
            Some(b) => x.sapyb(1.0 / (1.0 + k), b, k / (1.0 + k)),
            None => Ok(x.scaled(1.0 / (1.0 + k))),
        }
    }

    fn convex_conjugate(&self, y: &DataArray) -> Result<f64> {
        check_reference(self.b.as_ref(), y, self.name())?;
        let mut v = y.squared_norm() / (4.0 * self.c);
        if let Some(b) = &self.b {
            v += y.dot(b)?;
        }
        Ok(v)
    }

    fn proximal_conjugate(&self, y: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        check_reference(self.b.as_ref(), y, self.name())?;
        let denom = 1.0 + step / (2.0 * self.c);
        match &self.b {
            Some(b) => y.sapyb(1.0 / denom, b, -step / denom),
            None => Ok(y.scaled(1.0 / denom)),
        }
    }
}

/// `w * ||x - b||_1`
#[derive(Clone, Debug)]
pub struct L1Norm {
    weight: f64,
    b: Option<DataArray>,
}

impl L1Norm {
    pub fn new(weight: f64) -> Result<Self> {
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(ReconError::config("L1Norm weight must be non-negative"));
        }
        Ok(Self { weight, b: None })
    }

    pub fn with_data(self, b: DataArray) -> Self {
        Self { b: Some(b), ..self }
    }
}

/// `sign(v) * max(|v| - t, 0)`
pub(crate) fn soft_threshold(v: f64, t: f64) -> f64 {
    v.signum() * (v.abs() - t).max(0.0)
}

impl Function for L1Norm {
    fn name(&self) -> &str {
        "L1Norm"
    }

    fn domain(&self) -> Option<&Geometry> {
        self.b.as_ref().map(|b| b.geometry())
    }

    fn value(&self, x: &DataArray) -> Result<f64> {
        check_reference(self.b.as_ref(), x, self.name())?;
        let d = shifted(x, self.b.as_ref())?;
        Ok(self.weight * d.data().iter().map(|v| v.abs()).sum::<f64>())
    }

    fn proximal(&self, x: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        check_reference(self.b.as_ref(), x, self.name())?;
        let t = self.weight * step;
        let z = shifted(x, self.b.as_ref())?.map(|v| soft_threshold(v, t));
        match &self.b {
            Some(b) => z.add(b),
            None => Ok(z),
        }
    }

    fn convex_conjugate(&self, y: &DataArray) -> Result<f64> {
        check_reference(self.b.as_ref(), y, self.name())?;
        let tol = 1e-12 * self.weight.max(1.0);
        if y.max_abs() > self.weight + tol {
            return Ok(f64::INFINITY);
        }
        match &self.b {
            Some(b) => y.dot(b),
            None => Ok(0.0),
        }
    }

    fn proximal_conjugate(&self, y: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        check_reference(self.b.as_ref(), y, self.name())?;
        let w = self.weight;
        let z = match &self.b {
            Some(b) => y.sapyb(1.0, b, -step)?,
            None => y.clone(),
        };
        Ok(z.map(|v| v.clamp(-w, w)))
    }
}

/// `w * sum_pixels || v(pixel) ||_2` for vector fields with a leading
/// `direction` axis.
///
/// With channel coupling the pointwise norm also runs over the `channel`
/// axis, which turns the total variation built on top of it into a
/// vectorial (colour) TV.
#[derive(Clone, Debug)]
pub struct MixedL21Norm {
    weight: f64,
    couple_channels: bool,
}

impl MixedL21Norm {
    pub fn new(weight: f64) -> Result<Self> {
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(ReconError::config("MixedL21Norm weight must be non-negative"));
        }
        Ok(Self {
            weight,
            couple_channels: false,
        })
    }

    pub fn coupled_channels(self) -> Self {
        Self {
            couple_channels: true,
            ..self
        }
    }

    /// Pointwise norms broadcast back over the component axes, shaped like
    /// `x` without its direction axis.
    fn pointwise_norms(&self, x: &DataArray) -> Result<ArrayD<f64>> {
        let g = x.geometry();
        if g.index_of(&AxisLabel::Direction) != Some(0) {
            return Err(ReconError::shape(
                "MixedL21Norm: leading axis",
                AxisLabel::Direction,
                g.labels().first().cloned().cloned(),
            ));
        }
        let sq = x.data().mapv(|v| v * v).sum_axis(Axis(0));
        let coupled = match g.index_of(&AxisLabel::Channel) {
            Some(ch) if self.couple_channels => {
                let ch = Axis(ch - 1);
                let summed = sq.sum_axis(ch).insert_axis(ch);
                summed
                    .broadcast(sq.raw_dim())
                    .map(|v| v.to_owned())
                    .ok_or_else(|| ReconError::shape("MixedL21Norm: channel broadcast", sq.shape(), summed.shape()))?
            }
            _ => sq,
        };
        Ok(coupled.mapv(f64::sqrt))
    }

    /// Multiply every component by `factor(norm)` pointwise.
    fn rescale(&self, x: &DataArray, factor: impl Fn(f64) -> f64) -> Result<DataArray> {
        let norms = self.pointwise_norms(x)?;
        let scale = norms.mapv(factor);
        let mut out = x.data().clone();
        for mut comp in out.axis_iter_mut(Axis(0)) {
            comp *= &scale;
        }
        x.with_data(out)
    }
}

impl Function for MixedL21Norm {
    fn name(&self) -> &str {
        "MixedL21Norm"
    }

    fn value(&self, x: &DataArray) -> Result<f64> {
        let norms = self.pointwise_norms(x)?;
        let total = norms.sum();
        // coupled norms are repeated once per channel
        let repeats = match x.geometry().len_of(&AxisLabel::Channel) {
            Some(c) if self.couple_channels => c as f64,
            _ => 1.0,
        };
        Ok(self.weight * total / repeats)
    }

    fn proximal(&self, x: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        let t = self.weight * step;
        self.rescale(x, |n| if n > t { 1.0 - t / n } else { 0.0 })
    }

    fn convex_conjugate(&self, y: &DataArray) -> Result<f64> {
        let norms = self.pointwise_norms(y)?;
        let tol = 1e-12 * self.weight.max(1.0);
        if norms.iter().any(|n| *n > self.weight + tol) {
            Ok(f64::INFINITY)
        } else {
            Ok(0.0)
        }
    }

    fn proximal_conjugate(&self, y: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        let w = self.weight;
        // projection onto pointwise balls of radius w
        self.rescale(y, |n| if n > w { w / n } else { 1.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn line(values: Vec<f64>) -> DataArray {
        let g = Geometry::vector(AxisLabel::Horizontal, values.len()).unwrap();
        DataArray::from_vec(g, values).unwrap()
    }

    #[test]
    fn soft_thresholding_matches_formula() {
        let f = L1Norm::new(0.5).unwrap();
        let x = line(vec![-3.0, -0.2, 0.0, 0.4, 2.0]);
        let step = 2.0;
        let z = f.proximal(&x, step).unwrap();
        for (zi, xi) in z.to_vec().iter().zip(x.to_vec()) {
            let expected = xi.signum() * (xi.abs() - 0.5 * step).max(0.0);
            assert_abs_diff_eq!(*zi, expected, epsilon = 1e-15);
        }
    }

    #[test]
    fn l1_with_reference_shrinks_towards_it() {
        let b = line(vec![1.0, 1.0]);
        let f = L1Norm::new(1.0).unwrap().with_data(b);
        let z = f.proximal(&line(vec![3.0, 1.5]), 1.0).unwrap();
        assert_eq!(z.to_vec(), vec![2.0, 1.0]);
        assert_abs_diff_eq!(f.value(&line(vec![3.0, 0.0])).unwrap(), 3.0);
    }

    #[test]
    fn l1_is_not_differentiable() {
        let f = L1Norm::new(1.0).unwrap();
        assert!(matches!(
            f.gradient(&line(vec![1.0])),
            Err(ReconError::NotDifferentiable { .. })
        ));
    }

    #[test]
    fn non_positive_step_is_rejected() {
        let f = L2NormSquared::new(1.0).unwrap();
        for step in [0.0, -1.0, f64::NAN] {
            assert!(matches!(
                f.proximal(&line(vec![1.0]), step),
                Err(ReconError::InvalidStep { .. })
            ));
        }
    }

    #[test]
    fn l2_prox_and_moreau_identity() {
        let b = line(vec![1.0, -2.0, 0.5]);
        let f = L2NormSquared::new(0.7).unwrap().with_data(b);
        let x = line(vec![0.3, 0.1, -1.0]);
        let tau = 0.8;
        // closed form vs Moreau default on the conjugate
        let p = f.proximal_conjugate(&x, tau).unwrap();
        let moreau = x
            .sapyb(1.0, &f.proximal(&x.scaled(1.0 / tau), 1.0 / tau).unwrap(), -tau)
            .unwrap();
        for (a, b) in p.to_vec().iter().zip(moreau.to_vec()) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-12);
        }
        // optimality of the prox: 2c(z - b) + (z - x)/tau = 0
        let z = f.proximal(&x, tau).unwrap();
        let g = f.gradient(&z).unwrap();
        let r = g.sapyb(1.0, &z.sub(&x).unwrap(), 1.0 / tau).unwrap();
        assert!(r.max_abs() < 1e-12);
    }

    fn field(values: Vec<f64>) -> DataArray {
        let g = Geometry::new([(AxisLabel::Direction, 2), (AxisLabel::Horizontal, 2)]).unwrap();
        DataArray::from_vec(g, values).unwrap()
    }

    #[test]
    fn l21_group_thresholding() {
        let f = MixedL21Norm::new(1.0).unwrap();
        // pixel norms: 5 and 0.5
        let v = field(vec![3.0, 0.3, 4.0, 0.4]);
        assert_abs_diff_eq!(f.value(&v).unwrap(), 5.5, epsilon = 1e-12);
        let z = f.proximal(&v, 1.0).unwrap().to_vec();
        assert_abs_diff_eq!(z[0], 3.0 * 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(z[2], 4.0 * 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(z[1], 0.0);
        let p = f.proximal_conjugate(&v, 1.0).unwrap().to_vec();
        assert_abs_diff_eq!(p[0], 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(p[1], 0.3, epsilon = 1e-12);
        assert_eq!(f.convex_conjugate(&v).unwrap(), f64::INFINITY);
    }

    #[test]
    fn l21_requires_direction_axis() {
        let f = MixedL21Norm::new(1.0).unwrap();
        assert!(f.value(&line(vec![1.0, 2.0])).is_err());
    }

    #[test]
    fn coupled_channels_share_one_norm() {
        let g = Geometry::new([
            (AxisLabel::Direction, 1),
            (AxisLabel::Channel, 2),
            (AxisLabel::Horizontal, 1),
        ])
        .unwrap();
        let v = DataArray::from_vec(g, vec![3.0, 4.0]).unwrap();
        let coupled = MixedL21Norm::new(1.0).unwrap().coupled_channels();
        let separate = MixedL21Norm::new(1.0).unwrap();
        assert_abs_diff_eq!(coupled.value(&v).unwrap(), 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(separate.value(&v).unwrap(), 7.0, epsilon = 1e-12);
    }
}
