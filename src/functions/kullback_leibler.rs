use super::{check_step, Function};
use crate::array::{DataArray, Geometry};
use crate::error::{ReconError, Result};

/// Poisson negative log-likelihood
/// `sum (x + eta) - b + b log(b / (x + eta))` with background `eta`.
///
/// The value is `+inf` wherever `x + eta` is negative, or zero while `b`
/// is positive.
#[derive(Clone, Debug)]
pub struct KullbackLeibler {
    b: DataArray,
    eta: DataArray,
}

impl KullbackLeibler {
    pub fn new(b: DataArray) -> Result<Self> {
        if b.data().iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(ReconError::config("KullbackLeibler data must be non-negative"));
        }
        let eta = DataArray::zeros(b.geometry());
        Ok(Self { b, eta })
    }

    pub fn with_background(self, eta: DataArray) -> Result<Self> {
        eta.ensure_geometry(self.b.geometry(), "KullbackLeibler background")?;
        if eta.data().iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(ReconError::config("KullbackLeibler background must be non-negative"));
        }
        Ok(Self { eta, ..self })
    }

    fn check(&self, x: &DataArray) -> Result<()> {
        x.ensure_geometry(self.b.geometry(), self.name())
    }
}

impl Function for KullbackLeibler {
    fn name(&self) -> &str {
        "KullbackLeibler"
    }

    fn domain(&self) -> Option<&Geometry> {
        Some(self.b.geometry())
    }

    fn value(&self, x: &DataArray) -> Result<f64> {
        self.check(x)?;
        let mut total = 0.0;
        for ((&xi, &bi), &ei) in x.data().iter().zip(self.b.data()).zip(self.eta.data()) {
            let s = xi + ei;
            if s < 0.0 || (s == 0.0 && bi > 0.0) {
                return Ok(f64::INFINITY);
            }
            total += s - bi;
            if bi > 0.0 {
                total += bi * (bi / s).ln();
            }
        }
        Ok(total)
    }

    fn is_differentiable(&self) -> bool {
        true
    }

    fn gradient(&self, x: &DataArray) -> Result<DataArray> {
        self.check(x)?;
        let s = x.add(&self.eta)?;
        if s.data().iter().any(|v| *v <= 0.0) {
            return Err(ReconError::NotDifferentiable {
                function: "KullbackLeibler outside x + eta > 0".to_string(),
            });
        }
        s.zip_map(&self.b, |si, bi| 1.0 - bi / si)
    }

    fn proximal(&self, x: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        self.check(x)?;
        let mut out = x.clone();
        for ((o, &bi), &ei) in out
            .data_mut()
            .iter_mut()
            .zip(self.b.data())
            .zip(self.eta.data())
        {
            let xi = *o;
            let d = xi + ei - step;
            *o = 0.5 * ((xi - ei - step) + (d * d + 4.0 * step * bi).sqrt());
        }
        Ok(out)
    }

    fn convex_conjugate(&self, y: &DataArray) -> Result<f64> {
        self.check(y)?;
        let mut total = 0.0;
        for ((&yi, &bi), &ei) in y.data().iter().zip(self.b.data()).zip(self.eta.data()) {
            if yi > 1.0 || (yi == 1.0 && bi > 0.0) {
                return Ok(f64::INFINITY);
            }
            if bi > 0.0 {
                total -= bi * (1.0 - yi).ln();
            }
            total -= ei * yi;
        }
        Ok(total)
    }

    fn proximal_conjugate(&self, y: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        self.check(y)?;
        let mut out = y.clone();
        for ((o, &bi), &ei) in out
            .data_mut()
            .iter_mut()
            .zip(self.b.data())
            .zip(self.eta.data())
        {
            let z = *o + step * ei;
            *o = 0.5 * ((z + 1.0) - ((z - 1.0) * (z - 1.0) + 4.0 * step * bi).sqrt());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::AxisLabel;
    use approx::assert_abs_diff_eq;

    fn line(values: Vec<f64>) -> DataArray {
        let g = Geometry::vector(AxisLabel::Angle, values.len()).unwrap();
        DataArray::from_vec(g, values).unwrap()
    }

    #[test]
    fn minimum_is_at_the_data() {
        let f = KullbackLeibler::new(line(vec![2.0, 0.0, 5.0])).unwrap();
        assert_abs_diff_eq!(f.value(&line(vec![2.0, 0.0, 5.0])).unwrap(), 0.0, epsilon = 1e-12);
        assert!(f.value(&line(vec![1.0, 1.0, 1.0])).unwrap() > 0.0);
        assert_eq!(f.value(&line(vec![-1.0, 0.0, 1.0])).unwrap(), f64::INFINITY);
    }

    #[test]
    fn prox_satisfies_optimality() {
        let f = KullbackLeibler::new(line(vec![3.0, 1.0])).unwrap();
        let x = line(vec![0.5, 4.0]);
        let tau = 0.7;
        let z = f.proximal(&x, tau).unwrap();
        // grad f(z) + (z - x)/tau = 0
        let g = f.gradient(&z).unwrap();
        let r = g.sapyb(1.0, &z.sub(&x).unwrap(), 1.0 / tau).unwrap();
        assert!(r.max_abs() < 1e-10);
    }

    #[test]
    fn conjugate_prox_agrees_with_moreau() {
        let f = KullbackLeibler::new(line(vec![3.0, 1.0, 0.0])).unwrap()
            .with_background(line(vec![0.1, 0.2, 0.3])).unwrap();
        let y = line(vec![0.5, -2.0, 0.9]);
        let sigma = 1.3;
        let closed = f.proximal_conjugate(&y, sigma).unwrap();
        let p = f.proximal(&y.scaled(1.0 / sigma), 1.0 / sigma).unwrap();
        let moreau = y.sapyb(1.0, &p, -sigma).unwrap();
        for (a, b) in closed.to_vec().iter().zip(moreau.to_vec()) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-10);
        }
    }
}
