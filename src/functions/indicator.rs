use super::{check_step, Function};
use crate::array::DataArray;
use crate::error::{ReconError, Result};

/// Indicator of the box `lower <= x <= upper`: 0 inside, `+inf` outside.
#[derive(Clone, Copy, Debug)]
pub struct IndicatorBox {
    lower: f64,
    upper: f64,
}

impl IndicatorBox {
    /// Either bound may be infinite.
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(ReconError::config(format!(
                "invalid box bounds [{lower}, {upper}]"
            )));
        }
        Ok(Self { lower, upper })
    }

    /// `x >= 0`
    pub fn non_negative() -> Self {
        Self {
            lower: 0.0,
            upper: f64::INFINITY,
        }
    }

    pub fn project(&self, x: &DataArray) -> DataArray {
        let (lo, hi) = (self.lower, self.upper);
        x.map(|v| v.clamp(lo, hi))
    }
}

impl Function for IndicatorBox {
    fn name(&self) -> &str {
        "IndicatorBox"
    }

    fn value(&self, x: &DataArray) -> Result<f64> {
        let tol = 1e-12;
        let inside = x
            .data()
            .iter()
            .all(|v| *v >= self.lower - tol && *v <= self.upper + tol);
        Ok(if inside { 0.0 } else { f64::INFINITY })
    }

    fn proximal(&self, x: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        Ok(self.project(x))
    }

    fn convex_conjugate(&self, y: &DataArray) -> Result<f64> {
        // support function of the box
        let mut total = 0.0;
        for &v in y.data().iter() {
            let term = if v > 0.0 {
                v * self.upper
            } else if v < 0.0 {
                v * self.lower
            } else {
                0.0
            };
            total += term;
        }
        Ok(total)
    }
}

/// `f(x) = 0`
#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroFunction;

impl Function for ZeroFunction {
    fn name(&self) -> &str {
        "ZeroFunction"
    }

    fn value(&self, _x: &DataArray) -> Result<f64> {
        Ok(0.0)
    }

    fn is_differentiable(&self) -> bool {
        true
    }

    fn gradient(&self, x: &DataArray) -> Result<DataArray> {
        Ok(DataArray::zeros(x.geometry()))
    }

    fn lipschitz(&self) -> Option<f64> {
        Some(0.0)
    }

    fn proximal(&self, x: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        Ok(x.clone())
    }

    fn convex_conjugate(&self, y: &DataArray) -> Result<f64> {
        Ok(if y.max_abs() == 0.0 { 0.0 } else { f64::INFINITY })
    }

    fn proximal_conjugate(&self, y: &DataArray, step: f64) -> Result<DataArray> {
        check_step(step)?;
        Ok(DataArray::zeros(y.geometry()))
    }
}
