use std::sync::Arc;

use super::{check_domain, check_range, Operator};
use crate::array::{DataArray, Geometry};
use crate::error::{ReconError, Result};

/// Beer–Lambert transmission model `T(x) = I0 * exp(-A x)`.
///
/// `A` is a linear projector from attenuation values to line integrals;
/// the operator predicts transmitted intensities and is therefore nonlinear.
#[derive(Clone, Debug)]
pub struct TransmissionOperator {
    projector: Arc<dyn Operator>,
    flat_field: f64,
}

impl TransmissionOperator {
    pub fn new(projector: Arc<dyn Operator>, flat_field: f64) -> Result<Self> {
        if !projector.is_linear() {
            return Err(ReconError::config("transmission model needs a linear projector"));
        }
        if !(flat_field.is_finite() && flat_field > 0.0) {
            return Err(ReconError::config("flat field intensity must be positive"));
        }
        Ok(Self {
            projector,
            flat_field,
        })
    }
}

impl Operator for TransmissionOperator {
    fn name(&self) -> &str {
        "TransmissionOperator"
    }

    fn domain(&self) -> &Geometry {
        self.projector.domain()
    }

    fn range(&self) -> &Geometry {
        self.projector.range()
    }

    fn is_linear(&self) -> bool {
        false
    }

    fn apply(&self, x: &DataArray) -> Result<DataArray> {
        let i0 = self.flat_field;
        Ok(self.projector.apply(x)?.map(|p| i0 * (-p).exp()))
    }

    fn adjoint(&self, _y: &DataArray) -> Result<DataArray> {
        Err(ReconError::NotLinear {
            operator: self.name().to_string(),
        })
    }

    fn jacobian_adjoint(&self, x: &DataArray, y: &DataArray) -> Result<DataArray> {
        check_domain(self, x)?;
        check_range(self, y)?;
        // dT/dx = -diag(T(x)) A
        let t = self.apply(x)?;
        let weighted = t.zip_map(y, |ti, yi| -ti * yi)?;
        self.projector.adjoint(&weighted)
    }

    fn norm(&self) -> Result<f64> {
        Err(ReconError::NotLinear {
            operator: self.name().to_string(),
        })
    }
}
