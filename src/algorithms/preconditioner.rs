use crate::array::DataArray;
use crate::error::{ReconError, Result};
use crate::operators::Operator;

/// Diagonal scaling applied to gradient updates.
#[derive(Clone, Debug)]
pub struct Preconditioner {
    diagonal: DataArray,
}

impl Preconditioner {
    pub fn diagonal(diagonal: DataArray) -> Result<Self> {
        if diagonal.data().iter().any(|d| !(d.is_finite() && *d >= 0.0)) {
            return Err(ReconError::config("preconditioner entries must be finite and non-negative"));
        }
        Ok(Self { diagonal })
    }

    /// `1 / A*(1)`, the inverse column sums of a non-negative projector.
    ///
    /// Voxels no ray touches get a zero entry and are left unchanged.
    pub fn sensitivity(op: &dyn Operator) -> Result<Self> {
        let ones = DataArray::full(op.range(), 1.0);
        let sens = op.adjoint(&ones)?;
        Ok(Self {
            diagonal: safe_reciprocal(&sens),
        })
    }

    pub fn values(&self) -> &DataArray {
        &self.diagonal
    }

    pub fn apply(&self, gradient: &DataArray) -> Result<DataArray> {
        gradient.mul(&self.diagonal)
    }
}

/// `1 / v` where `v > 0`, zero elsewhere.
pub(crate) fn safe_reciprocal(v: &DataArray) -> DataArray {
    v.map(|s| if s > 0.0 { 1.0 / s } else { 0.0 })
}
