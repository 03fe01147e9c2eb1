use std::sync::Arc;

use log::info;

use super::preconditioner::safe_reciprocal;
use super::{Algorithm, SolverOptions, StepSize};
use crate::array::DataArray;
use crate::error::{ReconError, Result};
use crate::functions::IndicatorBox;
use crate::operators::Operator;

/// Simultaneous iterative reconstruction technique.
///
/// `x <- P_box(x + lambda C A*(R (b - A x)))` with `R = 1/A(1)` the inverse
/// ray sums and `C = 1/A*(1)` the inverse voxel sensitivities. Rays and
/// voxels with a zero sum are left out of the update. A fixed
/// `initial_step` is used as the relaxation `lambda`, otherwise 1.
#[derive(Debug)]
pub struct Sirt {
    operator: Arc<dyn Operator>,
    data: DataArray,
    x: DataArray,
    row_weights: DataArray,
    column_weights: DataArray,
    relaxation: f64,
    constraint: Option<IndicatorBox>,
    options: SolverOptions,
}

impl Sirt {
    pub fn new(operator: Arc<dyn Operator>, data: DataArray, x0: DataArray, options: &SolverOptions) -> Result<Self> {
        options.validate()?;
        options.reject_acceleration("SIRT")?;
        if !operator.is_linear() {
            return Err(ReconError::NotLinear {
                operator: operator.name().to_string(),
            });
        }
        data.ensure_geometry(operator.range(), "SIRT data")?;
        x0.ensure_geometry(operator.domain(), "SIRT initial iterate")?;

        let relaxation = match options.initial_step {
            StepSize::Auto => 1.0,
            StepSize::Fixed(l) if l < 2.0 => l,
            StepSize::Fixed(l) => {
                return Err(ReconError::config(format!(
                    "SIRT relaxation must lie in (0, 2), got {l}"
                )))
            }
        };
        let row_weights = safe_reciprocal(&operator.apply(&DataArray::full(operator.domain(), 1.0))?);
        let column_weights = safe_reciprocal(&operator.adjoint(&DataArray::full(operator.range(), 1.0))?);
        info!("SIRT configured with relaxation {relaxation}");
        Ok(Self {
            operator,
            data,
            x: x0,
            row_weights,
            column_weights,
            relaxation,
            constraint: None,
            options: *options,
        })
    }

    /// Project every iterate onto `[lower, upper]`.
    pub fn with_bounds(self, lower: f64, upper: f64) -> Result<Self> {
        Ok(Self {
            constraint: Some(IndicatorBox::new(lower, upper)?),
            ..self
        })
    }

    pub fn relaxation(&self) -> f64 {
        self.relaxation
    }
}

impl Algorithm for Sirt {
    fn name(&self) -> &'static str {
        "sirt"
    }

    fn update(&mut self) -> Result<()> {
        let residual = self.data.sub(&self.operator.apply(&self.x)?)?;
        let correction = self
            .operator
            .adjoint(&residual.mul(&self.row_weights)?)?
            .mul(&self.column_weights)?;
        self.x.add_scaled(self.relaxation, &correction)?;
        if let Some(c) = &self.constraint {
            self.x = c.project(&self.x);
        }
        Ok(())
    }

    fn solution(&self) -> &DataArray {
        &self.x
    }

    /// `1/2 ||A x - b||^2`
    fn objective(&self) -> Result<f64> {
        Ok(0.5 * self.operator.apply(&self.x)?.sub(&self.data)?.squared_norm())
    }

    fn built_with(&self) -> Option<&SolverOptions> {
        Some(&self.options)
    }
}
