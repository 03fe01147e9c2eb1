//! Forward models and their adjoints.
//!
//! Every operator maps a declared domain [`Geometry`] to a declared range
//! geometry and must satisfy `<A x, y> = <x, A* y>`. Operators are immutable
//! once built and are shared between algorithms behind `Arc<dyn Operator>`.

mod basic;
mod block;
mod blurring;
mod gradient;
mod matrix;
mod power_method;
mod transmission;

use std::fmt;
use std::sync::OnceLock;

use crate::array::{DataArray, Geometry};
use crate::error::Result;

pub use basic::{CompositionOperator, DiagonalOperator, IdentityOperator, ScaledOperator, SumOperator};
pub use block::{BlockLayout, BlockOperator, ChannelwiseOperator};
pub use blurring::BlurringOperator;
pub use gradient::GradientOperator;
pub use matrix::MatrixOperator;
pub use power_method::{check_adjoint, estimate_norm, AdjointReport, PowerMethod};
pub use transmission::TransmissionOperator;


/// A (possibly nonlinear) mapping between two array spaces.
pub trait Operator: Send + Sync + fmt::Debug {
    /// Short identifier used in diagnostics.
    fn name(&self) -> &str;

    fn domain(&self) -> &Geometry;

    fn range(&self) -> &Geometry;

    fn is_linear(&self) -> bool {
        true
    }

    /// Forward application `A(x)`.
    fn apply(&self, x: &DataArray) -> Result<DataArray>;

    /// Adjoint application `A*(y)`. Nonlinear operators return
    /// [`ReconError::NotLinear`](crate::ReconError::NotLinear).
    fn adjoint(&self, y: &DataArray) -> Result<DataArray>;

    /// Adjoint of the derivative of `A` at `x`, applied to `y`.
    fn jacobian_adjoint(&self, _x: &DataArray, y: &DataArray) -> Result<DataArray> {
        self.adjoint(y)
    }

    /// Upper bound on the spectral norm.
    ///
    /// Falls back to an uncached power iteration; operators that can afford
    /// it override this with an analytic bound or a cached estimate.
    fn norm(&self) -> Result<f64> {
        estimate_norm(self, &PowerMethod::default())
    }
}

/// Write-once storage for a norm estimate.
#[derive(Clone, Debug, Default)]
pub struct NormCache(OnceLock<f64>);

impl NormCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache that already holds a caller-supplied bound.
    pub fn preset(value: f64) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(value);
        Self(cell)
    }

    pub fn get(&self) -> Option<f64> {
        self.0.get().copied()
    }

    pub fn get_or_estimate(&self, estimate: impl FnOnce() -> Result<f64>) -> Result<f64> {
        if let Some(v) = self.0.get() {
            return Ok(*v);
        }
        let v = estimate()?;
        // A concurrent caller may have won the race; either value is valid.
        let _ = self.0.set(v);
        Ok(self.0.get().copied().unwrap_or(v))
    }
}

pub(crate) fn check_domain<O: Operator + ?Sized>(op: &O, x: &DataArray) -> Result<()> {
    x.ensure_geometry(op.domain(), op.name())
}

pub(crate) fn check_range<O: Operator + ?Sized>(op: &O, y: &DataArray) -> Result<()> {
    y.ensure_geometry(op.range(), op.name())
}
