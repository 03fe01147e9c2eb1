use ndarray::{ArrayD, Axis, IxDyn, Slice};

use super::{check_domain, check_range, Operator};
use crate::array::{AxisLabel, DataArray, Geometry};
use crate::error::{ReconError, Result};

/// Forward finite differences with Neumann boundary.
///
/// The range gains a leading `direction` axis with one component per
/// differentiated axis. The adjoint is the negative divergence.
#[derive(Clone, Debug)]
pub struct GradientOperator {
    domain: Geometry,
    range: Geometry,
    /// Indices (in the domain) of the differentiated axes.
    axes: Vec<usize>,
    voxel_sizes: Vec<f64>,
}

impl GradientOperator {
    /// Differentiate along every axis except `channel`.
    pub fn new(domain: Geometry) -> Result<Self> {
        let labels: Vec<AxisLabel> = domain
            .axes()
            .iter()
            .map(|a| a.label.clone())
            .filter(|l| *l != AxisLabel::Channel)
            .collect();
        Self::along(domain, &labels)
    }

    /// Differentiate along the given axes, in that order.
    pub fn along(domain: Geometry, labels: &[AxisLabel]) -> Result<Self> {
        if labels.is_empty() {
            return Err(ReconError::config("gradient needs at least one axis"));
        }
        let axes = labels
            .iter()
            .map(|l| {
                domain
                    .index_of(l)
                    .ok_or_else(|| ReconError::config(format!("gradient axis '{l}' not in domain")))
            })
            .collect::<Result<Vec<_>>>()?;
        let range = domain.with_leading(AxisLabel::Direction, axes.len())?;
        Ok(Self {
            voxel_sizes: vec![1.0; axes.len()],
            domain,
            range,
            axes,
        })
    }

    pub fn with_voxel_sizes(mut self, sizes: Vec<f64>) -> Result<Self> {
        if sizes.len() != self.axes.len() {
            return Err(ReconError::shape(
                "GradientOperator voxel sizes",
                self.axes.len(),
                sizes.len(),
            ));
        }
        if sizes.iter().any(|h| !(h.is_finite() && *h > 0.0)) {
            return Err(ReconError::config("voxel sizes must be positive"));
        }
        self.voxel_sizes = sizes;
        Ok(self)
    }

    pub fn directions(&self) -> usize {
        self.axes.len()
    }
}

impl Operator for GradientOperator {
    fn name(&self) -> &str {
        "GradientOperator"
    }

    fn domain(&self) -> &Geometry {
        &self.domain
    }

    fn range(&self) -> &Geometry {
        &self.range
    }

    fn apply(&self, x: &DataArray) -> Result<DataArray> {
        check_domain(self, x)?;
        let mut out = ArrayD::<f64>::zeros(IxDyn(&self.range.shape()));
        for (d, (&ax, &h)) in self.axes.iter().zip(&self.voxel_sizes).enumerate() {
            let n = self.domain.axes()[ax].len;
            if n < 2 {
                continue;
            }
            let src = x.data();
            let ahead = src.slice_axis(Axis(ax), Slice::from(1..n));
            let here = src.slice_axis(Axis(ax), Slice::from(..n - 1));
            let mut comp = out.index_axis_mut(Axis(0), d);
            let mut dst = comp.slice_axis_mut(Axis(ax), Slice::from(..n - 1));
            dst.assign(&((&ahead - &here) / h));
        }
        DataArray::from_array(self.range.clone(), out)
    }

    fn adjoint(&self, y: &DataArray) -> Result<DataArray> {
        check_range(self, y)?;
        let mut out = ArrayD::<f64>::zeros(IxDyn(&self.domain.shape()));
        for (d, (&ax, &h)) in self.axes.iter().zip(&self.voxel_sizes).enumerate() {
            let n = self.domain.axes()[ax].len;
            if n < 2 {
                continue;
            }
            let comp = y.data().index_axis(Axis(0), d);
            let inner = comp.slice_axis(Axis(ax), Slice::from(..n - 1)).mapv(|v| v / h);
            // (D^T y)_i = y_{i-1} - y_i, the last row of D is zero
            {
                let mut lead = out.slice_axis_mut(Axis(ax), Slice::from(..n - 1));
                lead -= &inner;
            }
            let mut tail = out.slice_axis_mut(Axis(ax), Slice::from(1..n));
            tail += &inner;
        }
        DataArray::from_array(self.domain.clone(), out)
    }

    fn norm(&self) -> Result<f64> {
        Ok(self
            .voxel_sizes
            .iter()
            .map(|h| 4.0 / (h * h))
            .sum::<f64>()
            .sqrt())
    }
}
