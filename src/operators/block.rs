use std::sync::Arc;

use ndarray::{ArrayD, Axis, IxDyn};

use super::{check_domain, check_range, Operator};
use crate::array::{AxisLabel, DataArray, Geometry};
use crate::error::{ReconError, Result};

/// Flat concatenation of several array spaces along one `block` axis.
///
/// Parts keep their own geometries; `split` and `concat` convert between the
/// concatenated array and the per-part arrays.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockLayout {
    parts: Vec<Geometry>,
    offsets: Vec<usize>,
    geometry: Geometry,
}

impl BlockLayout {
    pub fn new(parts: Vec<Geometry>) -> Result<Self> {
        if parts.is_empty() {
            return Err(ReconError::config("block layout needs at least one part"));
        }
        let mut offsets = Vec::with_capacity(parts.len());
        let mut total = 0;
        for p in &parts {
            offsets.push(total);
            total += p.size();
        }
        Ok(Self {
            geometry: Geometry::vector(AxisLabel::Block, total)?,
            parts,
            offsets,
        })
    }

    /// Geometry of the concatenated array.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn parts(&self) -> &[Geometry] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn check_index(&self, i: usize) -> Result<()> {
        if i < self.parts.len() {
            Ok(())
        } else {
            Err(ReconError::config(format!(
                "block index {i} out of range for {} parts",
                self.parts.len()
            )))
        }
    }

    /// Extract part `i` from a concatenated array.
    pub fn part(&self, y: &DataArray, i: usize) -> Result<DataArray> {
        y.ensure_geometry(&self.geometry, "BlockLayout::part")?;
        self.check_index(i)?;
        let len = self.parts[i].size();
        let values = y.data().iter().skip(self.offsets[i]).take(len).copied().collect();
        DataArray::from_vec(self.parts[i].clone(), values)
    }

    /// Overwrite part `i` of a concatenated array.
    pub fn set_part(&self, y: &mut DataArray, i: usize, value: &DataArray) -> Result<()> {
        y.ensure_geometry(&self.geometry, "BlockLayout::set_part")?;
        self.check_index(i)?;
        value.ensure_geometry(&self.parts[i], "BlockLayout::set_part")?;
        let len = self.parts[i].size();
        for (dst, src) in y
            .data_mut()
            .iter_mut()
            .skip(self.offsets[i])
            .take(len)
            .zip(value.data().iter())
        {
            *dst = *src;
        }
        Ok(())
    }

    pub fn split(&self, y: &DataArray) -> Result<Vec<DataArray>> {
        (0..self.parts.len()).map(|i| self.part(y, i)).collect()
    }

    pub fn concat(&self, parts: &[DataArray]) -> Result<DataArray> {
        if parts.len() != self.parts.len() {
            return Err(ReconError::shape("BlockLayout::concat", self.parts.len(), parts.len()));
        }
        let mut values = Vec::with_capacity(self.geometry.size());
        for (p, g) in parts.iter().zip(&self.parts) {
            p.ensure_geometry(g, "BlockLayout::concat")?;
            values.extend(p.data().iter().copied());
        }
        DataArray::from_vec(self.geometry.clone(), values)
    }
}

/// Operators sharing one domain, stacked into a concatenated range.
///
/// `K x = [K_0 x; K_1 x; ...]` and `K* y = sum_i K_i* y_i`.
#[derive(Clone, Debug)]
pub struct BlockOperator {
    ops: Vec<Arc<dyn Operator>>,
    layout: BlockLayout,
}

impl BlockOperator {
    pub fn new(ops: Vec<Arc<dyn Operator>>) -> Result<Self> {
        let first = ops
            .first()
            .ok_or_else(|| ReconError::config("block operator needs at least one operator"))?;
        for op in &ops[1..] {
            first
                .domain()
                .ensure_matches(op.domain(), "BlockOperator: shared domain")?;
        }
        let layout = BlockLayout::new(ops.iter().map(|op| op.range().clone()).collect())?;
        Ok(Self { ops, layout })
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn operators(&self) -> &[Arc<dyn Operator>] {
        &self.ops
    }

    pub fn get(&self, i: usize) -> Option<&Arc<dyn Operator>> {
        self.ops.get(i)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn part_norms(&self) -> Result<Vec<f64>> {
        self.ops.iter().map(|op| op.norm()).collect()
    }
}

impl Operator for BlockOperator {
    fn name(&self) -> &str {
        "BlockOperator"
    }

    fn domain(&self) -> &Geometry {
        self.ops[0].domain()
    }

    fn range(&self) -> &Geometry {
        self.layout.geometry()
    }

    fn is_linear(&self) -> bool {
        self.ops.iter().all(|op| op.is_linear())
    }

    fn apply(&self, x: &DataArray) -> Result<DataArray> {
        let parts = self
            .ops
            .iter()
            .map(|op| op.apply(x))
            .collect::<Result<Vec<_>>>()?;
        self.layout.concat(&parts)
    }

    fn adjoint(&self, y: &DataArray) -> Result<DataArray> {
        let parts = self.layout.split(y)?;
        let mut acc = DataArray::zeros(self.domain());
        for (op, part) in self.ops.iter().zip(&parts) {
            acc.add_scaled(1.0, &op.adjoint(part)?)?;
        }
        Ok(acc)
    }

    fn jacobian_adjoint(&self, x: &DataArray, y: &DataArray) -> Result<DataArray> {
        let parts = self.layout.split(y)?;
        let mut acc = DataArray::zeros(self.domain());
        for (op, part) in self.ops.iter().zip(&parts) {
            acc.add_scaled(1.0, &op.jacobian_adjoint(x, part)?)?;
        }
        Ok(acc)
    }

    fn norm(&self) -> Result<f64> {
        // ||K||^2 <= sum_i ||K_i||^2
        Ok(self.part_norms()?.iter().map(|n| n * n).sum::<f64>().sqrt())
    }
}

/// One operator applied independently to every slice of a leading
/// `channel` axis.
#[derive(Clone, Debug)]
pub struct ChannelwiseOperator {
    inner: Arc<dyn Operator>,
    channels: usize,
    domain: Geometry,
    range: Geometry,
}

impl ChannelwiseOperator {
    pub fn new(inner: Arc<dyn Operator>, channels: usize) -> Result<Self> {
        let domain = inner.domain().with_leading(AxisLabel::Channel, channels)?;
        let range = inner.range().with_leading(AxisLabel::Channel, channels)?;
        Ok(Self {
            inner,
            channels,
            domain,
            range,
        })
    }

    fn per_channel<F>(&self, input: &DataArray, from: &Geometry, to: &Geometry, f: F) -> Result<DataArray>
    where
        F: Fn(&DataArray) -> Result<DataArray>,
    {
        let mut out = ArrayD::<f64>::zeros(IxDyn(&to.shape()));
        let inner_from = from.without_axis(&AxisLabel::Channel)?;
        for c in 0..self.channels {
            let slice = input.data().index_axis(Axis(0), c).to_owned();
            let mapped = f(&DataArray::from_array(inner_from.clone(), slice)?)?;
            out.index_axis_mut(Axis(0), c).assign(mapped.data());
        }
        DataArray::from_array(to.clone(), out)
    }
}

impl Operator for ChannelwiseOperator {
    fn name(&self) -> &str {
        "ChannelwiseOperator"
    }

    fn domain(&self) -> &Geometry {
        &self.domain
    }

    fn range(&self) -> &Geometry {
        &self.range
    }

    fn is_linear(&self) -> bool {
        self.inner.is_linear()
    }

    fn apply(&self, x: &DataArray) -> Result<DataArray> {
        check_domain(self, x)?;
        self.per_channel(x, &self.domain, &self.range, |s| self.inner.apply(s))
    }

    fn adjoint(&self, y: &DataArray) -> Result<DataArray> {
        check_range(self, y)?;
        self.per_channel(y, &self.range, &self.domain, |s| self.inner.adjoint(s))
    }

    fn jacobian_adjoint(&self, x: &DataArray, y: &DataArray) -> Result<DataArray> {
        check_domain(self, x)?;
        check_range(self, y)?;
        let mut out = ArrayD::<f64>::zeros(IxDyn(&self.domain.shape()));
        let inner_domain = self.domain.without_axis(&AxisLabel::Channel)?;
        let inner_range = self.range.without_axis(&AxisLabel::Channel)?;
        for c in 0..self.channels {
            let xc = DataArray::from_array(inner_domain.clone(), x.data().index_axis(Axis(0), c).to_owned())?;
            let yc = DataArray::from_array(inner_range.clone(), y.data().index_axis(Axis(0), c).to_owned())?;
            let mapped = self.inner.jacobian_adjoint(&xc, &yc)?;
            out.index_axis_mut(Axis(0), c).assign(mapped.data());
        }
        DataArray::from_array(self.domain.clone(), out)
    }

    fn norm(&self) -> Result<f64> {
        self.inner.norm()
    }
}
