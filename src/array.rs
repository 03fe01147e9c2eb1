//! Labelled N-dimensional arrays, the common currency of the engine.
//!
//! A [`Geometry`] is an ordered list of labelled axes with fixed lengths. A
//! [`DataArray`] couples an `ndarray::ArrayD<f64>` with the geometry it was
//! built for. Nothing broadcasts: every mismatch is a
//! [`ReconError::ShapeMismatch`].

use std::fmt;

use ndarray::{ArrayD, IxDyn, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{ReconError, Result};

/// Semantic label attached to one axis of a [`Geometry`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisLabel {
    Channel,
    Vertical,
    HorizontalY,
    HorizontalX,
    Angle,
    Horizontal,
    /// Component axis of a vector field, e.g. the output of a gradient.
    Direction,
    /// Concatenation axis of a block operator range.
    Block,
    Custom(String),
}

impl fmt::Display for AxisLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisLabel::Channel => write!(f, "channel"),
            AxisLabel::Vertical => write!(f, "vertical"),
            AxisLabel::HorizontalY => write!(f, "horizontal_y"),
            AxisLabel::HorizontalX => write!(f, "horizontal_x"),
            AxisLabel::Angle => write!(f, "angle"),
            AxisLabel::Horizontal => write!(f, "horizontal"),
            AxisLabel::Direction => write!(f, "direction"),
            AxisLabel::Block => write!(f, "block"),
            AxisLabel::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// One labelled axis and its length.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxisSpec {
    pub label: AxisLabel,
    pub len: usize,
}

/// Ordered, labelled axis signature of an array space.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "GeometryRepr", into = "GeometryRepr")]
pub struct Geometry {
    axes: Vec<AxisSpec>,
}

#[derive(Serialize, Deserialize)]
struct GeometryRepr {
    axes: Vec<AxisSpec>,
}

impl TryFrom<GeometryRepr> for Geometry {
    type Error = ReconError;

    fn try_from(repr: GeometryRepr) -> Result<Self> {
        Geometry::from_axes(repr.axes)
    }
}

impl From<Geometry> for GeometryRepr {
    fn from(geometry: Geometry) -> Self {
        GeometryRepr {
            axes: geometry.axes,
        }
    }
}

impl Geometry {
    /// Build a geometry from `(label, length)` pairs.
    ///
    /// Labels must be unique and every length must be non-zero.
    pub fn new<I>(axes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (AxisLabel, usize)>,
    {
        Self::from_axes(
            axes.into_iter()
                .map(|(label, len)| AxisSpec { label, len })
                .collect(),
        )
    }

    pub fn from_axes(axes: Vec<AxisSpec>) -> Result<Self> {
        if axes.is_empty() {
            return Err(ReconError::config("geometry needs at least one axis"));
        }
        for (i, axis) in axes.iter().enumerate() {
            if axis.len == 0 {
                return Err(ReconError::config(format!(
                    "axis '{}' has zero length",
                    axis.label
                )));
            }
            if axes[..i].iter().any(|other| other.label == axis.label) {
                return Err(ReconError::config(format!(
                    "duplicate axis label '{}'",
                    axis.label
                )));
            }
        }
        Ok(Self { axes })
    }

    /// One-dimensional geometry.
    pub fn vector(label: AxisLabel, len: usize) -> Result<Self> {
        Self::new([(label, len)])
    }

    pub fn axes(&self) -> &[AxisSpec] {
        &self.axes
    }

    pub fn labels(&self) -> Vec<&AxisLabel> {
        self.axes.iter().map(|a| &a.label).collect()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(|a| a.len).collect()
    }

    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.axes.iter().map(|a| a.len).product()
    }

    pub fn index_of(&self, label: &AxisLabel) -> Option<usize> {
        self.axes.iter().position(|a| &a.label == label)
    }

    pub fn len_of(&self, label: &AxisLabel) -> Option<usize> {
        self.index_of(label).map(|i| self.axes[i].len)
    }

    /// New geometry with an extra axis in front.
    pub fn with_leading(&self, label: AxisLabel, len: usize) -> Result<Self> {
        let mut axes = Vec::with_capacity(self.axes.len() + 1);
        axes.push(AxisSpec { label, len });
        axes.extend(self.axes.iter().cloned());
        Self::from_axes(axes)
    }

    /// New geometry with `label` removed.
    pub fn without_axis(&self, label: &AxisLabel) -> Result<Self> {
        let axes: Vec<AxisSpec> = self
            .axes
            .iter()
            .filter(|a| &a.label != label)
            .cloned()
            .collect();
        if axes.len() == self.axes.len() {
            return Err(ReconError::config(format!("geometry has no '{label}' axis")));
        }
        Self::from_axes(axes)
    }

    pub fn ensure_matches(&self, other: &Geometry, context: &str) -> Result<()> {
        if self == other {
            Ok(())
        } else {
            Err(ReconError::shape(context, self, other))
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, axis) in self.axes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", axis.label, axis.len)?;
        }
        write!(f, ")")
    }
}

/// N-dimensional `f64` data bound to a [`Geometry`].
#[derive(Clone, Debug, PartialEq)]
pub struct DataArray {
    geometry: Geometry,
    data: ArrayD<f64>,
}

impl DataArray {
    pub fn from_array(geometry: Geometry, data: ArrayD<f64>) -> Result<Self> {
        if data.shape() != geometry.shape().as_slice() {
            return Err(ReconError::shape(
                "DataArray::from_array",
                geometry.shape(),
                data.shape(),
            ));
        }
        Ok(Self { geometry, data })
    }

    /// Build from row-major values.
    pub fn from_vec(geometry: Geometry, values: Vec<f64>) -> Result<Self> {
        let shape = geometry.shape();
        let found = values.len();
        let data = ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|_| ReconError::shape("DataArray::from_vec", geometry.size(), found))?;
        Ok(Self { geometry, data })
    }

    pub fn zeros(geometry: &Geometry) -> Self {
        Self::full(geometry, 0.0)
    }

    pub fn full(geometry: &Geometry, value: f64) -> Self {
        Self {
            data: ArrayD::from_elem(IxDyn(&geometry.shape()), value),
            geometry: geometry.clone(),
        }
    }

    /// Same geometry, different contents. Shape of `data` must match.
    pub fn with_data(&self, data: ArrayD<f64>) -> Result<Self> {
        Self::from_array(self.geometry.clone(), data)
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ArrayD<f64> {
        &mut self.data
    }

    pub fn into_data(self) -> ArrayD<f64> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn ensure_geometry(&self, expected: &Geometry, context: &str) -> Result<()> {
        expected.ensure_matches(&self.geometry, context)
    }

    fn ensure_same(&self, other: &DataArray, context: &str) -> Result<()> {
        self.geometry.ensure_matches(&other.geometry, context)
    }

    pub fn dot(&self, other: &DataArray) -> Result<f64> {
        self.ensure_same(other, "dot")?;
        Ok(Zip::from(&self.data)
            .and(&other.data)
            .fold(0.0, |acc, &a, &b| acc + a * b))
    }

    pub fn squared_norm(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum()
    }

    pub fn norm(&self) -> f64 {
        self.squared_norm().sqrt()
    }

    /// `a * self + b * y`
    pub fn sapyb(&self, a: f64, y: &DataArray, b: f64) -> Result<DataArray> {
        self.ensure_same(y, "sapyb")?;
        let mut out = self.clone();
        Zip::from(&mut out.data)
            .and(&y.data)
            .for_each(|o, &yv| *o = a * *o + b * yv);
        Ok(out)
    }

    /// `self += alpha * other`
    pub fn add_scaled(&mut self, alpha: f64, other: &DataArray) -> Result<()> {
        self.ensure_same(other, "add_scaled")?;
        self.data.scaled_add(alpha, &other.data);
        Ok(())
    }

    pub fn scale(&mut self, alpha: f64) {
        self.data.mapv_inplace(|v| v * alpha);
    }

    pub fn scaled(&self, alpha: f64) -> DataArray {
        let mut out = self.clone();
        out.scale(alpha);
        out
    }

    pub fn sub(&self, other: &DataArray) -> Result<DataArray> {
        self.sapyb(1.0, other, -1.0)
    }

    pub fn add(&self, other: &DataArray) -> Result<DataArray> {
        self.sapyb(1.0, other, 1.0)
    }

    /// Elementwise product.
    pub fn mul(&self, other: &DataArray) -> Result<DataArray> {
        self.ensure_same(other, "mul")?;
        let mut out = self.clone();
        out.data *= &other.data;
        Ok(out)
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> DataArray {
        DataArray {
            geometry: self.geometry.clone(),
            data: self.data.mapv(f),
        }
    }

    /// Elementwise combination with an array of the same geometry.
    pub fn zip_map(&self, other: &DataArray, f: impl Fn(f64, f64) -> f64) -> Result<DataArray> {
        self.ensure_same(other, "zip_map")?;
        let mut out = self.clone();
        Zip::from(&mut out.data)
            .and(&other.data)
            .for_each(|o, &b| *o = f(*o, b));
        Ok(out)
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn sum(&self) -> f64 {
        self.data.sum()
    }

    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0, |m, v| m.max(v.abs()))
    }

    /// Flat index of the first NaN or infinite element.
    pub fn first_non_finite(&self) -> Option<usize> {
        self.data.iter().position(|v| !v.is_finite())
    }

    pub fn is_finite(&self) -> bool {
        self.first_non_finite().is_none()
    }

    /// Row-major copy of the values.
    pub fn to_vec(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }
}
