use ndarray::{Array1, Array2};

use super::{check_domain, check_range, estimate_norm, NormCache, Operator, PowerMethod};
use crate::array::{AxisLabel, DataArray, Geometry};
use crate::error::{ReconError, Result};

/// Dense system matrix `A` of shape (M, N).
///
/// Row `i` holds the weights of every voxel on ray `i`; `apply` forward
/// projects a volume of N voxels to M ray sums and `adjoint` back projects.
/// The domain and range geometries only need to agree with N and M in size,
/// values are read and written in row-major order.
#[derive(Clone, Debug)]
pub struct MatrixOperator {
    matrix: Array2<f64>,
    domain: Geometry,
    range: Geometry,
    norm: NormCache,
}

impl MatrixOperator {
    pub fn new(matrix: Array2<f64>, domain: Geometry, range: Geometry) -> Result<Self> {
        let (m, n) = matrix.dim();
        if domain.size() != n {
            return Err(ReconError::shape(
                "MatrixOperator: matrix columns vs domain size",
                n,
                domain.size(),
            ));
        }
        if range.size() != m {
            return Err(ReconError::shape(
                "MatrixOperator: matrix rows vs range size",
                m,
                range.size(),
            ));
        }
        Ok(Self {
            matrix,
            domain,
            range,
            norm: NormCache::new(),
        })
    }

    /// Plain `voxel -> ray` vector geometries.
    pub fn from_matrix(matrix: Array2<f64>) -> Result<Self> {
        let (m, n) = matrix.dim();
        let domain = Geometry::vector(AxisLabel::Custom("voxel".into()), n)?;
        let range = Geometry::vector(AxisLabel::Custom("ray".into()), m)?;
        Self::new(matrix, domain, range)
    }

    pub fn with_norm(self, bound: f64) -> Self {
        Self {
            norm: NormCache::preset(bound),
            ..self
        }
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }
}

fn flatten(x: &DataArray) -> Array1<f64> {
    x.data().iter().copied().collect()
}

impl Operator for MatrixOperator {
    fn name(&self) -> &str {
        "MatrixOperator"
    }

    fn domain(&self) -> &Geometry {
        &self.domain
    }

    fn range(&self) -> &Geometry {
        &self.range
    }

    fn apply(&self, x: &DataArray) -> Result<DataArray> {
        check_domain(self, x)?;
        // y_i = sum_j A_ij * x_j
        let y = self.matrix.dot(&flatten(x));
        DataArray::from_vec(self.range.clone(), y.to_vec())
    }

    fn adjoint(&self, y: &DataArray) -> Result<DataArray> {
        check_range(self, y)?;
        let x = self.matrix.t().dot(&flatten(y));
        DataArray::from_vec(self.domain.clone(), x.to_vec())
    }

    fn norm(&self) -> Result<f64> {
        self.norm
            .get_or_estimate(|| estimate_norm(self, &PowerMethod::default()))
    }
}
