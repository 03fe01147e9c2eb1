use ndarray::Array2;

use super::{check_domain, check_range, Operator};
use crate::array::{DataArray, Geometry};
use crate::error::{ReconError, Result};

/// Convolution of the last two axes with a point-spread function.
///
/// The image is zero-extended outside its support so that the adjoint is
/// exactly the convolution with the PSF rotated by 180 degrees. Leading axes
/// (channels, slices) are blurred independently.
#[derive(Clone, Debug)]
pub struct BlurringOperator {
    psf: Array2<f64>,
    geometry: Geometry,
}

impl BlurringOperator {
    pub fn new(psf: Array2<f64>, geometry: Geometry) -> Result<Self> {
        let (ka, kb) = psf.dim();
        if ka % 2 == 0 || kb % 2 == 0 {
            return Err(ReconError::config(format!(
                "PSF must have odd side lengths, got {ka}x{kb}"
            )));
        }
        if geometry.ndim() < 2 {
            return Err(ReconError::config("blurring needs at least two axes"));
        }
        if psf.iter().any(|v| !v.is_finite()) {
            return Err(ReconError::config("PSF contains non-finite values"));
        }
        Ok(Self { psf, geometry })
    }

    /// Normalised isotropic Gaussian PSF of side `size` (odd).
    pub fn gaussian(size: usize, sigma: f64, geometry: Geometry) -> Result<Self> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(ReconError::config("Gaussian PSF needs sigma > 0"));
        }
        let c = (size as f64 - 1.0) / 2.0;
        let mut psf = Array2::from_shape_fn((size, size), |(a, b)| {
            let (da, db) = (a as f64 - c, b as f64 - c);
            (-(da * da + db * db) / (2.0 * sigma * sigma)).exp()
        });
        let total = psf.sum();
        psf.mapv_inplace(|v| v / total);
        Self::new(psf, geometry)
    }

    pub fn psf(&self) -> &Array2<f64> {
        &self.psf
    }

    fn convolve(&self, input: &DataArray, adjoint: bool) -> Result<DataArray> {
        let shape = self.geometry.shape();
        let nd = shape.len();
        let (ny, nx) = (shape[nd - 2], shape[nd - 1]);
        let plane = ny * nx;
        let batches = self.geometry.size() / plane;
        let (ka, kb) = self.psf.dim();
        let (ca, cb) = ((ka / 2) as isize, (kb / 2) as isize);
        let src = input.to_vec();
        let mut dst = vec![0.0; src.len()];

        for batch in 0..batches {
            let off = batch * plane;
            for i in 0..ny as isize {
                for j in 0..nx as isize {
                    let mut acc = 0.0;
                    for a in 0..ka as isize {
                        for b in 0..kb as isize {
                            let (si, sj) = if adjoint {
                                (i + a - ca, j + b - cb)
                            } else {
                                (i - a + ca, j - b + cb)
                            };
                            if si < 0 || sj < 0 || si >= ny as isize || sj >= nx as isize {
                                continue;
                            }
                            acc += self.psf[[a as usize, b as usize]]
                                * src[off + si as usize * nx + sj as usize];
                        }
                    }
                    dst[off + i as usize * nx + j as usize] = acc;
                }
            }
        }
        DataArray::from_vec(self.geometry.clone(), dst)
    }
}

impl Operator for BlurringOperator {
    fn name(&self) -> &str {
        "BlurringOperator"
    }

    fn domain(&self) -> &Geometry {
        &self.geometry
    }

    fn range(&self) -> &Geometry {
        &self.geometry
    }

    fn apply(&self, x: &DataArray) -> Result<DataArray> {
        check_domain(self, x)?;
        self.convolve(x, false)
    }

    fn adjoint(&self, y: &DataArray) -> Result<DataArray> {
        check_range(self, y)?;
        self.convolve(y, true)
    }

    fn norm(&self) -> Result<f64> {
        // Young: ||h * x|| <= ||h||_1 ||x||
        Ok(self.psf.iter().map(|v| v.abs()).sum())
    }
}
