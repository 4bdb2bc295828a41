/*!
Reversible per-column transforms applied to the regression targets.

Before training, the columns listed as log-parameterized are replaced by their natural log,
and the whitened columns are standardized with `(value - mean) / std`. The network therefore
predicts in this transformed space, and every sample drawn from a posterior has to be mapped
back before it is reported in physical units:

- [`TransformSpec::unwhiten_back`] computes `value * std + mean` on the whitened columns,
  broadcasting the per-lens statistics across the draws axis.
- [`TransformSpec::exponentiate_back`] applies `exp` to the log-parameterized columns.
- [`TransformSpec::transform_back`] composes the two, de-whitening first.

Empty column lists are normalized to "disabled", so an unconfigured spec is the identity.
All operations return new arrays; inputs are never modified.

# Examples

```rust
use bnn_posterior::transforms::TransformSpec;
use ndarray::{array, Axis};

let spec = TransformSpec::identity(2)
    .with_whitening(vec![0], array![[1.0]], array![[2.0]])
    .unwrap()
    .with_log_parameterized(vec![1])
    .unwrap();

let physical = array![[3.0, 5.0]];
let network_space = spec.transform_forward(physical.view()).unwrap();
let recovered = spec.transform_back_mu(network_space.view()).unwrap();
assert!((recovered[[0, 0]] - 3.0).abs() < 1e-12);
assert!((recovered[[0, 1]] - 5.0).abs() < 1e-12);
```
*/

use log::debug;
use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, ArrayViewMut3, Axis};

use crate::error::PosteriorError;

/// Per-column standardization statistics.
///
/// `mean` and `std` have shape `[n_lenses, cols.len()]`. A single row is broadcast over every
/// lens in the batch; otherwise there must be exactly one row per lens.
#[derive(Debug, Clone, PartialEq)]
pub struct Whitening {
    pub cols: Vec<usize>,
    pub mean: Array2<f64>,
    pub std: Array2<f64>,
}

impl Whitening {
    /// Row of the statistics to use for lens `lens`.
    fn row(&self, lens: usize) -> usize {
        if self.mean.nrows() == 1 {
            0
        } else {
            lens
        }
    }

    fn check_batch(&self, batch: usize) -> Result<(), PosteriorError> {
        let n_rows = self.mean.nrows();
        if n_rows != 1 && n_rows != batch {
            return Err(PosteriorError::WhiteningBatch {
                expected: batch,
                found: n_rows,
            });
        }
        Ok(())
    }
}

/// Describes which target columns were whitened and/or log-parameterized at training time.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSpec {
    y_dim: usize,
    whitening: Option<Whitening>,
    log_cols: Option<Vec<usize>>,
}

impl TransformSpec {
    /// A spec with no transforms over `y_dim` columns.
    pub fn identity(y_dim: usize) -> Self {
        Self {
            y_dim,
            whitening: None,
            log_cols: None,
        }
    }

    /**
    Registers the whitened columns together with their standardization statistics.

    An empty `cols` disables whitening and the statistics are dropped.

    # Errors

    Fails if a column is out of range or repeated, if `mean` and `std` differ in shape, if
    their width does not match `cols`, or if any std is non-positive or non-finite.
    */
    pub fn with_whitening(
        mut self,
        cols: Vec<usize>,
        mean: Array2<f64>,
        std: Array2<f64>,
    ) -> Result<Self, PosteriorError> {
        if cols.is_empty() {
            self.whitening = None;
            return Ok(self);
        }
        check_cols(&cols, self.y_dim)?;
        if mean.shape() != std.shape() {
            return Err(PosteriorError::WhiteningShape {
                mean: mean.shape().to_vec(),
                std: std.shape().to_vec(),
            });
        }
        if mean.ncols() != cols.len() {
            return Err(PosteriorError::WhiteningWidth {
                expected: cols.len(),
                found: mean.ncols(),
            });
        }
        if mean.nrows() == 0 {
            return Err(PosteriorError::WhiteningBatch {
                expected: 1,
                found: 0,
            });
        }
        if let Some(&bad) = std.iter().find(|&&sd| !(sd.is_finite() && sd > 0.0)) {
            return Err(PosteriorError::InvalidStd(bad));
        }
        self.whitening = Some(Whitening { cols, mean, std });
        Ok(self)
    }

    /// Registers the log-parameterized columns. An empty `cols` disables exponentiation.
    pub fn with_log_parameterized(mut self, cols: Vec<usize>) -> Result<Self, PosteriorError> {
        if cols.is_empty() {
            self.log_cols = None;
            return Ok(self);
        }
        check_cols(&cols, self.y_dim)?;
        self.log_cols = Some(cols);
        Ok(self)
    }

    pub fn y_dim(&self) -> usize {
        self.y_dim
    }

    pub fn whitening(&self) -> Option<&Whitening> {
        self.whitening.as_ref()
    }

    pub fn whitened_cols(&self) -> Option<&[usize]> {
        self.whitening.as_ref().map(|w| w.cols.as_slice())
    }

    pub fn log_parameterized_cols(&self) -> Option<&[usize]> {
        self.log_cols.as_deref()
    }

    /// True when neither whitening nor log-parameterization is configured.
    pub fn is_identity(&self) -> bool {
        self.whitening.is_none() && self.log_cols.is_none()
    }

    /// Scales and shifts the whitened columns of a `[batch, n_samples, Y_dim]` array back.
    pub fn unwhiten_back(&self, samples: ArrayView3<f64>) -> Result<Array3<f64>, PosteriorError> {
        self.check_trailing(samples.shape())?;
        let mut out = samples.to_owned();
        self.map_whitened(out.view_mut(), |v, mean, std| v * std + mean)?;
        Ok(out)
    }

    /// Exponentiates the log-parameterized columns of a `[batch, n_samples, Y_dim]` array.
    pub fn exponentiate_back(
        &self,
        samples: ArrayView3<f64>,
    ) -> Result<Array3<f64>, PosteriorError> {
        self.check_trailing(samples.shape())?;
        let mut out = samples.to_owned();
        self.map_logged(out.view_mut(), f64::exp);
        Ok(out)
    }

    /// Unwhitens, then exponentiates, a `[batch, n_samples, Y_dim]` array.
    pub fn transform_back(&self, samples: ArrayView3<f64>) -> Result<Array3<f64>, PosteriorError> {
        self.check_trailing(samples.shape())?;
        let mut out = samples.to_owned();
        if !self.is_identity() {
            debug!(
                "Reversing transforms on samples of shape {:?} (whitened: {:?}, logged: {:?})",
                out.shape(),
                self.whitened_cols(),
                self.log_parameterized_cols()
            );
        }
        self.map_whitened(out.view_mut(), |v, mean, std| v * std + mean)?;
        self.map_logged(out.view_mut(), f64::exp);
        Ok(out)
    }

    /// Same as [`TransformSpec::transform_back`] for a `[batch, Y_dim]` array, e.g. truth
    /// labels or predicted means.
    pub fn transform_back_mu(&self, y: ArrayView2<f64>) -> Result<Array2<f64>, PosteriorError> {
        let out = self.transform_back(y.insert_axis(Axis(1)))?;
        Ok(out.index_axis_move(Axis(1), 0))
    }

    /// Takes the natural log of the log-parameterized columns of a `[batch, Y_dim]` array.
    pub fn log_parameterize(&self, y: ArrayView2<f64>) -> Result<Array2<f64>, PosteriorError> {
        self.check_trailing(y.shape())?;
        let mut out = y.to_owned().insert_axis(Axis(1));
        self.map_logged(out.view_mut(), f64::ln);
        Ok(out.index_axis_move(Axis(1), 0))
    }

    /// Standardizes the whitened columns of a `[batch, Y_dim]` array.
    pub fn whiten(&self, y: ArrayView2<f64>) -> Result<Array2<f64>, PosteriorError> {
        self.check_trailing(y.shape())?;
        let mut out = y.to_owned().insert_axis(Axis(1));
        self.map_whitened(out.view_mut(), |v, mean, std| (v - mean) / std)?;
        Ok(out.index_axis_move(Axis(1), 0))
    }

    /// Maps physical labels into network space: log-parameterize, then whiten.
    pub fn transform_forward(&self, y: ArrayView2<f64>) -> Result<Array2<f64>, PosteriorError> {
        let logged = self.log_parameterize(y)?;
        self.whiten(logged.view())
    }

    fn check_trailing(&self, shape: &[usize]) -> Result<(), PosteriorError> {
        match shape.last() {
            Some(&d) if d == self.y_dim => Ok(()),
            _ => Err(PosteriorError::SampleShape {
                expected: self.y_dim,
                found: shape.to_vec(),
            }),
        }
    }

    fn map_whitened<F>(&self, mut arr: ArrayViewMut3<f64>, f: F) -> Result<(), PosteriorError>
    where
        F: Fn(f64, f64, f64) -> f64,
    {
        let Some(w) = &self.whitening else {
            return Ok(());
        };
        w.check_batch(arr.len_of(Axis(0)))?;
        for (lens, mut draws) in arr.axis_iter_mut(Axis(0)).enumerate() {
            let row = w.row(lens);
            for (k, &col) in w.cols.iter().enumerate() {
                let (mean, std) = (w.mean[[row, k]], w.std[[row, k]]);
                draws.column_mut(col).mapv_inplace(|v| f(v, mean, std));
            }
        }
        Ok(())
    }

    fn map_logged(&self, mut arr: ArrayViewMut3<f64>, f: fn(f64) -> f64) {
        if let Some(cols) = &self.log_cols {
            for &col in cols {
                arr.slice_mut(s![.., .., col]).mapv_inplace(f);
            }
        }
    }
}

fn check_cols(cols: &[usize], y_dim: usize) -> Result<(), PosteriorError> {
    for (i, &index) in cols.iter().enumerate() {
        if index >= y_dim {
            return Err(PosteriorError::ColumnOutOfRange { index, y_dim });
        }
        if cols[..i].contains(&index) {
            return Err(PosteriorError::DuplicateColumn(index));
        }
    }
    Ok(())
}

/**
Maps a Gaussian predicted in whitened space to its physical-space counterpart.

With `A = diag(scale)`, returns `mu * scale + shift` and `A · cov · Aᵀ`. `shift` and `scale`
are typically the training-set means and standard deviations of the features.
*/
pub fn pred_to_natural_gaussian(
    mu: ArrayView1<f64>,
    cov: ArrayView2<f64>,
    shift: ArrayView1<f64>,
    scale: ArrayView1<f64>,
) -> Result<(Array1<f64>, Array2<f64>), PosteriorError> {
    let d = mu.len();
    for shape in [cov.shape(), shift.shape(), scale.shape()] {
        if shape.iter().any(|&n| n != d) {
            return Err(PosteriorError::SampleShape {
                expected: d,
                found: shape.to_vec(),
            });
        }
    }
    let natural_mu = &mu * &scale + &shift;
    let natural_cov = Array2::from_shape_fn((d, d), |(i, j)| cov[[i, j]] * scale[i] * scale[j]);
    Ok((natural_mu, natural_cov))
}
