//! Gaussian posterior with a low-rank-plus-diagonal covariance,
//! `Σ = diag(exp(logvar)) + F Fᵀ` with `F` of shape `[Y_dim, 2]`.

use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use rand::Rng;

use crate::error::PosteriorError;
use crate::posterior::{
    sample_low_rank, BnnPosterior, PosteriorBase, PosteriorKind, PredictionSummary, RANK,
};
use crate::transforms::TransformSpec;

/// Parameters of one low-rank-plus-diagonal Gaussian per lens.
#[derive(Debug, Clone, PartialEq)]
pub struct LowRankGaussian {
    /// `[batch, Y_dim]`
    pub mu: Array2<f64>,
    /// `[batch, Y_dim]`
    pub logvar: Array2<f64>,
    /// `[batch, Y_dim, RANK]`
    pub f: Array3<f64>,
}

impl LowRankGaussian {
    /**
    Slices `4 * y_dim` columns laid out as `mu | logvar | F`, where the `F` block holds the
    rows of each lens's `[Y_dim, RANK]` factor one after another.
    */
    pub fn from_columns(block: ArrayView2<f64>, y_dim: usize) -> Self {
        let d = y_dim;
        let batch = block.nrows();
        let f_block = block.slice(s![.., 2 * d..4 * d]);
        Self {
            mu: block.slice(s![.., ..d]).to_owned(),
            logvar: block.slice(s![.., d..2 * d]).to_owned(),
            f: Array3::from_shape_fn((batch, d, RANK), |(lens, i, r)| {
                f_block[[lens, i * RANK + r]]
            }),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.mu.nrows()
    }

    /// Network-space draws, `[batch, n_samples, Y_dim]`.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        n_samples: usize,
        rng: &mut R,
    ) -> Result<Array3<f64>, PosteriorError> {
        sample_low_rank(n_samples, self.mu.view(), self.logvar.view(), self.f.view(), rng)
    }

    /// Marginal variances `exp(logvar) + diag(F Fᵀ)`, `[batch, Y_dim]`.
    pub fn cov_diag(&self) -> Array2<f64> {
        self.logvar.mapv(f64::exp) + self.f.mapv(|x| x * x).sum_axis(Axis(2))
    }

    /// Dense `[Y_dim, Y_dim]` covariance of lens `lens`.
    pub fn covariance(&self, lens: usize) -> Array2<f64> {
        let f = self.f.index_axis(Axis(0), lens);
        Array2::from_diag(&self.logvar.row(lens).mapv(f64::exp)) + f.dot(&f.t())
    }
}

#[derive(Debug, Clone)]
pub struct LowRankGaussianPosterior {
    base: PosteriorBase,
    params: Option<LowRankGaussian>,
}

impl LowRankGaussianPosterior {
    pub fn new(transform: TransformSpec) -> Result<Self, PosteriorError> {
        Ok(Self {
            base: PosteriorBase::new(transform)?,
            params: None,
        })
    }

    pub fn params(&self) -> Option<&LowRankGaussian> {
        self.params.as_ref()
    }

    pub fn mu(&self) -> Option<ArrayView2<'_, f64>> {
        self.params.as_ref().map(|p| p.mu.view())
    }

    pub fn logvar(&self) -> Option<ArrayView2<'_, f64>> {
        self.params.as_ref().map(|p| p.logvar.view())
    }

    pub fn cov_diag(&self) -> Option<Array2<f64>> {
        self.params.as_ref().map(LowRankGaussian::cov_diag)
    }
}

impl BnnPosterior for LowRankGaussianPosterior {
    fn kind(&self) -> PosteriorKind {
        PosteriorKind::LowRank
    }

    fn base(&self) -> &PosteriorBase {
        &self.base
    }

    fn batch_size(&self) -> Option<usize> {
        self.params.as_ref().map(LowRankGaussian::batch_size)
    }

    fn set_sliced_pred(&mut self, pred: ArrayView2<f64>) -> Result<(), PosteriorError> {
        self.base.check_pred(self.kind(), &pred)?;
        self.params = Some(LowRankGaussian::from_columns(pred, self.base.y_dim()));
        Ok(())
    }

    fn sample_with_rng<R: Rng + ?Sized>(
        &self,
        n_samples: usize,
        rng: &mut R,
    ) -> Result<Array3<f64>, PosteriorError> {
        let params = self.params.as_ref().ok_or(PosteriorError::PredictionNotSet)?;
        let samples = params.sample(n_samples, rng)?;
        self.transform_back(samples.view())
    }

    fn summary(&self) -> Result<PredictionSummary, PosteriorError> {
        let params = self.params.as_ref().ok_or(PosteriorError::PredictionNotSet)?;
        PredictionSummary::new(
            self.base.transform(),
            params.mu.view(),
            params.cov_diag().view(),
            None,
        )
    }
}
