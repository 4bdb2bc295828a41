//! Gaussian posterior with a diagonal covariance: every parameter is independent.

use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::PosteriorError;
use crate::posterior::{BnnPosterior, PosteriorBase, PosteriorKind, PredictionSummary};
use crate::transforms::TransformSpec;

/// Mean and log-variance of an independent Gaussian per lens, both `[batch, Y_dim]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagonalGaussian {
    pub mu: Array2<f64>,
    pub logvar: Array2<f64>,
}

impl DiagonalGaussian {
    /// Network-space draws `eps * exp(0.5 * logvar) + mu`, `[batch, n_samples, Y_dim]`.
    pub fn sample<R: Rng + ?Sized>(&self, n_samples: usize, rng: &mut R) -> Array3<f64> {
        let (batch, y_dim) = self.mu.dim();
        let eps = Array3::<f64>::random_using((batch, n_samples, y_dim), StandardNormal, rng);
        let std = self.logvar.mapv(|lv| (0.5 * lv).exp()).insert_axis(Axis(1));
        eps * &std + &self.mu.view().insert_axis(Axis(1))
    }
}

#[derive(Debug, Clone)]
pub struct DiagonalGaussianPosterior {
    base: PosteriorBase,
    params: Option<DiagonalGaussian>,
}

impl DiagonalGaussianPosterior {
    pub fn new(transform: TransformSpec) -> Result<Self, PosteriorError> {
        Ok(Self {
            base: PosteriorBase::new(transform)?,
            params: None,
        })
    }

    pub fn params(&self) -> Option<&DiagonalGaussian> {
        self.params.as_ref()
    }

    pub fn mu(&self) -> Option<ArrayView2<'_, f64>> {
        self.params.as_ref().map(|p| p.mu.view())
    }

    pub fn logvar(&self) -> Option<ArrayView2<'_, f64>> {
        self.params.as_ref().map(|p| p.logvar.view())
    }

    pub fn cov_diag(&self) -> Option<Array2<f64>> {
        self.params.as_ref().map(|p| p.logvar.mapv(f64::exp))
    }
}

impl BnnPosterior for DiagonalGaussianPosterior {
    fn kind(&self) -> PosteriorKind {
        PosteriorKind::Diagonal
    }

    fn base(&self) -> &PosteriorBase {
        &self.base
    }

    fn batch_size(&self) -> Option<usize> {
        self.params.as_ref().map(|p| p.mu.nrows())
    }

    fn set_sliced_pred(&mut self, pred: ArrayView2<f64>) -> Result<(), PosteriorError> {
        self.base.check_pred(self.kind(), &pred)?;
        let d = self.base.y_dim();
        self.params = Some(DiagonalGaussian {
            mu: pred.slice(s![.., ..d]).to_owned(),
            logvar: pred.slice(s![.., d..]).to_owned(),
        });
        Ok(())
    }

    fn sample_with_rng<R: Rng + ?Sized>(
        &self,
        n_samples: usize,
        rng: &mut R,
    ) -> Result<Array3<f64>, PosteriorError> {
        let params = self.params.as_ref().ok_or(PosteriorError::PredictionNotSet)?;
        let samples = params.sample(n_samples, rng);
        self.transform_back(samples.view())
    }

    fn summary(&self) -> Result<PredictionSummary, PosteriorError> {
        let params = self.params.as_ref().ok_or(PosteriorError::PredictionNotSet)?;
        PredictionSummary::new(
            self.base.transform(),
            params.mu.view(),
            params.logvar.mapv(f64::exp).view(),
            None,
        )
    }
}
