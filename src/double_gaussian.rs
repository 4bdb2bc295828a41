/*!
Mixture of two low-rank-plus-diagonal Gaussians.

The prediction vector is laid out as

```text
| mu | logvar | F (2·Y_dim) | mu2 | logvar2 | F2 (2·Y_dim) | w2 logit |
```

and the second component's weight is squashed to `w2 = 0.5 * sigmoid(logit)`, so it lies in
`[0, 0.5]` and the first component is always the primary one (weight `1 - w2 >= 0.5`).

Sampling draws, in this order: a `[batch, n_samples]` uniform array selecting the component
of every draw (component 2 wherever `w2 > u`), a full batch from component 2, and a full batch
from component 1. Both components are always sampled in full; each draw keeps the one its
uniform selected. Transforms are reversed once, after the two components are combined.
*/

use log::debug;
use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, Zip};
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use rand::Rng;

use crate::error::PosteriorError;
use crate::low_rank::LowRankGaussian;
use crate::posterior::{BnnPosterior, PosteriorBase, PosteriorKind, PredictionSummary};
use crate::transforms::TransformSpec;

/// Maps a raw logit to the second component's weight in `[0, 0.5]`.
pub fn mixture_weight(logit: f64) -> f64 {
    0.5 / (1.0 + (-logit).exp())
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoubleGaussian {
    pub primary: LowRankGaussian,
    pub secondary: LowRankGaussian,
    /// Weight of `secondary`, `[batch]`.
    pub w2: Array1<f64>,
}

impl DoubleGaussian {
    pub fn from_columns(pred: ArrayView2<f64>, y_dim: usize) -> Self {
        let d = y_dim;
        Self {
            primary: LowRankGaussian::from_columns(pred.slice(s![.., ..4 * d]), d),
            secondary: LowRankGaussian::from_columns(pred.slice(s![.., 4 * d..8 * d]), d),
            w2: pred.column(8 * d).mapv(mixture_weight),
        }
    }

    /// Marks the draws taken from the second component: `w2[lens] > u[lens, draw]`.
    pub fn second_component_mask(&self, uniform: ArrayView2<f64>) -> Array2<bool> {
        Array2::from_shape_fn(uniform.dim(), |(lens, draw)| {
            self.w2[lens] > uniform[[lens, draw]]
        })
    }

    /// Network-space draws, `[batch, n_samples, Y_dim]`.
    ///
    /// Fails if the two components or `w2` disagree in shape.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        n_samples: usize,
        rng: &mut R,
    ) -> Result<Array3<f64>, PosteriorError> {
        let batch = self.w2.len();
        for (name, component) in [("mu", &self.primary), ("mu2", &self.secondary)] {
            if component.mu.nrows() != batch {
                return Err(PosteriorError::ParameterShape {
                    name,
                    expected: vec![batch, component.mu.ncols()],
                    found: component.mu.shape().to_vec(),
                });
            }
        }
        if self.secondary.mu.dim() != self.primary.mu.dim() {
            return Err(PosteriorError::ParameterShape {
                name: "mu2",
                expected: self.primary.mu.shape().to_vec(),
                found: self.secondary.mu.shape().to_vec(),
            });
        }
        let uniform = Array2::<f64>::random_using((batch, n_samples), Uniform::new(0.0, 1.0), rng);
        let second = self.second_component_mask(uniform.view());

        let samples2 = self.secondary.sample(n_samples, rng)?;
        let mut samples = self.primary.sample(n_samples, rng)?;
        Zip::from(samples.lanes_mut(Axis(2)))
            .and(&second)
            .and(samples2.lanes(Axis(2)))
            .for_each(|mut out, &is_second, draw2| {
                if is_second {
                    out.assign(&draw2);
                }
            });
        debug!(
            "Mixture draw: {} of {} samples from the second component",
            second.iter().filter(|&&m| m).count(),
            second.len()
        );
        Ok(samples)
    }
}

#[derive(Debug, Clone)]
pub struct DoubleGaussianPosterior {
    base: PosteriorBase,
    params: Option<DoubleGaussian>,
}

impl DoubleGaussianPosterior {
    pub fn new(transform: TransformSpec) -> Result<Self, PosteriorError> {
        Ok(Self {
            base: PosteriorBase::new(transform)?,
            params: None,
        })
    }

    pub fn params(&self) -> Option<&DoubleGaussian> {
        self.params.as_ref()
    }

    pub fn mu(&self) -> Option<ArrayView2<'_, f64>> {
        self.params.as_ref().map(|p| p.primary.mu.view())
    }

    pub fn logvar(&self) -> Option<ArrayView2<'_, f64>> {
        self.params.as_ref().map(|p| p.primary.logvar.view())
    }

    pub fn cov_diag(&self) -> Option<Array2<f64>> {
        self.params.as_ref().map(|p| p.primary.cov_diag())
    }

    pub fn mu2(&self) -> Option<ArrayView2<'_, f64>> {
        self.params.as_ref().map(|p| p.secondary.mu.view())
    }

    pub fn logvar2(&self) -> Option<ArrayView2<'_, f64>> {
        self.params.as_ref().map(|p| p.secondary.logvar.view())
    }

    pub fn w2(&self) -> Option<ArrayView1<'_, f64>> {
        self.params.as_ref().map(|p| p.w2.view())
    }
}

impl BnnPosterior for DoubleGaussianPosterior {
    fn kind(&self) -> PosteriorKind {
        PosteriorKind::DoubleGaussian
    }

    fn base(&self) -> &PosteriorBase {
        &self.base
    }

    fn batch_size(&self) -> Option<usize> {
        self.params.as_ref().map(|p| p.w2.len())
    }

    fn set_sliced_pred(&mut self, pred: ArrayView2<f64>) -> Result<(), PosteriorError> {
        self.base.check_pred(self.kind(), &pred)?;
        self.params = Some(DoubleGaussian::from_columns(pred, self.base.y_dim()));
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
            params.primary.mu.view(),
            params.primary.cov_diag().view(),
            Some(params.w2.clone()),
        )
    }
}
