/*!
Shared contract for the Gaussian BNN posteriors.

The regression network emits one fixed-length vector of `out_dim` values per lens. A posterior
slices that vector into the parameters of its covariance structure, draws samples in network
space, and reverses the whitening/log transforms so that the returned samples are in physical
units. Three structures are provided:

| Kind | `out_dim` | Covariance |
|---|---|---|
| [`PosteriorKind::Diagonal`] | `2 * Y_dim` | `diag(exp(logvar))` |
| [`PosteriorKind::LowRank`] | `4 * Y_dim` | `diag(exp(logvar)) + F Fᵀ`, rank 2 |
| [`PosteriorKind::DoubleGaussian`] | `8 * Y_dim + 1` | mixture of two low-rank Gaussians |

The variant is chosen at configuration time and wrapped in [`GaussianBnnPosterior`], which
dispatches the [`BnnPosterior`] contract to the concrete sampler.

Randomness is never global: every draw takes an explicit RNG, and [`seed_samples`] turns an
optional seed into a fresh [`SmallRng`]. Two calls with the same seed and the same sliced
prediction return identical samples.

# Examples

```rust
use bnn_posterior::posterior::{BnnPosterior, GaussianBnnPosterior, PosteriorKind};
use bnn_posterior::transforms::TransformSpec;
use ndarray::Array2;

let y_dim = 3;
let mut post = GaussianBnnPosterior::new(PosteriorKind::LowRank, TransformSpec::identity(y_dim))
    .unwrap();
// Two lenses worth of raw network output.
let pred = Array2::<f64>::zeros((2, post.out_dim()));
post.set_sliced_pred(pred.view()).unwrap();

let samples = post.sample(100, Some(42)).unwrap();
assert_eq!(samples.shape(), &[2, 100, 3]);
assert_eq!(samples, post.sample(100, Some(42)).unwrap());
```
*/

use std::fmt;
use std::str::FromStr;

use log::debug;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use ndarray_rand::RandomExt;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::Deserialize;

use crate::diagonal::DiagonalGaussianPosterior;
use crate::double_gaussian::DoubleGaussianPosterior;
use crate::error::PosteriorError;
use crate::low_rank::LowRankGaussianPosterior;
use crate::stats::{self, HpdInterval};
use crate::transforms::TransformSpec;

/// Rank of the low-rank covariance factor `F`.
pub const RANK: usize = 2;

/// Selects the covariance structure of the posterior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PosteriorKind {
    #[serde(alias = "DiagonalGaussianBNNPosterior")]
    Diagonal,
    #[serde(alias = "LowRankGaussianBNNPosterior")]
    LowRank,
    #[serde(alias = "DoubleGaussianBNNPosterior")]
    DoubleGaussian,
}

impl PosteriorKind {
    /// Length of the prediction vector this kind expects for `y_dim` target parameters.
    pub fn out_dim(self, y_dim: usize) -> usize {
        match self {
            PosteriorKind::Diagonal => 2 * y_dim,
            PosteriorKind::LowRank => 4 * y_dim,
            PosteriorKind::DoubleGaussian => 8 * y_dim + 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PosteriorKind::Diagonal => "diagonal",
            PosteriorKind::LowRank => "low_rank",
            PosteriorKind::DoubleGaussian => "double_gaussian",
        }
    }
}

impl fmt::Display for PosteriorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PosteriorKind {
    type Err = PosteriorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "diagonal" | "DiagonalGaussianBNNPosterior" => Ok(PosteriorKind::Diagonal),
            "low_rank" | "LowRankGaussianBNNPosterior" => Ok(PosteriorKind::LowRank),
            "double_gaussian" | "DoubleGaussianBNNPosterior" => Ok(PosteriorKind::DoubleGaussian),
            other => Err(PosteriorError::UnknownKind(other.to_string())),
        }
    }
}

/// State shared by every posterior: the target dimensionality and the transforms to reverse.
#[derive(Debug, Clone)]
pub struct PosteriorBase {
    transform: TransformSpec,
}

impl PosteriorBase {
    pub fn new(transform: TransformSpec) -> Result<Self, PosteriorError> {
        if transform.y_dim() == 0 {
            return Err(PosteriorError::ZeroDim);
        }
        Ok(Self { transform })
    }

    pub fn y_dim(&self) -> usize {
        self.transform.y_dim()
    }

    pub fn transform(&self) -> &TransformSpec {
        &self.transform
    }

    /// Validates a raw `[batch, out_dim]` prediction for `kind` and returns the batch size.
    pub fn check_pred(
        &self,
        kind: PosteriorKind,
        pred: &ArrayView2<f64>,
    ) -> Result<usize, PosteriorError> {
        let (batch, found) = pred.dim();
        let expected = kind.out_dim(self.y_dim());
        if found != expected {
            return Err(PosteriorError::OutDimMismatch {
                kind,
                y_dim: self.y_dim(),
                expected,
                found,
            });
        }
        if batch == 0 {
            return Err(PosteriorError::EmptyBatch);
        }
        debug!("Slicing {kind} prediction for {batch} lenses (out_dim={found})");
        Ok(batch)
    }
}

/// Returns the generator used for one sampling call: seeded when `seed` is given, otherwise
/// drawn from OS entropy and therefore not reproducible.
pub fn seed_samples(seed: Option<u64>) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    }
}

/**
Draws `n_samples` network-space samples per lens from `N(mu, diag(exp(logvar)) + F Fᵀ)`.

Uses the reparameterization `F · eps_low_rank + mu + exp(0.5 · logvar) · eps_diag`, so the
`Y_dim × Y_dim` covariance is never formed. All low-rank noise (`[batch, n_samples, rank]`) is
drawn before the diagonal noise (`[batch, n_samples, Y_dim]`).

* `mu`, `logvar` - shape `[batch, Y_dim]`
* `f` - shape `[batch, Y_dim, rank]`

Returns an array of shape `[batch, n_samples, Y_dim]`. No transforms are reversed here.

# Errors

Fails with [`PosteriorError::ParameterShape`] if `logvar` or the leading axes of `f` do not
match `mu`. Nothing is drawn from `rng` in that case.
*/
pub fn sample_low_rank<R: Rng + ?Sized>(
    n_samples: usize,
    mu: ArrayView2<f64>,
    logvar: ArrayView2<f64>,
    f: ArrayView3<f64>,
    rng: &mut R,
) -> Result<Array3<f64>, PosteriorError> {
    let (batch, y_dim) = mu.dim();
    if logvar.dim() != (batch, y_dim) {
        return Err(PosteriorError::ParameterShape {
            name: "logvar",
            expected: vec![batch, y_dim],
            found: logvar.shape().to_vec(),
        });
    }
    let rank = f.len_of(Axis(2));
    if f.dim() != (batch, y_dim, rank) {
        return Err(PosteriorError::ParameterShape {
            name: "F",
            expected: vec![batch, y_dim, rank],
            found: f.shape().to_vec(),
        });
    }
    let eps_low_rank = Array3::<f64>::random_using((batch, n_samples, rank), StandardNormal, rng);
    let eps_diag = Array3::<f64>::random_using((batch, n_samples, y_dim), StandardNormal, rng);
    let half_std = logvar.mapv(|lv| (0.5 * lv).exp());

    let mut samples = Array3::<f64>::zeros((batch, n_samples, y_dim));
    for (lens, mut out) in samples.axis_iter_mut(Axis(0)).enumerate() {
        // [n_samples, rank] x [rank, Y_dim]
        out.assign(
            &eps_low_rank
                .index_axis(Axis(0), lens)
                .dot(&f.index_axis(Axis(0), lens).t()),
        );
        out += &(&eps_diag.index_axis(Axis(0), lens) * &half_std.row(lens));
        out += &mu.row(lens);
    }
    Ok(samples)
}

/// The contract every posterior satisfies.
pub trait BnnPosterior {
    fn kind(&self) -> PosteriorKind;

    fn base(&self) -> &PosteriorBase;

    /// Number of lenses in the most recent prediction, if one has been set.
    fn batch_size(&self) -> Option<usize>;

    /// Slices a raw `[batch, out_dim]` prediction into this posterior's parameters,
    /// replacing whatever was set before.
    fn set_sliced_pred(&mut self, pred: ArrayView2<f64>) -> Result<(), PosteriorError>;

    /// Draws `n_samples` physical-unit samples per lens, shape `[batch, n_samples, Y_dim]`.
    fn sample_with_rng<R: Rng + ?Sized>(
        &self,
        n_samples: usize,
        rng: &mut R,
    ) -> Result<Array3<f64>, PosteriorError>;

    /// Diagnostic view of the primary component in physical units.
    fn summary(&self) -> Result<PredictionSummary, PosteriorError>;

    fn y_dim(&self) -> usize {
        self.base().y_dim()
    }

    fn out_dim(&self) -> usize {
        self.kind().out_dim(self.y_dim())
    }

    /// Same as [`BnnPosterior::sample_with_rng`] with a generator from [`seed_samples`].
    fn sample(
        &self,
        n_samples: usize,
        sample_seed: Option<u64>,
    ) -> Result<Array3<f64>, PosteriorError> {
        let mut rng = seed_samples(sample_seed);
        self.sample_with_rng(n_samples, &mut rng)
    }

    /// Reverses the whitening and log transforms on a `[batch, n_samples, Y_dim]` array.
    fn transform_back(&self, samples: ArrayView3<f64>) -> Result<Array3<f64>, PosteriorError> {
        self.base().transform().transform_back(samples)
    }

    /// Reverses the transforms on a `[batch, Y_dim]` array, such as truth labels.
    fn transform_back_mu(&self, y: ArrayView2<f64>) -> Result<Array2<f64>, PosteriorError> {
        self.base().transform().transform_back_mu(y)
    }

    /**
    Estimates the highest posterior density interval of every parameter of every lens.

    Draws `n_samples` physical-unit samples and returns, per lens and column, the shortest
    interval containing a fraction `mass` of them (see [`stats::hpd_interval`]).
    */
    fn hpd_interval(
        &self,
        n_samples: usize,
        mass: f64,
        sample_seed: Option<u64>,
    ) -> Result<HpdInterval, PosteriorError> {
        let samples = self.sample(n_samples, sample_seed)?;
        stats::hpd_intervals(samples.view(), mass)
    }
}

/**
Physical-space summary of a sliced prediction, for export alongside the samples.

* `mu` - primary component mean with the transforms reversed, `[batch, Y_dim]`
* `std` - square root of the primary component's marginal variances, scaled by the whitening
  std on whitened columns, `[batch, Y_dim]`
* `w2` - weight of the second component for mixture posteriors, `[batch]`
*/
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionSummary {
    pub mu: Array2<f64>,
    pub std: Array2<f64>,
    pub w2: Option<Array1<f64>>,
}

impl PredictionSummary {
    pub fn new(
        transform: &TransformSpec,
        mu: ArrayView2<f64>,
        cov_diag: ArrayView2<f64>,
        w2: Option<Array1<f64>>,
    ) -> Result<Self, PosteriorError> {
        let natural_mu = transform.transform_back_mu(mu)?;
        let mut std = cov_diag.mapv(f64::sqrt);
        if let Some(w) = transform.whitening() {
            let batch = std.nrows();
            for lens in 0..batch {
                let row = if w.std.nrows() == 1 { 0 } else { lens };
                for (k, &col) in w.cols.iter().enumerate() {
                    std[[lens, col]] *= w.std[[row, k]];
                }
            }
        }
        Ok(Self {
            mu: natural_mu,
            std,
            w2,
        })
    }
}

/// A posterior whose covariance structure is chosen at configuration time.
#[derive(Debug, Clone)]
pub enum GaussianBnnPosterior {
    Diagonal(DiagonalGaussianPosterior),
    LowRank(LowRankGaussianPosterior),
    DoubleGaussian(DoubleGaussianPosterior),
}

macro_rules! dispatch {
    ($self:expr, $post:ident => $body:expr) => {
        match $self {
            GaussianBnnPosterior::Diagonal($post) => $body,
            GaussianBnnPosterior::LowRank($post) => $body,
            GaussianBnnPosterior::DoubleGaussian($post) => $body,
        }
    };
}

impl GaussianBnnPosterior {
    pub fn new(kind: PosteriorKind, transform: TransformSpec) -> Result<Self, PosteriorError> {
        Ok(match kind {
            PosteriorKind::Diagonal => {
                GaussianBnnPosterior::Diagonal(DiagonalGaussianPosterior::new(transform)?)
            }
            PosteriorKind::LowRank => {
                GaussianBnnPosterior::LowRank(LowRankGaussianPosterior::new(transform)?)
            }
            PosteriorKind::DoubleGaussian => {
                GaussianBnnPosterior::DoubleGaussian(DoubleGaussianPosterior::new(transform)?)
            }
        })
    }

    /// Network-space mean of the primary component, `[batch, Y_dim]`.
    pub fn mu(&self) -> Option<ArrayView2<'_, f64>> {
        dispatch!(self, post => post.mu())
    }

    /// Network-space log-variance of the primary component's diagonal term, `[batch, Y_dim]`.
    pub fn logvar(&self) -> Option<ArrayView2<'_, f64>> {
        dispatch!(self, post => post.logvar())
    }

    /// Marginal variances of the primary component in network space, `[batch, Y_dim]`.
    pub fn cov_diag(&self) -> Option<Array2<f64>> {
        dispatch!(self, post => post.cov_diag())
    }

    /// Weight of the second mixture component; `None` for single-Gaussian posteriors.
    pub fn w2(&self) -> Option<ArrayView1<'_, f64>> {
        match self {
            GaussianBnnPosterior::DoubleGaussian(post) => post.w2(),
            _ => None,
        }
    }
}

impl BnnPosterior for GaussianBnnPosterior {
    fn kind(&self) -> PosteriorKind {
        dispatch!(self, post => post.kind())
    }

    fn base(&self) -> &PosteriorBase {
        dispatch!(self, post => post.base())
    }

    fn batch_size(&self) -> Option<usize> {
        dispatch!(self, post => post.batch_size())
    }

    fn set_sliced_pred(&mut self, pred: ArrayView2<f64>) -> Result<(), PosteriorError> {
        dispatch!(self, post => post.set_sliced_pred(pred))
    }

    fn sample_with_rng<R: Rng + ?Sized>(
        &self,
        n_samples: usize,
        rng: &mut R,
    ) -> Result<Array3<f64>, PosteriorError> {
        dispatch!(self, post => post.sample_with_rng(n_samples, rng))
    }

    fn summary(&self) -> Result<PredictionSummary, PosteriorError> {
        dispatch!(self, post => post.summary())
    }
}
