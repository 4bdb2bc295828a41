//! Summary statistics for posterior samples: HPD intervals, empirical covariance,
//! weighted moments, and lognormal summaries of H0 samples.

use ndarray::prelude::*;
use ndarray_stats::{CorrelationExt, QuantileExt};
use num_traits::Float;

use crate::error::PosteriorError;

/// Per-lens, per-parameter HPD bounds, each of shape `[batch, Y_dim]`.
#[derive(Debug, Clone, PartialEq)]
pub struct HpdInterval {
    pub mass: f64,
    pub lower: Array2<f64>,
    pub upper: Array2<f64>,
}

impl HpdInterval {
    pub fn width(&self) -> Array2<f64> {
        &self.upper - &self.lower
    }
}

/**
Shortest interval containing a fraction `mass` of `samples`.

With `n` finite draws sorted ascending and `k = ceil(mass * n)`, returns the window
`[x_i, x_{i+k-1}]` of minimal width, preferring the lowest `i` on ties. NaNs are ignored.

# Examples

```rust
use bnn_posterior::stats::hpd_interval;

let samples = [0.0, 1.0, 2.0, 2.5, 3.0, 9.0];
let (lo, hi) = hpd_interval(&samples, 0.5).unwrap();
assert_eq!((lo, hi), (2.0, 3.0));
```
*/
pub fn hpd_interval<T: Float>(samples: &[T], mass: f64) -> Result<(T, T), PosteriorError> {
    if !(mass > 0.0 && mass <= 1.0) {
        return Err(PosteriorError::InvalidMass(mass));
    }
    let mut sorted: Vec<T> = samples.iter().copied().filter(|x| !x.is_nan()).collect();
    if sorted.is_empty() {
        return Err(PosteriorError::EmptySample);
    }
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    // Slack so that e.g. 0.07 * 100 = 7.000000000000001 still gives k = 7.
    let k = ((mass * n as f64 - 1e-9).ceil() as usize).clamp(1, n);
    let widths: Array1<T> = (0..=n - k).map(|i| sorted[i + k - 1] - sorted[i]).collect();
    let start = widths.argmin().map_err(|_| PosteriorError::EmptySample)?;
    Ok((sorted[start], sorted[start + k - 1]))
}

/// [`hpd_interval`] for every lens and parameter of a `[batch, n_samples, Y_dim]` array.
pub fn hpd_intervals(samples: ArrayView3<f64>, mass: f64) -> Result<HpdInterval, PosteriorError> {
    let (batch, _, y_dim) = samples.dim();
    let mut lower = Array2::<f64>::zeros((batch, y_dim));
    let mut upper = Array2::<f64>::zeros((batch, y_dim));
    for (lens, draws) in samples.axis_iter(Axis(0)).enumerate() {
        for (col, values) in draws.axis_iter(Axis(1)).enumerate() {
            let values: Vec<f64> = values.to_vec();
            let (lo, hi) = hpd_interval(&values, mass)?;
            lower[[lens, col]] = lo;
            upper[[lens, col]] = hi;
        }
    }
    Ok(HpdInterval { mass, lower, upper })
}

/// Unbiased covariance of `[n_draws, n_params]` samples, shape `[n_params, n_params]`.
pub fn sample_cov(samples: ArrayView2<f64>) -> Result<Array2<f64>, PosteriorError> {
    if samples.nrows() < 2 {
        return Err(PosteriorError::EmptySample);
    }
    samples
        .t()
        .cov(1.0)
        .map_err(|_| PosteriorError::EmptySample)
}

/// Weighted mean and (population) standard deviation.
pub fn weighted_mean_std(
    values: ArrayView1<f64>,
    weights: ArrayView1<f64>,
) -> Result<(f64, f64), PosteriorError> {
    if values.len() != weights.len() {
        return Err(PosteriorError::SampleShape {
            expected: values.len(),
            found: weights.shape().to_vec(),
        });
    }
    let total = weights.sum();
    if values.is_empty() || !(total > 0.0) {
        return Err(PosteriorError::EmptySample);
    }
    let mean = values.dot(&weights) / total;
    let var = (values.mapv(|v| (v - mean).powi(2)) * weights).sum() / total;
    Ok((mean, var.sqrt()))
}

/// Moments of a lognormal fitted to positive samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LognormalStats {
    /// Mean of `ln(x)`.
    pub mu: f64,
    /// Standard deviation of `ln(x)`.
    pub sigma: f64,
    pub mode: f64,
    pub std: f64,
}

/**
Fits a lognormal to `samples` by (optionally weighted) moments of `ln(x)`.

`mode = exp(mu - sigma²)` and `std = sqrt((exp(sigma²) - 1) * exp(2 mu + sigma²))`.
*/
pub fn lognormal_stats(
    samples: ArrayView1<f64>,
    weights: Option<ArrayView1<f64>>,
) -> Result<LognormalStats, PosteriorError> {
    let log_samples = samples.mapv(f64::ln);
    let weights = match weights {
        Some(w) => w.to_owned(),
        None => Array1::ones(samples.len()),
    };
    let (mu, sigma) = weighted_mean_std(log_samples.view(), weights.view())?;
    let sig2 = sigma * sigma;
    Ok(LognormalStats {
        mu,
        sigma,
        mode: (mu - sig2).exp(),
        std: ((sig2.exp() - 1.0) * (2.0 * mu + sig2).exp()).sqrt(),
    })
}

/// Drops values lying `level` or more standard deviations from the mean in log space.
pub fn remove_lognormal_outliers(data: ArrayView1<f64>, level: f64) -> Array1<f64> {
    if data.is_empty() {
        return Array1::zeros(0);
    }
    let log_data = data.mapv(f64::ln);
    let mean = log_data.mean().unwrap_or(0.0);
    let std = log_data.std(0.0);
    data.iter()
        .zip(log_data.iter())
        .filter(|&(_, &l)| (l - mean).abs() < level * std)
        .map(|(&x, _)| x)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn hpd_picks_the_narrowest_window() {
        let samples = [5.0, 0.0, 0.1, 0.2, 0.3, 0.4, 3.0, 4.0];
        let (lo, hi) = hpd_interval(&samples, 0.5).unwrap();
        assert_eq!((lo, hi), (0.0, 0.3));
    }

    #[test]
    fn hpd_window_size_is_not_inflated_by_rounding() {
        // 0.07 * 100 evaluates to 7.000000000000001; the window must still hold 7 draws.
        let samples: Vec<f64> = (0..100).map(|i| (i * i) as f64).collect();
        let (lo, hi) = hpd_interval(&samples, 0.07).unwrap();
        assert_eq!((lo, hi), (0.0, 36.0));
        // Masses just above an exact count still round up.
        let (lo, hi) = hpd_interval(&samples, 0.071).unwrap();
        assert_eq!((lo, hi), (0.0, 49.0));
    }

    #[test]
    fn hpd_full_mass_spans_everything() {
        let samples = [2.0f32, -1.0, 7.5, f32::NAN];
        let (lo, hi) = hpd_interval(&samples, 1.0).unwrap();
        assert_eq!((lo, hi), (-1.0, 7.5));
    }

    #[test]
    fn hpd_rejects_bad_input() {
        assert!(matches!(
            hpd_interval(&[1.0, 2.0], 0.0),
            Err(PosteriorError::InvalidMass(_))
        ));
        assert!(matches!(
            hpd_interval(&[1.0, 2.0], 1.5),
            Err(PosteriorError::InvalidMass(_))
        ));
        assert!(matches!(
            hpd_interval::<f64>(&[], 0.5),
            Err(PosteriorError::EmptySample)
        ));
    }

    #[test]
    fn hpd_of_standard_normal_is_symmetric() {
        use rand::{rngs::SmallRng, SeedableRng};
        use rand_distr::{Distribution, StandardNormal};

        let mut rng = SmallRng::seed_from_u64(42);
        let samples: Vec<f64> = (0..100_000)
            .map(|_| StandardNormal.sample(&mut rng))
            .collect();
        let (lo, hi) = hpd_interval(&samples, 0.95).unwrap();
        assert_abs_diff_eq!(lo, -1.96, epsilon = 0.05);
        assert_abs_diff_eq!(hi, 1.96, epsilon = 0.05);
    }

    #[test]
    fn hpd_intervals_cover_each_lens_and_column() {
        let samples = Array3::from_shape_fn((2, 10, 3), |(lens, draw, col)| {
            (lens * 100 + col * 10 + draw) as f64
        });
        let hpd = hpd_intervals(samples.view(), 1.0).unwrap();
        assert_eq!(hpd.lower, array![[0.0, 10.0, 20.0], [100.0, 110.0, 120.0]]);
        assert_eq!(hpd.upper, array![[9.0, 19.0, 29.0], [109.0, 119.0, 129.0]]);
        assert!(hpd.width().iter().all(|&w| w == 9.0));
    }

    #[test]
    fn sample_cov_of_perfectly_correlated_columns() {
        let samples = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
        let cov = sample_cov(samples.view()).unwrap();
        assert_abs_diff_eq!(cov, array![[1.0, 2.0], [2.0, 4.0]], epsilon = 1e-12);
        assert!(sample_cov(array![[1.0, 2.0]].view()).is_err());
    }

    #[test]
    fn weighted_moments() {
        let values = array![60.0, 70.0, 80.0];
        let weights = array![1.0, 2.0, 1.0];
        let (mean, std) = weighted_mean_std(values.view(), weights.view()).unwrap();
        assert_abs_diff_eq!(mean, 70.0, epsilon = 1e-12);
        assert_abs_diff_eq!(std, 50.0f64.sqrt(), epsilon = 1e-12);
        assert!(weighted_mean_std(values.view(), array![0.0, 0.0, 0.0].view()).is_err());
    }

    #[test]
    fn lognormal_stats_of_known_log_moments() {
        // ln(x) = {0, 2} -> mu = 1, sigma = 1
        let samples = array![1.0, 2.0f64.exp()];
        let stats = lognormal_stats(samples.view(), None).unwrap();
        assert_abs_diff_eq!(stats.mu, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.sigma, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.mode, 1.0, epsilon = 1e-12);
        let expected_std = ((1.0f64.exp() - 1.0) * 3.0f64.exp()).sqrt();
        assert_abs_diff_eq!(stats.std, expected_std, epsilon = 1e-12);
    }

    #[test]
    fn outliers_are_removed_in_log_space() {
        let mut data = vec![70.0; 20];
        data.push(7000.0);
        data[0] = 69.0;
        data[1] = 71.0;
        let kept = remove_lognormal_outliers(Array1::from(data).view(), 3.0);
        assert_eq!(kept.len(), 20);
        assert!(kept.iter().all(|&x| x < 100.0));
    }
}
