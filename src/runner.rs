/*!
Plumbing between the posterior samples and the external H0 sampler.

A physical lens-model sample does not always yield an H0 value: the lens equation may have no
valid solution for it. The caller therefore draws a buffer of `sampling_buffer * n_samples`
lens-model samples per lens, and for each lens walks the buffer in order, mapping draws to
`(h0, weight)` pairs until `n_samples` of them succeed or the buffer is exhausted. Lenses are
independent and processed in parallel.

# Examples

```rust
use bnn_posterior::runner::collect_weighted;
use ndarray::Array3;

// Two lenses, five buffered draws each, one parameter.
let samples = Array3::from_shape_fn((2, 5, 1), |(lens, draw, _)| (lens * 10 + draw) as f64);
let h0 = collect_weighted(samples.view(), 3, |_lens, draw| {
    if draw[0] as usize % 2 == 1 {
        Err("no lens solution")
    } else {
        Ok((70.0 + draw[0], 1.0))
    }
});
assert_eq!(h0[0].values.to_vec(), vec![70.0, 72.0, 74.0]);
assert_eq!(h0[0].n_attempted, 5);
```
*/

use std::fmt::Display;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use ndarray::{Array1, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

use crate::error::PosteriorError;
use crate::stats;

/// H0 samples of one lens with weights normalized to unit sum.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedSamples {
    pub values: Array1<f64>,
    pub weights: Array1<f64>,
    /// Buffered draws consumed, including the ones that failed.
    pub n_attempted: usize,
}

impl WeightedSamples {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Weighted mean and standard deviation of the H0 samples.
    pub fn mean_std(&self) -> Result<(f64, f64), PosteriorError> {
        stats::weighted_mean_std(self.values.view(), self.weights.view())
    }
}

/**
Picks the `required` columns, by name, out of `[batch, n_samples, Y_dim]` samples whose
columns are named `y_cols`. The output columns follow the order of `required`.
*/
pub fn select_columns<S: AsRef<str>>(
    samples: ArrayView3<f64>,
    y_cols: &[String],
    required: &[S],
) -> Result<Array3<f64>, PosteriorError> {
    if samples.len_of(Axis(2)) != y_cols.len() {
        return Err(PosteriorError::SampleShape {
            expected: y_cols.len(),
            found: samples.shape().to_vec(),
        });
    }
    let indices = required
        .iter()
        .map(|name| {
            let name = name.as_ref();
            y_cols
                .iter()
                .position(|col| col == name)
                .ok_or_else(|| PosteriorError::UnknownColumn(name.to_string()))
        })
        .collect::<Result<Vec<usize>, _>>()?;
    Ok(samples.select(Axis(2), &indices))
}

/// Maps the buffered draws of every lens to at most `n_valid` weighted H0 samples.
///
/// A draw counts as valid only if the mapping succeeds with a finite weight.
pub fn collect_weighted<F, E>(
    samples: ArrayView3<f64>,
    n_valid: usize,
    h0_sample: F,
) -> Vec<WeightedSamples>
where
    F: Fn(usize, ArrayView1<f64>) -> Result<(f64, f64), E> + Sync,
    E: Display,
{
    (0..samples.len_of(Axis(0)))
        .into_par_iter()
        .map(|lens| {
            collect_lens(
                lens,
                samples.index_axis(Axis(0), lens),
                n_valid,
                &h0_sample,
                None,
            )
        })
        .collect()
}

/// Same as [`collect_weighted`], showing one progress bar per lens.
pub fn collect_weighted_with_progress<F, E>(
    samples: ArrayView3<f64>,
    n_valid: usize,
    h0_sample: F,
) -> Vec<WeightedSamples>
where
    F: Fn(usize, ArrayView1<f64>) -> Result<(f64, f64), E> + Sync,
    E: Display,
{
    let multi = MultiProgress::new();
    let pb_style = ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

    (0..samples.len_of(Axis(0)))
        .into_par_iter()
        .map(|lens| {
            let pb = multi.add(ProgressBar::new(n_valid as u64));
            pb.set_prefix(format!("Lens {lens}"));
            pb.set_style(pb_style.clone());
            let out = collect_lens(
                lens,
                samples.index_axis(Axis(0), lens),
                n_valid,
                &h0_sample,
                Some(&pb),
            );
            pb.finish_with_message("Done!");
            out
        })
        .collect()
}

fn collect_lens<F, E>(
    lens: usize,
    draws: ArrayView2<f64>,
    n_valid: usize,
    h0_sample: &F,
    pb: Option<&ProgressBar>,
) -> WeightedSamples
where
    F: Fn(usize, ArrayView1<f64>) -> Result<(f64, f64), E>,
    E: Display,
{
    let mut values = Vec::with_capacity(n_valid);
    let mut weights = Vec::with_capacity(n_valid);
    let mut n_attempted = 0;
    for draw in draws.rows() {
        if values.len() >= n_valid {
            break;
        }
        n_attempted += 1;
        match h0_sample(lens, draw) {
            Ok((h0, weight)) if weight.is_finite() => {
                values.push(h0);
                weights.push(weight);
                if let Some(pb) = pb {
                    pb.inc(1);
                }
            }
            Ok((_, weight)) => debug!(
                "Lens {lens}: skipping draw {} with weight {weight}",
                n_attempted - 1
            ),
            Err(e) => debug!("Lens {lens}: skipping draw {}: {e}", n_attempted - 1),
        }
    }
    if values.len() < n_valid {
        warn!(
            "Lens {lens}: buffer of {} draws exhausted with only {}/{n_valid} valid H0 samples",
            draws.nrows(),
            values.len()
        );
    }

    let mut weights = Array1::from(weights);
    let total = weights.sum();
    if total != 0.0 {
        weights /= total;
    }
    info!(
        "Lens {lens}: {} weighted H0 samples from {n_attempted} draws",
        values.len()
    );
    WeightedSamples {
        values: Array1::from(values),
        weights,
        n_attempted,
    }
}
