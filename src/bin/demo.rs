//! End-to-end demo: load a posterior config, slice a synthetic network prediction, draw
//! physical-unit lens-model samples and turn them into weighted H0 samples per lens.
//!
//! Usage: `demo [config.toml]`. Set `RUST_LOG=info` to see the per-lens summaries.

use bnn_posterior::config::PosteriorConfig;
use bnn_posterior::posterior::BnnPosterior;
use bnn_posterior::runner::{collect_weighted_with_progress, select_columns};
use bnn_posterior::stats::{lognormal_stats, remove_lognormal_outliers};
use ndarray::{s, Array2, ArrayView1};
use std::error::Error;

const DEFAULT_CONFIG: &str = r#"
kind = "double_gaussian"
y_cols = ["theta_E", "gamma", "src_x", "src_y"]
whitened_y_cols = ["theta_E", "gamma"]
y_mean = [0.1, 2.0]
y_std = [0.3, 0.1]
log_parameterized_y_cols = ["theta_E"]

[sampling]
n_samples = 2000
sampling_buffer = 3
seed = 1113
"#;

const N_LENSES: usize = 4;
const REQUIRED_PARAMS: [&str; 2] = ["theta_E", "gamma"];

/// Stand-in for the time-delay H0 solver: fails for unphysical slopes.
fn toy_h0(lens: usize, params: ArrayView1<f64>) -> Result<(f64, f64), String> {
    let (theta_e, gamma) = (params[0], params[1]);
    if !(1.5..2.5).contains(&gamma) {
        return Err(format!("no lens solution for gamma={gamma:.3}"));
    }
    let h0 = (60.0 + 2.0 * lens as f64) * theta_e.powf(0.2) * (gamma - 1.0);
    let weight = (-0.5 * ((gamma - 2.0) / 0.2).powi(2)).exp();
    Ok((h0, weight))
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => PosteriorConfig::from_file(path)?,
        None => PosteriorConfig::from_toml_str(DEFAULT_CONFIG)?,
    };
    let mut posterior = config.build()?;
    println!(
        "{} posterior over {:?} (out_dim={})",
        posterior.kind(),
        config.y_cols,
        posterior.out_dim()
    );

    // Synthetic network output: small per-lens mean offsets and moderate spread.
    let d = config.y_dim();
    let mut pred = Array2::<f64>::zeros((N_LENSES, posterior.out_dim()));
    for (lens, mut row) in pred.rows_mut().into_iter().enumerate() {
        row.slice_mut(s![..d]).fill(0.1 * lens as f64);
        row.slice_mut(s![d..2 * d]).fill(-2.0);
    }
    posterior.set_sliced_pred(pred.view())?;

    let summary = posterior.summary()?;
    println!("Primary mean (physical units):\n{:.3}", summary.mu);
    if let Some(w2) = &summary.w2 {
        println!("Second component weights: {:.3}", w2);
    }

    let samples = posterior.sample(config.n_draws(), config.sampling.seed)?;
    println!("Drew samples of shape {:?}", samples.shape());

    let hpd = bnn_posterior::stats::hpd_intervals(samples.view(), 0.68)?;
    println!("68% HPD width per lens and parameter:\n{:.3}", hpd.width());

    let lens_params = select_columns(samples.view(), &config.y_cols, &REQUIRED_PARAMS)?;
    let h0 = collect_weighted_with_progress(
        lens_params.view(),
        config.sampling.n_samples,
        toy_h0,
    );

    for (lens, weighted) in h0.iter().enumerate() {
        if weighted.is_empty() {
            println!("Lens {lens}: no valid H0 samples");
            continue;
        }
        let (mean, std) = weighted.mean_std()?;
        let fit = lognormal_stats(weighted.values.view(), Some(weighted.weights.view()))?;
        let kept = remove_lognormal_outliers(weighted.values.view(), 3.0);
        println!(
            "Lens {lens}: H0 = {mean:.2} ± {std:.2} from {}/{} draws; lognormal mode {:.2}, std {:.2}; {} inliers",
            weighted.len(),
            weighted.n_attempted,
            fit.mode,
            fit.std,
            kept.len()
        );
    }

    #[cfg(feature = "csv")]
    {
        use bnn_posterior::io::csv::{save_prediction_csv, save_samples_csv};
        save_samples_csv(&samples, &config.y_cols, "/tmp/bnn_samples.csv")?;
        save_prediction_csv(&summary, &config.y_cols, "/tmp/bnn_prediction.csv")?;
        println!("Saved /tmp/bnn_samples.csv and /tmp/bnn_prediction.csv");
    }

    Ok(())
}
