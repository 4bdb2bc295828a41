//! Round trips between physical labels and network space, directly and through a sampler.

use bnn_posterior::config::PosteriorConfig;
use bnn_posterior::diagonal::DiagonalGaussianPosterior;
use bnn_posterior::posterior::BnnPosterior;
use bnn_posterior::transforms::TransformSpec;
use ndarray::{array, concatenate, Array2, Axis};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn labels() -> Array2<f64> {
        // theta_E, gamma, src_x for three lenses
        array![[1.1, 2.05, -0.02], [0.7, 1.95, 0.01], [1.6, 2.2, 0.0]]
    }

    fn specs() -> Vec<TransformSpec> {
        let identity = TransformSpec::identity(3);
        let logged = TransformSpec::identity(3)
            .with_log_parameterized(vec![0])
            .unwrap();
        let per_lens = TransformSpec::identity(3)
            .with_whitening(
                vec![1, 2],
                array![[2.0, 0.0], [1.9, 0.1], [2.1, -0.1]],
                array![[0.1, 0.05], [0.2, 0.05], [0.15, 0.1]],
            )
            .unwrap()
            .with_log_parameterized(vec![0])
            .unwrap();
        // theta_E is both logged and whitened.
        let overlapping = TransformSpec::identity(3)
            .with_whitening(vec![0, 1], array![[0.1, 2.0]], array![[0.3, 0.1]])
            .unwrap()
            .with_log_parameterized(vec![0])
            .unwrap();
        vec![identity, logged, per_lens, overlapping]
    }

    #[test]
    fn test_forward_then_back_recovers_labels() {
        let y = labels();
        for spec in specs() {
            let network = spec.transform_forward(y.view()).unwrap();
            let recovered = spec.transform_back_mu(network.view()).unwrap();
            assert_abs_diff_eq!(recovered, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_identity_is_a_no_op() {
        let spec = TransformSpec::identity(3);
        assert!(spec.is_identity());
        let y = labels();
        assert_eq!(spec.transform_forward(y.view()).unwrap(), y);
        let samples = y.clone().insert_axis(Axis(1));
        assert_eq!(spec.transform_back(samples.view()).unwrap(), samples);
    }

    #[test]
    fn test_sampling_reverses_transforms() {
        let y = labels();
        for spec in specs() {
            let network = spec.transform_forward(y.view()).unwrap();
            // Negligible variance: every draw equals the network-space mean.
            let logvar = Array2::from_elem(network.dim(), -60.0);
            let pred = concatenate![Axis(1), network, logvar];

            let mut post = DiagonalGaussianPosterior::new(spec).unwrap();
            post.set_sliced_pred(pred.view()).unwrap();
            let samples = post.sample(5, Some(42)).unwrap();
            for draw in 0..5 {
                assert_abs_diff_eq!(
                    samples.index_axis(Axis(1), draw),
                    y.view(),
                    epsilon = 1e-9
                );
            }
            assert_abs_diff_eq!(post.summary().unwrap().mu, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_configured_transforms_round_trip() {
        let config = PosteriorConfig::from_toml_str(
            r#"
kind = "diagonal"
y_cols = ["theta_E", "gamma", "src_x"]
whitened_y_cols = ["gamma", "src_x"]
y_mean = [2.0, 0.0]
y_std = [0.1, 0.05]
log_parameterized_y_cols = ["theta_E"]
"#,
        )
        .unwrap();
        let spec = config.transform_spec().unwrap();
        let y = labels();
        let network = spec.transform_forward(y.view()).unwrap();
        assert_abs_diff_eq!(network[[0, 0]], 1.1f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(network[[0, 1]], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(
            spec.transform_back_mu(network.view()).unwrap(),
            y,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_whitening_batch_must_match() {
        let spec = TransformSpec::identity(1)
            .with_whitening(vec![0], array![[0.0], [1.0]], array![[1.0], [1.0]])
            .unwrap();
        let three_lenses = Array2::<f64>::zeros((3, 1));
        assert!(spec.transform_back_mu(three_lenses.view()).is_err());
    }
}
