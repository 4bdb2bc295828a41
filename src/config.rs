/*!
TOML configuration of the posterior used for a run.

```toml
kind = "double_gaussian"
y_cols = ["theta_E", "gamma", "src_x"]
whitened_y_cols = ["theta_E", "gamma"]
y_mean = [1.1, 2.0]
y_std = [0.3, 0.1]
log_parameterized_y_cols = ["theta_E"]

[sampling]
n_samples = 1000
sampling_buffer = 3
seed = 1113
```

Column lists are given by name and resolved against `y_cols`. The whitening statistics are the
global training-set ones, a single row broadcast over every lens of a batch.
*/

use std::fs;
use std::path::Path;

use ndarray::Array2;
use serde::Deserialize;

use crate::error::PosteriorError;
use crate::posterior::{GaussianBnnPosterior, PosteriorKind};
use crate::transforms::TransformSpec;

fn default_n_samples() -> usize {
    1000
}

fn default_sampling_buffer() -> usize {
    3
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplingConfig {
    /// Valid H0 samples wanted per lens.
    #[serde(default = "default_n_samples")]
    pub n_samples: usize,
    /// Oversampling factor covering lens-model draws that yield no H0 value.
    #[serde(default = "default_sampling_buffer")]
    pub sampling_buffer: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            n_samples: default_n_samples(),
            sampling_buffer: default_sampling_buffer(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PosteriorConfig {
    pub kind: PosteriorKind,
    pub y_cols: Vec<String>,
    #[serde(default)]
    pub whitened_y_cols: Vec<String>,
    #[serde(default)]
    pub y_mean: Vec<f64>,
    #[serde(default)]
    pub y_std: Vec<f64>,
    #[serde(default)]
    pub log_parameterized_y_cols: Vec<String>,
    #[serde(default)]
    pub sampling: SamplingConfig,
}

impl PosteriorConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PosteriorError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }

    pub fn from_toml_str(toml_string: &str) -> Result<Self, PosteriorError> {
        let config = toml::from_str(toml_string)?;
        Ok(config)
    }

    pub fn y_dim(&self) -> usize {
        self.y_cols.len()
    }

    /// Width of the network's output layer for the configured kind.
    pub fn out_dim(&self) -> usize {
        self.kind.out_dim(self.y_dim())
    }

    /// Positions of `names` within `y_cols`.
    pub fn column_indices(&self, names: &[String]) -> Result<Vec<usize>, PosteriorError> {
        names
            .iter()
            .map(|name| {
                self.y_cols
                    .iter()
                    .position(|col| col == name)
                    .ok_or_else(|| PosteriorError::UnknownColumn(name.clone()))
            })
            .collect()
    }

    pub fn transform_spec(&self) -> Result<TransformSpec, PosteriorError> {
        let whitened = self.column_indices(&self.whitened_y_cols)?;
        let logged = self.column_indices(&self.log_parameterized_y_cols)?;
        let mut spec = TransformSpec::identity(self.y_dim());
        if !whitened.is_empty() {
            let k = whitened.len();
            for stats in [&self.y_mean, &self.y_std] {
                if stats.len() != k {
                    return Err(PosteriorError::WhiteningWidth {
                        expected: k,
                        found: stats.len(),
                    });
                }
            }
            let mean = Array2::from_shape_fn((1, k), |(_, j)| self.y_mean[j]);
            let std = Array2::from_shape_fn((1, k), |(_, j)| self.y_std[j]);
            spec = spec.with_whitening(whitened, mean, std)?;
        }
        spec.with_log_parameterized(logged)
    }

    /// Builds the configured posterior variant, ready for `set_sliced_pred`.
    pub fn build(&self) -> Result<GaussianBnnPosterior, PosteriorError> {
        GaussianBnnPosterior::new(self.kind, self.transform_spec()?)
    }

    /// Lens-model draws per lens, `n_samples * sampling_buffer`.
    pub fn n_draws(&self) -> usize {
        self.sampling.n_samples * self.sampling.sampling_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posterior::BnnPosterior;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CONFIG: &str = r#"
kind = "LowRankGaussianBNNPosterior"
y_cols = ["theta_E", "gamma", "src_x"]
whitened_y_cols = ["gamma", "theta_E"]
y_mean = [2.0, 0.1]
y_std = [0.1, 0.5]
log_parameterized_y_cols = ["theta_E"]

[sampling]
n_samples = 200
seed = 7
"#;

    #[test]
    fn loads_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        let config = PosteriorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.kind, PosteriorKind::LowRank);
        assert_eq!(config.y_dim(), 3);
        assert_eq!(config.out_dim(), 12);
        assert_eq!(
            config.sampling,
            SamplingConfig {
                n_samples: 200,
                sampling_buffer: 3,
                seed: Some(7),
            }
        );
        assert_eq!(config.n_draws(), 600);
    }

    #[test]
    fn resolves_column_names_in_listed_order() {
        let config = PosteriorConfig::from_toml_str(CONFIG).unwrap();
        let spec = config.transform_spec().unwrap();
        assert_eq!(spec.whitened_cols(), Some(&[1, 0][..]));
        assert_eq!(spec.log_parameterized_cols(), Some(&[0][..]));
        let whitening = spec.whitening().unwrap();
        assert_eq!(whitening.mean.shape(), &[1, 2]);
        assert_eq!(whitening.std[[0, 1]], 0.5);
    }

    #[test]
    fn minimal_config_is_an_identity_transform() {
        let config =
            PosteriorConfig::from_toml_str("kind = \"diagonal\"\ny_cols = [\"a\", \"b\"]").unwrap();
        assert_eq!(config.sampling, SamplingConfig::default());
        assert!(config.transform_spec().unwrap().is_identity());
        let post = config.build().unwrap();
        assert_eq!(post.kind(), PosteriorKind::Diagonal);
        assert_eq!(post.out_dim(), 4);
    }

    #[test]
    fn rejects_bad_configs() {
        let unknown = PosteriorConfig::from_toml_str(
            "kind = \"diagonal\"\ny_cols = [\"a\"]\nlog_parameterized_y_cols = [\"b\"]",
        )
        .unwrap();
        assert!(matches!(
            unknown.transform_spec(),
            Err(PosteriorError::UnknownColumn(name)) if name == "b"
        ));

        let short_stats = PosteriorConfig::from_toml_str(
            "kind = \"diagonal\"\ny_cols = [\"a\", \"b\"]\nwhitened_y_cols = [\"a\", \"b\"]\ny_mean = [0.0]\ny_std = [1.0, 1.0]",
        )
        .unwrap();
        assert!(matches!(
            short_stats.build(),
            Err(PosteriorError::WhiteningWidth {
                expected: 2,
                found: 1
            })
        ));

        assert!(matches!(
            PosteriorConfig::from_toml_str("kind = \"triple\"\ny_cols = [\"a\"]"),
            Err(PosteriorError::Toml(_))
        ));
    }
}
