//! Error type shared by the posterior samplers, transforms and config loading.

use crate::posterior::PosteriorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PosteriorError {
    #[error(
        "Prediction has {found} columns, but the {kind} posterior with Y_dim={y_dim} expects {expected}."
    )]
    OutDimMismatch {
        kind: PosteriorKind,
        y_dim: usize,
        expected: usize,
        found: usize,
    },
    #[error("Prediction batch is empty.")]
    EmptyBatch,
    #[error("No prediction has been set; call `set_sliced_pred` before sampling.")]
    PredictionNotSet,
    #[error("Y_dim must be at least 1.")]
    ZeroDim,
    #[error("Column index {index} is out of range for Y_dim={y_dim}.")]
    ColumnOutOfRange { index: usize, y_dim: usize },
    #[error("Column index {0} is listed more than once.")]
    DuplicateColumn(usize),
    #[error("Whitening statistics have {found} columns, but {expected} columns are whitened.")]
    WhiteningWidth { expected: usize, found: usize },
    #[error("Whitening statistics cover {found} lenses, but the batch has {expected}.")]
    WhiteningBatch { expected: usize, found: usize },
    #[error("Whitening mean and std have different shapes: {mean:?} vs {std:?}.")]
    WhiteningShape { mean: Vec<usize>, std: Vec<usize> },
    #[error("Whitening std must be positive and finite, got {0}.")]
    InvalidStd(f64),
    #[error("Array has shape {found:?}, expected trailing dimension {expected}.")]
    SampleShape { expected: usize, found: Vec<usize> },
    #[error("Parameter `{name}` has shape {found:?}, expected {expected:?}.")]
    ParameterShape {
        name: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("Unknown posterior kind '{0}'.")]
    UnknownKind(String),
    #[error("Unknown column '{0}'.")]
    UnknownColumn(String),
    #[error("HPD mass must lie in (0, 1], got {0}.")]
    InvalidMass(f64),
    #[error("Cannot summarize an empty sample.")]
    EmptySample,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}
