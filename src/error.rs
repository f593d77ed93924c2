use std::path::PathBuf;

use ndarray::ShapeError;
use ndarray_npy::{ReadNpzError, WriteNpzError};

/// Errors produced while loading data, training or persisting a model.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read archive {path}: {source}")]
    ArchiveRead {
        path: PathBuf,
        #[source]
        source: ReadNpzError,
    },

    #[error("failed to write archive: {0}")]
    ArchiveWrite(#[from] WriteNpzError),

    #[error("archive has {labels} labels but {features} feature arrays")]
    LengthMismatch { labels: usize, features: usize },

    #[error("sample {index} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        index: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("invalid label {label} at sample {index}")]
    InvalidLabel { index: usize, label: i64 },

    #[error("dataset is empty")]
    EmptyDataset,

    #[error("sample index {index} is out of range for a dataset of {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("non-finite loss at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize },

    #[error("checkpoint is missing tensor `{0}`")]
    MissingTensor(String),

    #[error("checkpoint has unexpected tensor `{0}`")]
    UnexpectedTensor(String),

    #[error("checkpoint tensor `{name}` has shape {found:?}, expected {expected:?}")]
    TensorShape {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error("audio error in {path}: {message}")]
    Audio { path: PathBuf, message: String },

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("manifest line {line}: {message}")]
    Manifest { line: usize, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
