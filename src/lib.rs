//! Speaker classification on preprocessed VCTK features.
//!
//! Recordings are turned into fixed-size MFCC slices by [`preprocess`] and
//! stored in an `.npz` archive. [`train::run`] loads that archive, splits it
//! into train/validation/test partitions and trains a residual network on
//! it, reporting mean per-class accuracy.

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod device;
pub mod error;
pub mod features;
pub mod loader;
pub mod metrics;
pub mod model;
pub mod nn;
pub mod optim;
pub mod partition;
pub mod preprocess;
pub mod resnet;
pub mod train;

pub use checkpoint::{load_checkpoint, save_checkpoint, ModelState};
pub use config::{CheckpointConfig, DevicePreference, FeatureConfig, ModelConfig, TrainConfig};
pub use dataset::{write_archive, Dataset, Sample};
pub use device::Device;
pub use error::{Error, Result};
pub use loader::{Batch, BatchLoader};
pub use metrics::ClassAccuracy;
pub use model::Classifier;
pub use partition::{random_split, split_counts, Partitions};
pub use resnet::ResNet;
pub use train::{run, train_on, EpochStats, Trainer, TrainingReport};
