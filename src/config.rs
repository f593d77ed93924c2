use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Which compute device the model should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Use every available core when there is more than one.
    #[default]
    Auto,
    Cpu,
    Parallel,
}

/// Shape of the residual network.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Width of the hidden layers.
    pub hidden: usize,
    /// Number of stacked residual blocks.
    pub blocks: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden: 256,
            blocks: 2,
        }
    }
}

/// Optional model checkpointing. Both paths are unset by default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Restore parameters from this file before training.
    pub resume_from: Option<PathBuf>,
    /// Save parameters to this file after the test pass.
    pub save_to: Option<PathBuf>,
}

/// Training configuration loaded from a TOML or JSON file.
///
/// Missing fields fall back to the values in [`TrainConfig::default`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Archive produced by `vctk-preprocess` (or `numpy.savez`).
    pub dataset_path: PathBuf,
    pub max_epochs: usize,
    pub batch_size: usize,
    /// Fraction of samples assigned to the training partition.
    pub train_ratio: f64,
    /// Fraction of samples assigned to the validation partition.
    pub val_ratio: f64,
    pub learning_rate: f32,
    /// Worker threads per batch loader.
    pub num_workers: usize,
    /// Seed for every random decision of the run. `None` draws from entropy.
    pub seed: Option<u64>,
    pub device: DevicePreference,
    /// Draw progress bars while training.
    pub progress: bool,
    pub model: ModelConfig,
    pub checkpoint: CheckpointConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("preprocessed_vctk.npz"),
            max_epochs: 10,
            batch_size: 256,
            train_ratio: 0.8,
            val_ratio: 0.1,
            learning_rate: 1e-4,
            num_workers: 16,
            seed: None,
            device: DevicePreference::Auto,
            progress: true,
            model: ModelConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Load configuration from the given path. JSON is used for `.json`
    /// files, TOML for everything else.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be > 0".to_owned()));
        }
        for (name, ratio) in [("train_ratio", self.train_ratio), ("val_ratio", self.val_ratio)] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(Error::Config(format!("{name} must lie in [0, 1], got {ratio}")));
            }
        }
        if self.train_ratio + self.val_ratio > 1.0 {
            return Err(Error::Config(format!(
                "train_ratio + val_ratio must not exceed 1, got {}",
                self.train_ratio + self.val_ratio
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.model.hidden == 0 {
            return Err(Error::Config("model.hidden must be > 0".to_owned()));
        }
        Ok(())
    }
}

/// Settings for turning recordings into feature slices.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Every recording is resampled to this rate first.
    pub sample_rate: u32,
    /// Samples per analysis window (also the FFT size).
    pub window_size: usize,
    pub n_mels: usize,
    /// Cepstral coefficients kept per window.
    pub n_coeffs: usize,
    /// Windows per emitted sample.
    pub segment_frames: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            window_size: 1024,
            n_mels: 26,
            n_coeffs: 13,
            segment_frames: 64,
        }
    }
}

impl FeatureConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 || self.segment_frames == 0 || self.sample_rate == 0 {
            return Err(Error::Config(
                "sample_rate, window_size and segment_frames must be > 0".to_owned(),
            ));
        }
        if self.n_coeffs == 0 || self.n_coeffs > self.n_mels {
            return Err(Error::Config(format!(
                "n_coeffs must lie in 1..={}, got {}",
                self.n_mels, self.n_coeffs
            )));
        }
        Ok(())
    }
}
