use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::checkpoint::{load_checkpoint, save_checkpoint};
use crate::config::TrainConfig;
use crate::dataset::Dataset;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::loader::BatchLoader;
use crate::metrics::{accuracy_percent, ClassAccuracy};
use crate::model::Classifier;
use crate::nn::{argmax, softmax_cross_entropy};
use crate::optim::Adam;
use crate::partition::random_split;
use crate::resnet::ResNet;

/// Statistics of one training epoch and the validation pass after it.
#[derive(Debug, Clone)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    pub batches: usize,
    pub samples: usize,
    pub mean_loss: f32,
    /// Top-1 training accuracy in percent.
    pub train_accuracy: f64,
    /// Mean per-class validation accuracy in percent.
    pub val_accuracy: Option<f64>,
    pub elapsed: Duration,
}

/// Outcome of a complete run.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub train_size: usize,
    pub val_size: usize,
    pub test_size: usize,
    pub epochs: Vec<EpochStats>,
    pub test_accuracy: Option<f64>,
}

/// Drives optimisation and evaluation of a [`Classifier`].
pub struct Trainer<M: Classifier> {
    model: M,
    optimizer: Adam,
    progress: bool,
}

impl<M: Classifier> Trainer<M> {
    pub fn new(model: M, learning_rate: f32) -> Self {
        Self {
            model,
            optimizer: Adam::new(learning_rate),
            progress: false,
        }
    }

    /// Draw a per-epoch progress bar.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{msg} {bar:40} {pos}/{len} ETA {eta}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    }

    /// One optimisation pass over `loader`. `epoch` is 0-based.
    pub fn train_epoch(&mut self, epoch: usize, loader: &mut BatchLoader) -> Result<EpochStats> {
        let started = Instant::now();
        let pb = self.progress_bar(loader.num_batches());
        pb.set_message(format!("epoch {}", epoch + 1));

        let mut correct = 0usize;
        let mut loss_sum = 0.0f32;
        let mut batches = 0usize;
        let mut samples = 0usize;
        for (i, batch) in loader.epoch()?.enumerate() {
            self.model.zero_grad();
            let logits = self.model.forward_train(&batch.inputs);
            let (loss, grad) = softmax_cross_entropy(&logits, &batch.labels);
            if !loss.is_finite() {
                pb.abandon();
                return Err(Error::NonFiniteLoss {
                    epoch: epoch + 1,
                    batch: i + 1,
                });
            }
            self.model.backward(&grad);
            self.optimizer.step(self.model.params());

            correct += argmax(&logits)
                .iter()
                .zip(&batch.labels)
                .filter(|(p, l)| p == l)
                .count();
            loss_sum += loss;
            batches += 1;
            samples += batch.len();
            pb.suspend(|| println!("[{}, {:5}] loss: {:.3}", epoch + 1, i + 1, loss));
            pb.inc(1);
        }
        pb.finish_and_clear();

        let stats = EpochStats {
            epoch: epoch + 1,
            batches,
            samples,
            mean_loss: if batches > 0 { loss_sum / batches as f32 } else { 0.0 },
            train_accuracy: accuracy_percent(correct, loader.len()),
            val_accuracy: None,
            elapsed: started.elapsed(),
        };
        log::debug!("{stats:?}");
        Ok(stats)
    }

    /// Inference-only pass returning mean per-class accuracy in percent.
    pub fn evaluate(&self, loader: &mut BatchLoader) -> Result<Option<f64>> {
        let mut counters = ClassAccuracy::new(self.model.num_classes());
        for batch in loader.epoch()? {
            let logits = self.model.forward(&batch.inputs);
            for (&label, predicted) in batch.labels.iter().zip(argmax(&logits)) {
                counters.record(label, predicted);
            }
        }
        log::debug!("evaluated {} samples", counters.samples());
        Ok(counters.mean_per_class())
    }

    /// `max_epochs` rounds of training and validation, then one test pass.
    pub fn fit(
        &mut self,
        max_epochs: usize,
        train: &mut BatchLoader,
        val: &mut BatchLoader,
        test: &mut BatchLoader,
    ) -> Result<TrainingReport> {
        let mut epochs = Vec::with_capacity(max_epochs);
        for epoch in 0..max_epochs {
            let mut stats = self.train_epoch(epoch, train)?;

            stats.val_accuracy = self.evaluate(val)?;
            if stats.val_accuracy.is_none() {
                log::warn!("validation partition is empty");
            }
            println!("Val Acc: {}", format_accuracy(stats.val_accuracy));
            println!("Train Acc: {:.6}", stats.train_accuracy);
            log::info!(
                "epoch {} done in {:.1?}, mean loss {:.4}",
                stats.epoch,
                stats.elapsed,
                stats.mean_loss
            );
            epochs.push(stats);
        }

        let test_accuracy = self.evaluate(test)?;
        if test_accuracy.is_none() {
            log::warn!("test partition is empty");
        }
        println!("Test Acc: {}", format_accuracy(test_accuracy));
        Ok(TrainingReport {
            train_size: train.len(),
            val_size: val.len(),
            test_size: test.len(),
            epochs,
            test_accuracy,
        })
    }
}

fn format_accuracy(accuracy: Option<f64>) -> String {
    match accuracy {
        Some(acc) => format!("{acc:.6}"),
        None => "n/a".to_owned(),
    }
}

/// Root generator for a run: seeded when configured, from entropy otherwise.
pub fn run_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => {
            log::info!("using seed {seed}");
            StdRng::seed_from_u64(seed)
        }
        None => StdRng::from_entropy(),
    }
}

fn child_rng(root: &mut StdRng) -> StdRng {
    StdRng::seed_from_u64(root.gen())
}

/// Train on an already loaded dataset as configured by `config`.
pub fn train_on(dataset: Dataset, config: &TrainConfig, rng: &mut StdRng) -> Result<TrainingReport> {
    config.validate()?;
    let device = Device::resolve(config.device)?;
    let dataset = Arc::new(dataset);

    let parts = random_split(dataset.len(), config.train_ratio, config.val_ratio, rng);
    println!("Test Data Size: {}", parts.test.len());
    println!("Val Data Size: {}", parts.val.len());
    println!("Train Data Size: {}", parts.train.len());

    let mut loader = |indices| {
        BatchLoader::new(
            Arc::clone(&dataset),
            indices,
            config.batch_size,
            config.num_workers,
            child_rng(rng),
        )
    };
    let mut train = loader(parts.train)?;
    let mut val = loader(parts.val)?;
    let mut test = loader(parts.test)?;

    let (h, w) = dataset.feature_shape();
    let mut model = ResNet::new(
        &config.model,
        (1, h, w),
        dataset.class_count(),
        device,
        &mut child_rng(rng),
    );
    if let Some(path) = &config.checkpoint.resume_from {
        model.load_state(&load_checkpoint(path)?)?;
    }

    let mut trainer = Trainer::new(model, config.learning_rate).with_progress(config.progress);
    let report = trainer.fit(config.max_epochs, &mut train, &mut val, &mut test)?;

    if let Some(path) = &config.checkpoint.save_to {
        save_checkpoint(path, &trainer.model().state())?;
    }
    Ok(report)
}

/// Load the configured dataset and train on it.
pub fn run(config: &TrainConfig) -> Result<TrainingReport> {
    let mut rng = run_rng(config.seed);
    let dataset = Dataset::load(&config.dataset_path, &mut rng)?;
    train_on(dataset, config, &mut rng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_prints_six_decimals_or_placeholder() {
        assert_eq!(format_accuracy(Some(90.0)), "90.000000");
        assert_eq!(format_accuracy(None), "n/a");
    }
}
