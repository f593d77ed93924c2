use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ndarray::{Array4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::dataset::Dataset;
use crate::error::{Error, Result};

/// A group of samples ready for one forward pass.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `(B, 1, H, W)` inputs.
    pub inputs: Array4<f32>,
    pub labels: Vec<usize>,
    /// Dataset positions the batch was gathered from.
    pub indices: Vec<usize>,
}

impl Batch {
    /// Copy the samples at `indices` into one contiguous batch.
    pub fn gather(dataset: &Dataset, indices: &[usize]) -> Result<Self> {
        let (h, w) = dataset.feature_shape();
        let mut inputs = Array4::<f32>::zeros((indices.len(), 1, h, w));
        let mut labels = Vec::with_capacity(indices.len());
        for (mut slot, &i) in inputs.outer_iter_mut().zip(indices) {
            let sample = dataset.sample(i).ok_or(Error::IndexOutOfRange {
                index: i,
                len: dataset.len(),
            })?;
            slot.index_axis_mut(Axis(0), 0).assign(&sample.features);
            labels.push(sample.label);
        }
        Ok(Self {
            inputs,
            labels,
            indices: indices.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Batching iterator over one partition of a dataset.
///
/// Each call to [`BatchLoader::epoch`] reshuffles the partition and starts a
/// prefetch thread that builds batches on the loader's own worker pool.
pub struct BatchLoader {
    dataset: Arc<Dataset>,
    indices: Vec<usize>,
    batch_size: usize,
    pool: Arc<ThreadPool>,
    rng: StdRng,
}

impl BatchLoader {
    pub fn new(
        dataset: Arc<Dataset>,
        indices: Vec<usize>,
        batch_size: usize,
        num_workers: usize,
        rng: StdRng,
    ) -> Result<Self> {
        if let Some(&index) = indices.iter().find(|&&i| i >= dataset.len()) {
            return Err(Error::IndexOutOfRange {
                index,
                len: dataset.len(),
            });
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .thread_name(|i| format!("loader-{i}"))
            .build()?;
        Ok(Self {
            dataset,
            indices,
            batch_size: batch_size.max(1),
            pool: Arc::new(pool),
            rng,
        })
    }

    /// Number of samples in the partition.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Start one shuffled pass over the partition.
    pub fn epoch(&mut self) -> Result<Batches> {
        let mut order = self.indices.clone();
        order.shuffle(&mut self.rng);

        let workers = self.pool.current_num_threads();
        let (tx, rx) = mpsc::sync_channel(workers * 2);
        let dataset = Arc::clone(&self.dataset);
        let pool = Arc::clone(&self.pool);
        let batch_size = self.batch_size;
        let worker = thread::Builder::new()
            .name("batch-prefetch".to_owned())
            .spawn(move || {
                let chunks: Vec<&[usize]> = order.chunks(batch_size).collect();
                for group in chunks.chunks(workers) {
                    let built: Result<Vec<Batch>> = pool.install(|| {
                        group
                            .par_iter()
                            .map(|idx| Batch::gather(&dataset, idx))
                            .collect()
                    });
                    // Indices were checked in `new`, so this only trips on a logic error.
                    let built = match built {
                        Ok(built) => built,
                        Err(e) => {
                            log::error!("failed to build batch: {e}");
                            return;
                        }
                    };
                    for batch in built {
                        if tx.send(batch).is_err() {
                            return;
                        }
                    }
                }
            })?;

        Ok(Batches {
            rx: Some(rx),
            worker: Some(worker),
            remaining: self.num_batches(),
        })
    }
}

/// Batches of one pass, in shuffled order.
pub struct Batches {
    rx: Option<Receiver<Batch>>,
    worker: Option<JoinHandle<()>>,
    remaining: usize,
}

impl Iterator for Batches {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let batch = self.rx.as_ref()?.recv().ok()?;
        self.remaining = self.remaining.saturating_sub(1);
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

impl Drop for Batches {
    fn drop(&mut self) {
        // Closing the channel first unblocks a producer waiting on a full queue.
        self.rx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("batch prefetch thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Sample;
    use ndarray::Array2;
    use rand::SeedableRng;

    fn dataset(n: usize) -> Arc<Dataset> {
        let mut rng = StdRng::seed_from_u64(0);
        let samples = (0..n)
            .map(|i| Sample {
                label: i % 3,
                features: Array2::from_elem((2, 2), i as f32),
            })
            .collect();
        Arc::new(Dataset::from_samples(samples, &mut rng).unwrap())
    }

    #[test]
    fn gather_copies_features_and_labels() {
        let ds = dataset(5);
        let batch = Batch::gather(&ds, &[4, 1]).unwrap();
        assert_eq!(batch.inputs.dim(), (2, 1, 2, 2));
        let first = ds.sample(4).unwrap();
        assert_eq!(batch.labels[0], first.label);
        assert_eq!(batch.inputs[[0, 0, 1, 1]], first.features[[1, 1]]);
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let ds = dataset(5);
        assert!(matches!(
            Batch::gather(&ds, &[0, 5]),
            Err(Error::IndexOutOfRange { index: 5, len: 5 })
        ));
        assert!(matches!(
            BatchLoader::new(ds, vec![1, 7], 2, 1, StdRng::seed_from_u64(1)),
            Err(Error::IndexOutOfRange { index: 7, len: 5 })
        ));
    }

    #[test]
    fn empty_partition_yields_no_batches() {
        let mut loader =
            BatchLoader::new(dataset(4), Vec::new(), 3, 2, StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(loader.num_batches(), 0);
        assert_eq!(loader.epoch().unwrap().count(), 0);
    }

    #[test]
    fn dropping_a_pass_early_stops_the_producer() {
        let mut loader =
            BatchLoader::new(dataset(64), (0..64).collect(), 1, 1, StdRng::seed_from_u64(1))
                .unwrap();
        let mut pass = loader.epoch().unwrap();
        assert!(pass.next().is_some());
        drop(pass);
        assert_eq!(loader.epoch().unwrap().count(), 64);
    }
}
