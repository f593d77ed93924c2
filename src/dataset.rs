use std::fs::File;
use std::path::Path;

use ndarray::{Array1, Array2, Array3, Axis};
use ndarray_npy::{NpzReader, NpzWriter};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, Result};

/// One labeled feature slice.
#[derive(Debug, Clone)]
pub struct Sample {
    pub label: usize,
    /// Time-frequency slice of shape `(H, W)`.
    pub features: Array2<f32>,
}

/// All samples of an archive, held in memory in shuffled order.
#[derive(Debug)]
pub struct Dataset {
    samples: Vec<Sample>,
    shape: (usize, usize),
    speakers: Vec<String>,
}

impl Dataset {
    /// Read an `.npz` archive with `labels` (int64, `(N,)`) and `features`
    /// (float32, `(N, H, W)`) entries and shuffle it with `rng`.
    pub fn load(path: impl AsRef<Path>, rng: &mut impl Rng) -> Result<Self> {
        let path = path.as_ref();
        let read_err = |source| Error::ArchiveRead {
            path: path.to_path_buf(),
            source,
        };
        let mut npz = NpzReader::new(File::open(path)?).map_err(read_err)?;
        let names = npz.names().map_err(read_err)?;
        let labels: Array1<i64> = npz.by_name("labels").map_err(read_err)?;
        let features: Array3<f32> = npz.by_name("features").map_err(read_err)?;
        let has_speakers = names
            .iter()
            .any(|n| n.strip_suffix(".npy").unwrap_or(n) == "speakers");
        let speakers = if has_speakers {
            let raw: Array1<u8> = npz.by_name("speakers").map_err(read_err)?;
            String::from_utf8_lossy(&raw.to_vec())
                .lines()
                .map(str::to_owned)
                .collect()
        } else {
            Vec::new()
        };

        if labels.len() != features.len_of(Axis(0)) {
            return Err(Error::LengthMismatch {
                labels: labels.len(),
                features: features.len_of(Axis(0)),
            });
        }
        let samples = labels
            .iter()
            .zip(features.outer_iter())
            .enumerate()
            .map(|(index, (&label, slice))| {
                let label = usize::try_from(label)
                    .map_err(|_| Error::InvalidLabel { index, label })?;
                Ok(Sample {
                    label,
                    features: slice.to_owned(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut dataset = Self::from_samples(samples, rng)?;
        dataset.speakers = speakers;
        log::info!(
            "loaded {} samples of shape {:?} with {} classes from {}",
            dataset.len(),
            dataset.shape,
            dataset.class_count(),
            path.display()
        );
        Ok(dataset)
    }

    /// Build a dataset from in-memory samples, shuffling them with `rng`.
    /// Every sample must share the first sample's feature shape.
    pub fn from_samples(mut samples: Vec<Sample>, rng: &mut impl Rng) -> Result<Self> {
        let first = samples.first().ok_or(Error::EmptyDataset)?;
        let shape = first.features.dim();
        if let Some((index, bad)) = samples
            .iter()
            .enumerate()
            .find(|(_, s)| s.features.dim() != shape)
        {
            return Err(Error::ShapeMismatch {
                index,
                expected: shape,
                found: bad.features.dim(),
            });
        }
        samples.shuffle(rng);
        Ok(Self {
            samples,
            shape,
            speakers: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// One more than the largest label. Labels are assumed to be contiguous.
    pub fn class_count(&self) -> usize {
        self.samples
            .iter()
            .map(|s| s.label + 1)
            .max()
            .unwrap_or(0)
    }

    /// `(H, W)` of every feature slice.
    pub fn feature_shape(&self) -> (usize, usize) {
        self.shape
    }

    /// The sample at `index` with a leading channel axis, `(1, H, W)`.
    pub fn item_at(&self, index: usize) -> Option<(Array3<f32>, usize)> {
        let sample = self.samples.get(index)?;
        Some((sample.features.clone().insert_axis(Axis(0)), sample.label))
    }

    pub fn sample(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Speaker names by label id, when the archive recorded them.
    pub fn speakers(&self) -> &[String] {
        &self.speakers
    }
}

/// Write samples in the format read by [`Dataset::load`].
pub fn write_archive(path: impl AsRef<Path>, samples: &[Sample], speakers: &[String]) -> Result<()> {
    let (h, w) = samples
        .first()
        .map(|s| s.features.dim())
        .ok_or(Error::EmptyDataset)?;
    let mut features = Array3::<f32>::zeros((samples.len(), h, w));
    for (index, (mut slot, sample)) in features.outer_iter_mut().zip(samples).enumerate() {
        if sample.features.dim() != (h, w) {
            return Err(Error::ShapeMismatch {
                index,
                expected: (h, w),
                found: sample.features.dim(),
            });
        }
        slot.assign(&sample.features);
    }
    let labels: Array1<i64> = samples.iter().map(|s| s.label as i64).collect();

    let mut npz = NpzWriter::new(File::create(path)?);
    npz.add_array("labels", &labels)?;
    npz.add_array("features", &features)?;
    if !speakers.is_empty() {
        let joined = speakers.join("\n");
        npz.add_array("speakers", &Array1::from_vec(joined.into_bytes()))?;
    }
    npz.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample(label: usize) -> Sample {
        Sample {
            label,
            features: Array2::from_elem((3, 4), label as f32),
        }
    }

    #[test]
    fn class_count_is_max_label_plus_one() {
        let mut rng = StdRng::seed_from_u64(1);
        let ds = Dataset::from_samples([0, 1, 2, 5].map(sample).to_vec(), &mut rng).unwrap();
        assert_eq!(ds.class_count(), 6);
        assert_eq!(ds.len(), 4);
    }

    #[test]
    fn item_at_adds_channel_axis() {
        let mut rng = StdRng::seed_from_u64(1);
        let ds = Dataset::from_samples(vec![sample(3)], &mut rng).unwrap();
        let (input, label) = ds.item_at(0).unwrap();
        assert_eq!(input.dim(), (1, 3, 4));
        assert_eq!(label, 3);
        assert!(input.iter().all(|&v| v == 3.0));
        assert!(ds.item_at(1).is_none());
    }

    #[test]
    fn rejects_empty_and_ragged_samples() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            Dataset::from_samples(Vec::new(), &mut rng),
            Err(Error::EmptyDataset)
        ));
        let ragged = vec![
            sample(0),
            Sample {
                label: 1,
                features: Array2::zeros((2, 4)),
            },
        ];
        assert!(matches!(
            Dataset::from_samples(ragged, &mut rng),
            Err(Error::ShapeMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn shuffle_keeps_every_sample() {
        let mut rng = StdRng::seed_from_u64(9);
        let ds = Dataset::from_samples((0..50).map(sample).collect(), &mut rng).unwrap();
        let mut labels: Vec<usize> = ds.samples().iter().map(|s| s.label).collect();
        labels.sort_unstable();
        assert_eq!(labels, (0..50).collect::<Vec<_>>());
    }
}
