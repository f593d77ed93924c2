use std::fs::File;

use ndarray::{array, Array1, Array2, Array3};
use ndarray_npy::NpzWriter;
use rand::rngs::StdRng;
use rand::SeedableRng;
use vctk_resnet::{write_archive, Dataset, Error, Sample};

fn samples() -> Vec<Sample> {
    [0usize, 1, 2, 5, 1]
        .iter()
        .enumerate()
        .map(|(i, &label)| Sample {
            label,
            features: Array2::from_elem((2, 3), i as f32),
        })
        .collect()
}

#[test]
fn written_archive_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vctk.npz");
    let speakers: Vec<String> = ["p225", "p226", "p227", "p228", "p229", "p230"]
        .map(String::from)
        .to_vec();
    write_archive(&path, &samples(), &speakers).unwrap();

    let ds = Dataset::load(&path, &mut StdRng::seed_from_u64(0)).unwrap();
    assert_eq!(ds.len(), 5);
    assert_eq!(ds.class_count(), 6);
    assert_eq!(ds.feature_shape(), (2, 3));
    assert_eq!(ds.speakers(), speakers.as_slice());

    // Sample i was filled with the value i, so the shuffle must keep pairs intact.
    let original = samples();
    for s in ds.samples() {
        let i = s.features[[0, 0]] as usize;
        assert_eq!(s.label, original[i].label);
    }
}

#[test]
fn missing_archive_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Dataset::load(dir.path().join("nope.npz"), &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn corrupt_archive_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.npz");
    std::fs::write(&path, b"definitely not a zip file").unwrap();
    let err = Dataset::load(&path, &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(matches!(err, Error::ArchiveRead { .. }));
}

#[test]
fn archive_without_features_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labels_only.npz");
    let mut npz = NpzWriter::new(File::create(&path).unwrap());
    npz.add_array("labels", &array![0i64, 1]).unwrap();
    npz.finish().unwrap();
    let err = Dataset::load(&path, &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(matches!(err, Error::ArchiveRead { .. }));
}

#[test]
fn label_and_feature_counts_must_agree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mismatch.npz");
    let mut npz = NpzWriter::new(File::create(&path).unwrap());
    npz.add_array("labels", &array![0i64, 1, 2]).unwrap();
    npz.add_array("features", &Array3::<f32>::zeros((2, 4, 4))).unwrap();
    npz.finish().unwrap();
    let err = Dataset::load(&path, &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(matches!(err, Error::LengthMismatch { labels: 3, features: 2 }));
}

#[test]
fn negative_labels_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("negative.npz");
    let mut npz = NpzWriter::new(File::create(&path).unwrap());
    npz.add_array("labels", &Array1::from_vec(vec![0i64, -1])).unwrap();
    npz.add_array("features", &Array3::<f32>::zeros((2, 4, 4))).unwrap();
    npz.finish().unwrap();
    let err = Dataset::load(&path, &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(matches!(err, Error::InvalidLabel { index: 1, label: -1 }));
}

#[test]
fn empty_archive_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.npz");
    let mut npz = NpzWriter::new(File::create(&path).unwrap());
    npz.add_array("labels", &Array1::<i64>::zeros(0)).unwrap();
    npz.add_array("features", &Array3::<f32>::zeros((0, 4, 4))).unwrap();
    npz.finish().unwrap();
    let err = Dataset::load(&path, &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(matches!(err, Error::EmptyDataset));
}
