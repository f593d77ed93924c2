use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use ndarray::ArrayD;
use ndarray_npy::{NpzReader, NpzWriter};

use crate::error::{Error, Result};

/// Named parameter tensors of a model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelState {
    tensors: BTreeMap<String, ArrayD<f32>>,
}

impl ModelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.tensors.get(name)
    }

    /// Fetch `name`, failing unless it has exactly `shape`.
    pub fn expect_shape(&self, name: &str, shape: &[usize]) -> Result<&ArrayD<f32>> {
        let tensor = self
            .get(name)
            .ok_or_else(|| Error::MissingTensor(name.to_owned()))?;
        if tensor.shape() != shape {
            return Err(Error::TensorShape {
                name: name.to_owned(),
                expected: shape.to_vec(),
                found: tensor.shape().to_vec(),
            });
        }
        Ok(tensor)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }
}

/// Write every tensor of `state` as one entry of an `.npz` file.
pub fn save_checkpoint(path: impl AsRef<Path>, state: &ModelState) -> Result<()> {
    let path = path.as_ref();
    let mut npz = NpzWriter::new(File::create(path)?);
    for (name, tensor) in &state.tensors {
        npz.add_array(name.as_str(), tensor)?;
    }
    npz.finish()?;
    log::info!("saved {} tensors to {}", state.len(), path.display());
    Ok(())
}

/// Read every entry of an `.npz` file written by [`save_checkpoint`].
pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<ModelState> {
    let path = path.as_ref();
    let read_err = |source| Error::ArchiveRead {
        path: path.to_path_buf(),
        source,
    };
    let mut npz = NpzReader::new(File::open(path)?).map_err(read_err)?;
    let mut state = ModelState::new();
    for entry in npz.names().map_err(read_err)? {
        let name = entry.strip_suffix(".npy").unwrap_or(&entry).to_owned();
        let tensor: ArrayD<f32> = npz.by_name(&name).map_err(read_err)?;
        state.insert(name, tensor);
    }
    log::info!("loaded {} tensors from {}", state.len(), path.display());
    Ok(state)
}
