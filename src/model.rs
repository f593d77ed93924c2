use ndarray::{Array2, Array4};

use crate::checkpoint::ModelState;
use crate::error::Result;
use crate::nn::Param;

/// A trainable map from `(B, 1, H, W)` inputs to `(B, classes)` scores.
pub trait Classifier {
    fn num_classes(&self) -> usize;

    /// Inference-only forward pass. Keeps no activations for backprop.
    fn forward(&self, inputs: &Array4<f32>) -> Array2<f32>;

    /// Forward pass that caches what [`Classifier::backward`] needs.
    fn forward_train(&mut self, inputs: &Array4<f32>) -> Array2<f32>;

    /// Accumulate parameter gradients from the gradient of the loss w.r.t.
    /// the logits of the last `forward_train` call.
    fn backward(&mut self, grad_logits: &Array2<f32>);

    fn zero_grad(&mut self);

    /// Parameters in a stable order, paired with their gradients.
    fn params(&mut self) -> Vec<Param<'_>>;

    fn state(&self) -> ModelState;

    fn load_state(&mut self, state: &ModelState) -> Result<()>;
}
