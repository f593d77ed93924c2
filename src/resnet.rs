use ndarray::{Array2, Array4, Ix1, Ix2};
use rand::Rng;

use crate::checkpoint::ModelState;
use crate::config::ModelConfig;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::model::Classifier;
use crate::nn::{relu, relu_backward, Linear, Param};

struct ResidualBlock {
    fc1: Linear,
    fc2: Linear,
}

/// Activations kept by one residual block for the backward pass.
struct BlockCache {
    input: Array2<f32>,
    pre1: Array2<f32>,
    act1: Array2<f32>,
    pre_out: Array2<f32>,
}

struct Cache {
    input: Array2<f32>,
    stem_pre: Array2<f32>,
    blocks: Vec<BlockCache>,
    features: Array2<f32>,
}

/// Residual classifier over spectrogram slices.
///
/// The `(C, H, W)` input is flattened and projected to `hidden` units, passed
/// through `blocks` residual blocks `relu(x + fc2(relu(fc1(x))))` and mapped
/// to class scores by a final linear layer.
pub struct ResNet {
    stem: Linear,
    blocks: Vec<ResidualBlock>,
    head: Linear,
    input_shape: (usize, usize, usize),
    num_classes: usize,
    device: Device,
    cache: Option<Cache>,
}

impl ResNet {
    pub fn new(
        config: &ModelConfig,
        input_shape: (usize, usize, usize),
        num_classes: usize,
        device: Device,
        rng: &mut impl Rng,
    ) -> Self {
        let (channels, h, w) = input_shape;
        let input = channels * h * w;
        let hidden = config.hidden;
        let stem = Linear::new(input, hidden, rng);
        let blocks = (0..config.blocks)
            .map(|_| ResidualBlock {
                fc1: Linear::new(hidden, hidden, rng),
                fc2: Linear::new(hidden, hidden, rng),
            })
            .collect();
        let head = Linear::new(hidden, num_classes, rng);
        Self {
            stem,
            blocks,
            head,
            input_shape,
            num_classes,
            device,
            cache: None,
        }
    }

    /// `(channels, H, W)` of one input.
    pub fn input_shape(&self) -> (usize, usize, usize) {
        self.input_shape
    }

    fn flatten(&self, inputs: &Array4<f32>) -> Array2<f32> {
        let (batch, channels, h, w) = inputs.dim();
        assert_eq!(
            (channels, h, w),
            self.input_shape,
            "input does not match the model's (channels, H, W)"
        );
        let plane = h * w;
        Array2::from_shape_fn((batch, channels * plane), |(n, i)| {
            let rest = i % plane;
            inputs[[n, i / plane, rest / w, rest % w]]
        })
    }

    fn layers(&self) -> Vec<(String, &Linear)> {
        let mut out = vec![("stem".to_owned(), &self.stem)];
        for (i, block) in self.blocks.iter().enumerate() {
            out.push((format!("block{i}.fc1"), &block.fc1));
            out.push((format!("block{i}.fc2"), &block.fc2));
        }
        out.push(("head".to_owned(), &self.head));
        out
    }

    fn layers_mut(&mut self) -> Vec<(String, &mut Linear)> {
        let mut out = vec![("stem".to_owned(), &mut self.stem)];
        for (i, block) in self.blocks.iter_mut().enumerate() {
            out.push((format!("block{i}.fc1"), &mut block.fc1));
            out.push((format!("block{i}.fc2"), &mut block.fc2));
        }
        out.push(("head".to_owned(), &mut self.head));
        out
    }
}

impl Classifier for ResNet {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&self, inputs: &Array4<f32>) -> Array2<f32> {
        let device = &self.device;
        let mut h = relu(&self.stem.forward(&self.flatten(inputs), device));
        for block in &self.blocks {
            let a = relu(&block.fc1.forward(&h, device));
            h = relu(&(block.fc2.forward(&a, device) + &h));
        }
        self.head.forward(&h, device)
    }

    fn forward_train(&mut self, inputs: &Array4<f32>) -> Array2<f32> {
        let device = &self.device;
        let input = self.flatten(inputs);
        let stem_pre = self.stem.forward(&input, device);
        let mut h = relu(&stem_pre);
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let pre1 = block.fc1.forward(&h, device);
            let act1 = relu(&pre1);
            let pre_out = block.fc2.forward(&act1, device) + &h;
            let next = relu(&pre_out);
            blocks.push(BlockCache {
                input: std::mem::replace(&mut h, next),
                pre1,
                act1,
                pre_out,
            });
        }
        let logits = self.head.forward(&h, device);
        self.cache = Some(Cache {
            input,
            stem_pre,
            blocks,
            features: h,
        });
        logits
    }

    fn backward(&mut self, grad_logits: &Array2<f32>) {
        let Some(cache) = self.cache.take() else {
            log::warn!("backward called without a preceding forward_train");
            return;
        };
        let device = &self.device;
        let mut grad = self.head.backward(&cache.features, grad_logits, device);
        for (block, saved) in self.blocks.iter_mut().zip(&cache.blocks).rev() {
            let grad_out = relu_backward(&grad, &saved.pre_out);
            let grad_act1 = block.fc2.backward(&saved.act1, &grad_out, device);
            let grad_pre1 = relu_backward(&grad_act1, &saved.pre1);
            grad = block.fc1.backward(&saved.input, &grad_pre1, device) + &grad_out;
        }
        let grad_stem = relu_backward(&grad, &cache.stem_pre);
        self.stem.accumulate(&cache.input, &grad_stem, device);
    }

    fn zero_grad(&mut self) {
        for (_, layer) in self.layers_mut() {
            layer.zero_grad();
        }
    }

    fn params(&mut self) -> Vec<Param<'_>> {
        self.layers_mut()
            .into_iter()
            .flat_map(|(_, layer)| layer.params())
            .collect()
    }

    fn state(&self) -> ModelState {
        let mut state = ModelState::new();
        for (name, layer) in self.layers() {
            state.insert(format!("{name}.weight"), layer.weight.clone().into_dyn());
            state.insert(format!("{name}.bias"), layer.bias.clone().into_dyn());
        }
        state
    }

    fn load_state(&mut self, state: &ModelState) -> Result<()> {
        let layer_names: Vec<String> = self.layers().into_iter().map(|(n, _)| n).collect();
        let extra = state.names().find(|tensor| {
            !layer_names.iter().any(|layer| {
                tensor
                    .strip_prefix(layer.as_str())
                    .is_some_and(|rest| rest == ".weight" || rest == ".bias")
            })
        });
        if let Some(name) = extra {
            return Err(Error::UnexpectedTensor(name.to_owned()));
        }

        let mut loaded = Vec::with_capacity(layer_names.len());
        for (name, layer) in self.layers() {
            let weight = state
                .expect_shape(&format!("{name}.weight"), layer.weight.shape())?
                .clone()
                .into_dimensionality::<Ix2>()?;
            let bias = state
                .expect_shape(&format!("{name}.bias"), layer.bias.shape())?
                .clone()
                .into_dimensionality::<Ix1>()?;
            loaded.push((weight, bias));
        }
        for ((_, layer), (weight, bias)) in self.layers_mut().into_iter().zip(loaded) {
            layer.weight = weight;
            layer.bias = bias;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::softmax_cross_entropy;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model(seed: u64) -> ResNet {
        let config = ModelConfig { hidden: 8, blocks: 2 };
        ResNet::new(&config, (1, 3, 4), 5, Device::Cpu, &mut StdRng::seed_from_u64(seed))
    }

    fn inputs() -> Array4<f32> {
        Array4::from_shape_fn((6, 1, 3, 4), |(b, _, h, w)| ((b * 12 + h * 4 + w) as f32).sin())
    }

    #[test]
    fn output_has_one_score_per_class() {
        let net = model(1);
        assert_eq!(net.forward(&inputs()).dim(), (6, 5));
    }

    #[test]
    fn multi_channel_inputs_size_the_stem() {
        let config = ModelConfig { hidden: 8, blocks: 1 };
        let net = ResNet::new(&config, (2, 3, 4), 5, Device::Cpu, &mut StdRng::seed_from_u64(7));
        assert_eq!(net.input_shape(), (2, 3, 4));
        assert_eq!(net.state().get("stem.weight").unwrap().shape(), &[24, 8]);
        let x = Array4::from_shape_fn((3, 2, 3, 4), |(b, c, h, w)| (b + c + h + w) as f32 * 0.1);
        assert_eq!(net.forward(&x).dim(), (3, 5));
    }

    #[test]
    #[should_panic(expected = "(channels, H, W)")]
    fn mismatched_channel_count_is_reported() {
        let net = model(8);
        net.forward(&Array4::zeros((1, 2, 3, 4)));
    }

    #[test]
    fn training_forward_matches_inference() {
        let mut net = model(2);
        let x = inputs();
        let eval = net.forward(&x);
        let train = net.forward_train(&x);
        assert!(eval.iter().zip(train.iter()).all(|(a, b)| (a - b).abs() < 1e-6));
    }

    #[test]
    fn stem_gradient_matches_finite_difference() {
        let mut net = model(3);
        let x = inputs();
        let labels = [0usize, 1, 2, 3, 4, 0];
        let (_, grad) = softmax_cross_entropy(&net.forward_train(&x), &labels);
        net.zero_grad();
        net.backward(&grad);
        let analytic = net.stem.grad_weight()[[5, 3]];

        let eps = 1e-3;
        net.stem.weight[[5, 3]] += eps;
        let (plus, _) = softmax_cross_entropy(&net.forward(&x), &labels);
        net.stem.weight[[5, 3]] -= 2.0 * eps;
        let (minus, _) = softmax_cross_entropy(&net.forward(&x), &labels);
        let numeric = (plus - minus) / (2.0 * eps);
        assert!((analytic - numeric).abs() < 1e-2, "{analytic} vs {numeric}");
    }

    #[test]
    fn state_round_trip_reproduces_outputs() {
        let source = model(4);
        let mut target = model(5);
        let x = inputs();
        assert_ne!(source.forward(&x), target.forward(&x));
        target.load_state(&source.state()).unwrap();
        assert_eq!(source.forward(&x), target.forward(&x));
    }

    #[test]
    fn load_state_rejects_other_architectures() {
        let config = ModelConfig { hidden: 4, blocks: 1 };
        let other = ResNet::new(&config, (1, 3, 4), 5, Device::Cpu, &mut StdRng::seed_from_u64(0));
        let mut net = model(6);
        assert!(matches!(
            net.load_state(&other.state()),
            Err(Error::TensorShape { .. })
        ));
    }
}
