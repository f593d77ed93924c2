use ndarray::{Array1, Array2, ArrayViewD, ArrayViewMutD, Axis};
use rand::distributions::Uniform;
use rand::Rng;

use crate::device::Device;

/// A parameter tensor together with its accumulated gradient.
pub struct Param<'a> {
    pub value: ArrayViewMutD<'a, f32>,
    pub grad: ArrayViewD<'a, f32>,
}

/// Fully connected layer `y = x · W + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
    grad_weight: Array2<f32>,
    grad_bias: Array1<f32>,
}

impl Linear {
    /// He-uniform initialised layer.
    pub fn new(input: usize, output: usize, rng: &mut impl Rng) -> Self {
        let limit = (6.0 / input.max(1) as f32).sqrt();
        let dist = Uniform::new_inclusive(-limit, limit);
        Self {
            weight: Array2::from_shape_fn((input, output), |_| rng.sample(dist)),
            bias: Array1::zeros(output),
            grad_weight: Array2::zeros((input, output)),
            grad_bias: Array1::zeros(output),
        }
    }

    pub fn forward(&self, x: &Array2<f32>, device: &Device) -> Array2<f32> {
        device.matmul(x.view(), self.weight.view()) + &self.bias
    }

    /// Add this batch's parameter gradients without computing the input gradient.
    pub fn accumulate(&mut self, x: &Array2<f32>, grad_out: &Array2<f32>, device: &Device) {
        self.grad_weight += &device.matmul(x.t(), grad_out.view());
        self.grad_bias += &grad_out.sum_axis(Axis(0));
    }

    /// Accumulate parameter gradients and return the gradient w.r.t. `x`.
    pub fn backward(&mut self, x: &Array2<f32>, grad_out: &Array2<f32>, device: &Device) -> Array2<f32> {
        self.accumulate(x, grad_out, device);
        device.matmul(grad_out.view(), self.weight.t())
    }

    pub fn grad_weight(&self) -> &Array2<f32> {
        &self.grad_weight
    }

    pub fn zero_grad(&mut self) {
        self.grad_weight.fill(0.0);
        self.grad_bias.fill(0.0);
    }

    pub fn params(&mut self) -> [Param<'_>; 2] {
        [
            Param {
                value: self.weight.view_mut().into_dyn(),
                grad: self.grad_weight.view().into_dyn(),
            },
            Param {
                value: self.bias.view_mut().into_dyn(),
                grad: self.grad_bias.view().into_dyn(),
            },
        ]
    }
}

pub fn relu(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(|v| v.max(0.0))
}

/// Gate `grad` by the ReLU derivative at the pre-activation `pre`.
pub fn relu_backward(grad: &Array2<f32>, pre: &Array2<f32>) -> Array2<f32> {
    let mut out = grad.clone();
    out.zip_mut_with(pre, |g, &p| {
        if p <= 0.0 {
            *g = 0.0;
        }
    });
    out
}

/// Mean softmax cross-entropy over the batch and its gradient w.r.t. `logits`.
pub fn softmax_cross_entropy(logits: &Array2<f32>, labels: &[usize]) -> (f32, Array2<f32>) {
    let batch = logits.nrows().max(1) as f32;
    let mut grad = logits.clone();
    let mut loss = 0.0f32;
    for (mut row, &label) in grad.outer_iter_mut().zip(labels) {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
        loss -= row[label].max(f32::MIN_POSITIVE).ln();
        row[label] -= 1.0;
    }
    grad.mapv_inplace(|g| g / batch);
    (loss / batch, grad)
}

/// Index of the largest score in each row. Ties go to the lowest index.
pub fn argmax(logits: &Array2<f32>) -> Vec<usize> {
    logits
        .outer_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn uniform_logits_give_log_class_count() {
        let logits = Array2::<f32>::zeros((2, 4));
        let (loss, grad) = softmax_cross_entropy(&logits, &[0, 3]);
        assert!((loss - 4.0f32.ln()).abs() < 1e-6);
        for row in grad.outer_iter() {
            assert!(row.sum().abs() < 1e-6);
        }
        assert!((grad[[0, 0]] - (0.25 - 1.0) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn argmax_prefers_first_maximum() {
        let logits = array![[0.1, 0.7, 0.7], [3.0, -1.0, 2.0]];
        assert_eq!(argmax(&logits), vec![1, 0]);
    }

    #[test]
    fn linear_backward_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut layer = Linear::new(3, 2, &mut rng);
        let x = array![[0.5f32, -1.0, 2.0]];
        let labels = [1usize];
        let device = Device::Cpu;

        let (_, grad_out) = softmax_cross_entropy(&layer.forward(&x, &device), &labels);
        layer.zero_grad();
        layer.backward(&x, &grad_out, &device);
        let analytic = layer.grad_weight[[2, 1]];

        let eps = 1e-3;
        let mut plus = layer.clone();
        plus.weight[[2, 1]] += eps;
        let mut minus = layer.clone();
        minus.weight[[2, 1]] -= eps;
        let (lp, _) = softmax_cross_entropy(&plus.forward(&x, &device), &labels);
        let (lm, _) = softmax_cross_entropy(&minus.forward(&x, &device), &labels);
        let numeric = (lp - lm) / (2.0 * eps);
        assert!((analytic - numeric).abs() < 1e-2, "{analytic} vs {numeric}");
    }

    #[test]
    fn relu_backward_blocks_negative_inputs() {
        let pre = array![[-1.0f32, 0.0, 2.0]];
        let grad = array![[5.0f32, 5.0, 5.0]];
        assert_eq!(relu_backward(&grad, &pre), array![[0.0, 0.0, 5.0]]);
        assert_eq!(relu(&pre), array![[0.0, 0.0, 2.0]]);
    }
}
