use ndarray::{ArrayD, Zip};

use crate::nn::Param;

/// Adam with bias-corrected moment estimates.
///
/// Moment buffers are matched to parameters by position, so `step` must be
/// called with parameters in the same order every time.
pub struct Adam {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    t: i32,
    moments: Vec<(ArrayD<f32>, ArrayD<f32>)>,
}

impl Adam {
    pub fn new(lr: f32) -> Self {
        Self::with_betas(lr, 0.9, 0.999, 1e-8)
    }

    pub fn with_betas(lr: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            t: 0,
            moments: Vec::new(),
        }
    }

    pub fn steps(&self) -> i32 {
        self.t
    }

    pub fn step(&mut self, params: Vec<Param<'_>>) {
        self.t += 1;
        let (b1, b2, eps, lr) = (self.beta1, self.beta2, self.eps, self.lr);
        let c1 = 1.0 - b1.powi(self.t);
        let c2 = 1.0 - b2.powi(self.t);
        for (i, mut p) in params.into_iter().enumerate() {
            if self.moments.len() <= i {
                self.moments
                    .push((ArrayD::zeros(p.value.raw_dim()), ArrayD::zeros(p.value.raw_dim())));
            }
            let (m, v) = &mut self.moments[i];
            Zip::from(&mut p.value)
                .and(&p.grad)
                .and(m)
                .and(v)
                .for_each(|w, &g, m, v| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    let m_hat = *m / c1;
                    let v_hat = *v / c2;
                    *w -= lr * m_hat / (v_hat.sqrt() + eps);
                });
        }
    }
}
