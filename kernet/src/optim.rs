//! First-order optimizers.
//!
//! Each optimizer owns the state for exactly one parameter vector. Weight
//! decay is L2 regularization added to the gradient, `g + λθ`.

use ndarray::prelude::*;
use ndarray::Zip;

use crate::traits::Optimizer;

/// Stochastic gradient descent with optional momentum.
///
/// Without momentum: `θ = θ - η g`. With momentum: `v = γ v + g`,
/// `θ = θ - η v`.
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f32,
    momentum: f32,
    weight_decay: f32,
    velocity: Option<Array1<f32>>,
}

impl Sgd {
    #[must_use]
    pub fn new(learning_rate: f32) -> Self {
        Sgd {
            learning_rate,
            momentum: 0.0,
            weight_decay: 0.0,
            velocity: None,
        }
    }

    #[must_use]
    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    #[must_use]
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, mut params: ArrayViewMut1<'_, f32>, grads: ArrayView1<'_, f32>) {
        assert_eq!(params.len(), grads.len(), "parameters and gradients must have same length");
        let g = &grads + &(&params * self.weight_decay);
        if self.momentum > 0.0 {
            let v = self
                .velocity
                .get_or_insert_with(|| Array1::zeros(params.len()));
            v.zip_mut_with(&g, |v, &g| *v = self.momentum * *v + g);
            params.scaled_add(-self.learning_rate, &*v);
        } else {
            params.scaled_add(-self.learning_rate, &g);
        }
    }
}

/// Adam optimizer (Kingma & Ba, 2015).
///
/// ```text
/// m = β₁ m + (1 - β₁) g
/// v = β₂ v + (1 - β₂) g²
/// θ = θ - η (m / (1 - β₁ᵗ)) / (√(v / (1 - β₂ᵗ)) + ε)
/// ```
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    /// First moment estimates
    m: Option<Array1<f32>>,
    /// Second moment estimates
    v: Option<Array1<f32>>,
    /// Number of steps taken, for bias correction
    t: i32,
}

impl Adam {
    /// Default: β₁=0.9, β₂=0.999, ε=1e-8, no weight decay.
    #[must_use]
    pub fn new(learning_rate: f32) -> Self {
        Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
            m: None,
            v: None,
            t: 0,
        }
    }

    #[must_use]
    pub fn betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    #[must_use]
    pub fn eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    #[must_use]
    pub fn weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: ArrayViewMut1<'_, f32>, grads: ArrayView1<'_, f32>) {
        assert_eq!(params.len(), grads.len(), "parameters and gradients must have same length");
        let n = params.len();
        self.t += 1;
        let bias_correction1 = 1.0 - self.beta1.powi(self.t);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t);
        let m = self.m.get_or_insert_with(|| Array1::zeros(n));
        let v = self.v.get_or_insert_with(|| Array1::zeros(n));
        let (beta1, beta2, eps, lr, wd) = (
            self.beta1,
            self.beta2,
            self.eps,
            self.learning_rate,
            self.weight_decay,
        );

        Zip::from(params)
            .and(grads)
            .and(m)
            .and(v)
            .for_each(|p, &g, m, v| {
                let g = g + wd * *p;
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / bias_correction1;
                let v_hat = *v / bias_correction2;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
    }
}
